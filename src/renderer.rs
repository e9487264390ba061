// =============================================================================
// RENDERER - Frames in flight over a swapchain
// =============================================================================
//
// FRAME FLOW:
// 1. Wait for this slot's fence (the GPU finished the slot's last frame)
// 2. Acquire a swapchain image; wait for whichever slot last used it
// 3. Reset the fence, record image's command buffer:
//      scene uniforms: slot staging buffer → image's device-local UBO
//      render pass: multisampled colour + depth, resolved into the image
// 4. Submit (wait image_available, signal render_finished + fence)
// 5. Present (wait render_finished)
//
// Resizes and out-of-date results mark the swapchain stale; it is rebuilt at
// the next frame_start after the device goes idle.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use glam::{Mat4, Vec3};
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::mem::size_of;
use std::path::Path;
use std::sync::Arc;

use crate::backend::buffer::{self, SimpleBuffer};
use crate::backend::commands::CommandPool;
use crate::backend::descriptor::{self, UniformDescriptors};
use crate::backend::device::{DeviceInstance, DeviceRequirements, QueueRef};
use crate::backend::framebuffer::FrameBufferSet;
use crate::backend::pipeline::{AttachmentLayout, GraphicsPipeline, GraphicsPipelineDesc};
use crate::backend::shader::{ShaderModule, ShaderWatcher};
use crate::backend::surface;
use crate::backend::swapchain::{Acquired, PresentStatus, WindowIntegration};
use crate::backend::sync::{self, BufferConsumer, FrameSync};
use crate::config::Config;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventResponse};
use crate::frame::{BeginOutcome, FrameBackend, FrameCycle, FrameToken, SwapchainState};
use crate::scene::{cube, DrawList, Light, MeshHandle, MeshPushConstants, SceneUniform, Vertex};
use crate::teardown::{self, Stage, Teardown};

pub const MESH_VERTEX_SHADER: &str = "mesh.vert.spv";
pub const MESH_FRAGMENT_SHADER: &str = "mesh.frag.spv";

/// A device-local vertex/index buffer pair.
struct Mesh {
    vertices: SimpleBuffer,
    indices: SimpleBuffer,
    index_count: u32,
}

/// Everything indexed by swapchain image; rebuilt with the swapchain.
struct ImageResources {
    command_buffers: Vec<vk::CommandBuffer>,
    framebuffers: FrameBufferSet,
    uniforms: Vec<SimpleBuffer>,
    descriptors: UniformDescriptors,
}

impl ImageResources {
    fn new(
        device: &Arc<DeviceInstance>,
        pool: &CommandPool,
        pipeline: &GraphicsPipeline,
        window: &WindowIntegration,
        scene_layout: vk::DescriptorSetLayout,
    ) -> Result<Self> {
        let image_count = window.image_count();
        let uniform_size = size_of::<SceneUniform>() as vk::DeviceSize;

        let framebuffers = FrameBufferSet::new(device.clone(), pipeline, window)?;

        let uniforms = (0..image_count)
            .map(|_| {
                SimpleBuffer::new(
                    device.clone(),
                    uniform_size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                    vk::MemoryPropertyFlags::DEVICE_LOCAL,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let handles: Vec<vk::Buffer> = uniforms.iter().map(SimpleBuffer::handle).collect();
        let descriptors = UniformDescriptors::new(device.clone(), scene_layout, &handles, uniform_size)?;

        let command_buffers = pool.allocate(image_count as u32)?;

        log::debug!("Created resources for {} swapchain images", image_count);

        Ok(Self {
            command_buffers,
            framebuffers,
            uniforms,
            descriptors,
        })
    }
}

fn load_mesh_pipeline(
    device: &Arc<DeviceInstance>,
    shader_dir: &Path,
    scene_layout: vk::DescriptorSetLayout,
    attachments: AttachmentLayout,
    front_face: vk::FrontFace,
) -> Result<GraphicsPipeline> {
    let shaders = [
        ShaderModule::from_file(device.clone(), vk::ShaderStageFlags::VERTEX, &shader_dir.join(MESH_VERTEX_SHADER))?,
        ShaderModule::from_file(device.clone(), vk::ShaderStageFlags::FRAGMENT, &shader_dir.join(MESH_FRAGMENT_SHADER))?,
    ];
    let bindings = Vertex::binding_descriptions();
    let attributes = Vertex::attribute_descriptions();
    let descriptor_layouts = [scene_layout];
    let push_constant_ranges = [MeshPushConstants::range()];

    let desc = GraphicsPipelineDesc {
        shaders: &shaders,
        vertex_bindings: &bindings,
        vertex_attributes: &attributes,
        descriptor_layouts: &descriptor_layouts,
        push_constant_ranges: &push_constant_ranges,
        front_face,
        cull_mode: vk::CullModeFlags::BACK,
    };

    // Shader modules are only needed until the pipeline exists
    GraphicsPipeline::new(device.clone(), &desc, attachments)
}

// =============================================================================
// RENDER CORE - the Vulkan side of the frame cycle
// =============================================================================

struct RenderCore {
    device: Arc<DeviceInstance>,
    graphics_queue: QueueRef,
    window: WindowIntegration,
    command_pool: CommandPool,
    scene_layout: vk::DescriptorSetLayout,
    pipeline: GraphicsPipeline,
    slots: Vec<FrameSync>,
    /// Host-visible scene uniforms, one per slot
    staging: Vec<SimpleBuffer>,
    images: ImageResources,
    meshes: Vec<Mesh>,
    draw_list: DrawList,
    clear_color: [f32; 4],
    flip_y: bool,
    front_face: vk::FrontFace,
}

impl RenderCore {
    /// Fence/semaphore set and scene staging buffer for each slot.
    fn init_frame_slots(&mut self, frames_in_flight: usize) -> Result<()> {
        self.slots = FrameSync::ring(&self.device, frames_in_flight)?;
        self.staging = (0..frames_in_flight)
            .map(|_| {
                SimpleBuffer::host_visible(
                    self.device.clone(),
                    size_of::<SceneUniform>() as vk::DeviceSize,
                    vk::BufferUsageFlags::TRANSFER_SRC,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(())
    }

    fn rebuild_image_resources(&mut self) -> Result<()> {
        self.images = ImageResources::new(
            &self.device,
            &self.command_pool,
            &self.pipeline,
            &self.window,
            self.scene_layout,
        )?;
        Ok(())
    }

    fn viewport(&self) -> vk::Viewport {
        let extent = self.window.extent();
        let (width, height) = (extent.width as f32, extent.height as f32);
        if self.flip_y {
            vk::Viewport {
                x: 0.0,
                y: height,
                width,
                height: -height,
                min_depth: 0.0,
                max_depth: 1.0,
            }
        } else {
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width,
                height,
                min_depth: 0.0,
                max_depth: 1.0,
            }
        }
    }

    fn record_commands(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let image = image_index as usize;
        let cmd = self.images.command_buffers[image];
        let device = &self.device.device;

        let uniform = self.draw_list.scene_uniform();
        self.staging[slot].write(0, bytemuck::bytes_of(&uniform))?;
        let uniform_size = size_of::<SceneUniform>() as vk::DeviceSize;

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .context("Failed to reset command buffer")?;
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .context("Failed to begin command buffer")?;

            // ─────────────────────────────────────────────────────────────────
            // Scene uniforms: staging → device local, visible before shading
            // ─────────────────────────────────────────────────────────────────
            let uniform_buffer = self.images.uniforms[image].handle();
            let region = vk::BufferCopy::builder().size(uniform_size).build();
            device.cmd_copy_buffer(cmd, self.staging[slot].handle(), uniform_buffer, &[region]);
            sync::cmd_upload_barrier(device, cmd, uniform_buffer, uniform_size, BufferConsumer::UNIFORM);

            // ─────────────────────────────────────────────────────────────────
            // Render pass
            // ─────────────────────────────────────────────────────────────────
            let clear_color = vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            };
            let clear_values = [
                clear_color,
                vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                },
                clear_color,
            ];

            let extent = self.window.extent();
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(self.pipeline.render_pass)
                .framebuffer(self.images.framebuffers.get(image_index))
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                })
                .clear_values(&clear_values);

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.pipeline.pipeline);
            device.cmd_set_viewport(cmd, 0, &[self.viewport()]);
            device.cmd_set_scissor(
                cmd,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent,
                }],
            );
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline.layout,
                0,
                &[self.images.descriptors.get(image_index)],
                &[],
            );

            for instance in self.draw_list.instances() {
                let Some(mesh) = self.meshes.get(instance.mesh.0) else {
                    log::warn!("Skipping draw of unknown mesh {:?}", instance.mesh);
                    continue;
                };
                let push = MeshPushConstants::new(instance.transform);
                device.cmd_push_constants(
                    cmd,
                    self.pipeline.layout,
                    vk::ShaderStageFlags::VERTEX,
                    0,
                    bytemuck::bytes_of(&push),
                );
                device.cmd_bind_vertex_buffers(cmd, 0, &[mesh.vertices.handle()], &[0]);
                device.cmd_bind_index_buffer(cmd, mesh.indices.handle(), 0, vk::IndexType::UINT32);
                device.cmd_draw_indexed(cmd, mesh.index_count, 1, 0, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).context("Failed to end command buffer")?;
        }

        self.draw_list.clear();
        Ok(())
    }
}

impl FrameBackend for RenderCore {
    fn wait_for_fence(&mut self, slot: usize) -> Result<()> {
        self.slots[slot].wait(&self.device.device)
    }

    fn reset_fence(&mut self, slot: usize) -> Result<()> {
        self.slots[slot].reset(&self.device.device)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<Acquired> {
        self.window.acquire_next_image(self.slots[slot].image_available)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        self.record_commands(slot, image_index)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let sync = &self.slots[slot];
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [sync.render_finished];
        let command_buffers = [self.images.command_buffers[image_index as usize]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .device
                .queue_submit(self.graphics_queue.queue, &[submit_info.build()], sync.in_flight_fence)
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentStatus> {
        let queue = self.window.present_queue().queue;
        self.window
            .present(queue, image_index, &[self.slots[slot].render_finished])
    }
}

impl Teardown for RenderCore {
    fn destroy_stage(&mut self, stage: Stage) {
        match stage {
            Stage::MeshBuffers => self.meshes.clear(),
            Stage::StagingBuffers => self.staging.clear(),
            Stage::FrameSync => {
                for sync in self.slots.drain(..) {
                    sync.destroy(&self.device.device);
                }
            }
            Stage::ImageViews
            | Stage::DepthImage
            | Stage::MultisampleImage
            | Stage::Swapchain
            | Stage::Surface => self.window.destroy_stage(stage),
            Stage::Framebuffers => self.images.framebuffers.destroy(),
            Stage::Descriptors => self.images.descriptors.destroy(),
            Stage::UniformBuffers => self.images.uniforms.clear(),
            Stage::CommandBuffers => {
                let buffers = std::mem::take(&mut self.images.command_buffers);
                self.command_pool.free(&buffers);
            }
            Stage::CommandPool => self.command_pool.destroy(),
            Stage::Pipeline => self.pipeline.destroy(),
            Stage::DescriptorSetLayout => {
                if self.scene_layout != vk::DescriptorSetLayout::null() {
                    unsafe {
                        self.device
                            .device
                            .destroy_descriptor_set_layout(self.scene_layout, None)
                    };
                    self.scene_layout = vk::DescriptorSetLayout::null();
                }
            }
        }
    }
}

// =============================================================================
// RENDERER - public API
// =============================================================================

pub struct Renderer {
    core: RenderCore,
    cycle: FrameCycle,
    watcher: Option<ShaderWatcher>,
    shader_dir: std::path::PathBuf,
    quit_key: String,
    swapchain_state: SwapchainState,
    frame: Option<FrameToken>,
    cleaned_up: bool,
}

impl Renderer {
    /// Bring up the device, the window's swapchain and everything needed to
    /// draw meshes into it.
    ///
    /// # Safety
    /// The window behind `display`/`window` must outlive the renderer.
    pub unsafe fn new(
        config: &Config,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        framebuffer_size: (u32, u32),
    ) -> Result<Self> {
        log::info!("Initializing renderer...");

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Device with surface + swapchain support
        // ─────────────────────────────────────────────────────────────────────
        let device = Self::init_device(config, display)?;
        let graphics_queue = device
            .queue(vk::QueueFlags::GRAPHICS)
            .ok_or(EngineError::UnsupportedQueue {
                capability: vk::QueueFlags::GRAPHICS,
            })?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Surface, swapchain, depth + multisample targets
        // ─────────────────────────────────────────────────────────────────────
        let window = Self::init_window(config, &device, display, window, framebuffer_size, graphics_queue)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Pipeline and per-image resources
        // ─────────────────────────────────────────────────────────────────────
        let command_pool = CommandPool::new(device.clone(), graphics_queue)?;
        let scene_layout = descriptor::create_uniform_layout(
            &device,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        )?;

        let built = (|| {
            let pipeline = load_mesh_pipeline(
                &device,
                &config.shaders.directory,
                scene_layout,
                window.attachment_layout(),
                config.get_front_face(),
            )
            .context("Failed to build mesh pipeline")?;
            let images = ImageResources::new(&device, &command_pool, &pipeline, &window, scene_layout)?;
            Ok::<_, anyhow::Error>((pipeline, images))
        })();
        let (pipeline, images) = match built {
            Ok(built) => built,
            Err(e) => {
                device.device.destroy_descriptor_set_layout(scene_layout, None);
                return Err(e);
            }
        };

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Frame slots
        // ─────────────────────────────────────────────────────────────────────
        let image_count = window.image_count();
        let frames_in_flight = config.frames_in_flight(image_count);

        let mut core = RenderCore {
            device: device.clone(),
            graphics_queue,
            window,
            command_pool,
            scene_layout,
            pipeline,
            slots: Vec::new(),
            staging: Vec::new(),
            images,
            meshes: Vec::new(),
            draw_list: DrawList::default(),
            clear_color: config.graphics.clear_color,
            flip_y: config.graphics.flip_viewport_y,
            front_face: config.get_front_face(),
        };

        if let Err(e) = core.init_frame_slots(frames_in_flight) {
            teardown::run(&mut core, &teardown::ENGINE_ORDER);
            return Err(e);
        }

        let watcher = if config.shaders.hot_reload {
            ShaderWatcher::new(&config.shaders.directory)
                .map_err(|e| log::warn!("Shader hot reload disabled: {:#}", e))
                .ok()
        } else {
            None
        };

        log::info!(
            "Renderer ready: {} images, {} frames in flight, {:?} MSAA",
            image_count,
            frames_in_flight,
            core.window.samples()
        );

        Ok(Self {
            core,
            cycle: FrameCycle::new(frames_in_flight, image_count),
            watcher,
            shader_dir: config.shaders.directory.clone(),
            quit_key: config.controls.quit_key.clone(),
            swapchain_state: SwapchainState::new(framebuffer_size),
            frame: None,
            cleaned_up: false,
        })
    }

    fn init_device(config: &Config, display: RawDisplayHandle) -> Result<Arc<DeviceInstance>> {
        let mut requirements = DeviceRequirements::headless(&config.window.title);
        // Validation only in debug builds, like the layers themselves
        requirements.enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
        requirements.instance_extensions = surface::required_extensions(display)?;
        requirements.device_extensions = vec![khr::Swapchain::name()];
        DeviceInstance::new(&requirements)
    }

    unsafe fn init_window(
        config: &Config,
        device: &Arc<DeviceInstance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        framebuffer_size: (u32, u32),
        present_queue: QueueRef,
    ) -> Result<WindowIntegration> {
        WindowIntegration::new(
            device.clone(),
            display,
            window,
            framebuffer_size,
            present_queue,
            config.swapchain_preferences(),
        )
    }

    pub fn device(&self) -> &Arc<DeviceInstance> {
        &self.core.device
    }

    pub fn frames_in_flight(&self) -> usize {
        self.cycle.frames_in_flight()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.core.window.extent()
    }

    pub fn image_count(&self) -> usize {
        self.core.window.image_count()
    }

    // =========================================================================
    // FRAME LOOP
    // =========================================================================

    /// Begin a frame. Returns false when nothing should be drawn this
    /// iteration (minimized, or the swapchain had to be rebuilt first).
    pub fn frame_start(&mut self) -> Result<bool> {
        if self.cleaned_up {
            return Err(EngineError::FrameOrder("frame started after cleanup").into());
        }
        if self.frame.is_some() {
            return Err(EngineError::FrameOrder("frame started twice without ending").into());
        }

        if self.watcher.as_ref().map_or(false, ShaderWatcher::take_changed) {
            self.reload_pipeline()?;
        }

        if !self.swapchain_state.should_render() {
            return Ok(false);
        }

        if self.swapchain_state.should_recreate() {
            self.recreate_swapchain()?;
        }

        let outcome = self.cycle.begin_frame(&mut self.core)?;
        self.swapchain_state.on_acquire(&outcome);
        match outcome {
            BeginOutcome::Ready(token) => {
                self.frame = Some(token);
                Ok(true)
            }
            BeginOutcome::OutOfDate => Ok(false),
        }
    }

    /// Record, submit and present the frame begun by `frame_start`.
    pub fn frame_end(&mut self) -> Result<()> {
        let token = self
            .frame
            .take()
            .ok_or(EngineError::FrameOrder("frame ended without a matching start"))?;

        let status = self.cycle.end_frame(&mut self.core, token)?;
        self.swapchain_state.on_present(status);
        Ok(())
    }

    // =========================================================================
    // SCENE
    // =========================================================================

    pub fn draw(&mut self, mesh: MeshHandle, transform: Mat4) {
        self.core.draw_list.push(mesh, transform);
    }

    pub fn add_light(&mut self, light: Light) {
        self.core.draw_list.add_light(light);
    }

    pub fn set_camera(&mut self, view: Mat4, proj: Mat4) {
        self.core.draw_list.set_camera(view, proj);
    }

    pub fn set_ambient(&mut self, ambient: Vec3) {
        self.core.draw_list.set_ambient(ambient);
    }

    /// Device-local vertex buffer filled through a staging copy.
    pub fn create_simple_vertex_buffer(&self, vertices: &[Vertex]) -> Result<SimpleBuffer> {
        buffer::upload_to_device_local(
            &self.core.device,
            &self.core.command_pool,
            bytemuck::cast_slice(vertices),
            vk::BufferUsageFlags::VERTEX_BUFFER,
            BufferConsumer::VERTEX_INPUT,
        )
        .context("Failed to create vertex buffer")
    }

    /// Device-local 32-bit index buffer filled through a staging copy.
    pub fn create_simple_index_buffer(&self, indices: &[u32]) -> Result<SimpleBuffer> {
        buffer::upload_to_device_local(
            &self.core.device,
            &self.core.command_pool,
            bytemuck::cast_slice(indices),
            vk::BufferUsageFlags::INDEX_BUFFER,
            BufferConsumer::INDEX_INPUT,
        )
        .context("Failed to create index buffer")
    }

    pub fn create_mesh(&mut self, vertices: &[Vertex], indices: &[u32]) -> Result<MeshHandle> {
        let mesh = Mesh {
            vertices: self.create_simple_vertex_buffer(vertices)?,
            indices: self.create_simple_index_buffer(indices)?,
            index_count: indices.len() as u32,
        };
        self.core.meshes.push(mesh);
        Ok(MeshHandle(self.core.meshes.len() - 1))
    }

    pub fn create_cube(&mut self, color: [f32; 3]) -> Result<MeshHandle> {
        let (vertices, indices) = cube(color);
        self.create_mesh(&vertices, &indices)
    }

    // =========================================================================
    // EVENTS / SWAPCHAIN
    // =========================================================================

    pub fn handle_event(&mut self, event: &EngineEvent) -> EventResponse {
        match event {
            EngineEvent::Resized { .. } => {
                self.swapchain_state.on_event(event);
                EventResponse::Continue
            }
            EngineEvent::KeyPressed { key } if key.eq_ignore_ascii_case(&self.quit_key) => EventResponse::Quit,
            EngineEvent::KeyPressed { .. } => EventResponse::Continue,
            EngineEvent::CloseRequested => EventResponse::Quit,
        }
    }

    /// Tear down and rebuild everything sized by the swapchain.
    pub fn recreate_swapchain(&mut self) -> Result<()> {
        if self.swapchain_state.is_minimized() {
            return Ok(());
        }
        if self.frame.is_some() {
            return Err(EngineError::FrameOrder("swapchain rebuilt mid-frame").into());
        }

        let framebuffer_size = self.swapchain_state.framebuffer_size();
        log::info!(
            "Recreating swapchain for {}x{}",
            framebuffer_size.0,
            framebuffer_size.1
        );

        self.core.device.wait_idle()?;
        teardown::run(&mut self.core, &teardown::RECREATE_ORDER);

        self.core.window.recreate(framebuffer_size)?;
        self.core.rebuild_image_resources()?;
        self.cycle.resize_images(self.core.window.image_count())?;

        self.swapchain_state.recreated();
        Ok(())
    }

    /// Rebuild the mesh pipeline from the shader directory. A pipeline that
    /// fails to build is logged and the current one stays in use.
    fn reload_pipeline(&mut self) -> Result<()> {
        log::info!("Reloading shaders from {:?}", self.shader_dir);
        self.core.device.wait_idle()?;

        let pipeline = match load_mesh_pipeline(
            &self.core.device,
            &self.shader_dir,
            self.core.scene_layout,
            self.core.window.attachment_layout(),
            self.core.front_face,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                log::error!("Shader reload failed, keeping previous pipeline: {:#}", e);
                return Ok(());
            }
        };

        // Framebuffers are tied to the render pass
        let framebuffers = FrameBufferSet::new(self.core.device.clone(), &pipeline, &self.core.window)?;
        self.core.images.framebuffers = framebuffers;
        self.core.pipeline = pipeline;

        log::info!("Shaders reloaded");
        Ok(())
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.core.device.wait_idle()
    }

    /// Ordered teardown of every GPU object. Safe to call more than once;
    /// also runs on drop.
    pub fn cleanup(&mut self) {
        if self.cleaned_up {
            return;
        }
        log::info!("Cleaning up renderer...");

        if let Err(e) = self.core.device.wait_idle() {
            log::error!("wait_idle failed during cleanup: {:#}", e);
        }
        self.frame = None;
        self.watcher = None;
        teardown::run(&mut self.core, &teardown::ENGINE_ORDER);
        self.cleaned_up = true;

        log::info!("Renderer cleaned up");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
