// Render pass and pipeline objects
//
// The render pass always declares three attachments in a fixed order:
//   0: multisampled colour   1: depth   2: swapchain image (resolve target)
// so switching sample counts never changes the framebuffer shape.
// Pipelines are built once; changing any input means building a new one.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::shader::ShaderModule;
use super::DeviceInstance;
use crate::error::EngineError;

const ENTRY_POINT: &CStr = c"main";

pub const MULTISAMPLE_ATTACHMENT: u32 = 0;
pub const DEPTH_ATTACHMENT: u32 = 1;
pub const RESOLVE_ATTACHMENT: u32 = 2;

/// Formats and sample count shared by a render pass and its framebuffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentLayout {
    pub color_format: vk::Format,
    pub depth_format: vk::Format,
    pub samples: vk::SampleCountFlags,
}

/// Framebuffer targets must match what the render pass was built for.
pub fn check_attachments(expected: &AttachmentLayout, found: &AttachmentLayout) -> Result<(), EngineError> {
    if expected == found {
        Ok(())
    } else {
        Err(EngineError::AttachmentMismatch {
            expected: *expected,
            found: *found,
        })
    }
}

/// Attachment descriptions in render-pass order.
pub fn attachment_descriptions(layout: &AttachmentLayout) -> [vk::AttachmentDescription; 3] {
    let multisample = vk::AttachmentDescription::builder()
        .format(layout.color_format)
        .samples(layout.samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE) // Resolved, never read back
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let depth = vk::AttachmentDescription::builder()
        .format(layout.depth_format)
        .samples(layout.samples)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
        .build();

    // Single-sample rendering draws straight into the swapchain image, which
    // then has to be cleared like a normal colour target.
    let direct = layout.samples == vk::SampleCountFlags::TYPE_1;
    let resolve = vk::AttachmentDescription::builder()
        .format(layout.color_format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(if direct { vk::AttachmentLoadOp::CLEAR } else { vk::AttachmentLoadOp::DONT_CARE })
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    [multisample, depth, resolve]
}

/// The single external → subpass 0 dependency: don't write colour (or depth)
/// until the presentation engine has released the image. Depth and
/// multisample targets are shared by every frame slot, so the previous
/// frame's attachment writes must also be available before the clear.
pub fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
                | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        )
        .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        .build()
}

pub fn create_render_pass(device: &DeviceInstance, layout: &AttachmentLayout) -> Result<vk::RenderPass> {
    let attachments = attachment_descriptions(layout);
    let multisampled = layout.samples != vk::SampleCountFlags::TYPE_1;

    let color_ref = vk::AttachmentReference {
        attachment: if multisampled { MULTISAMPLE_ATTACHMENT } else { RESOLVE_ATTACHMENT },
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: DEPTH_ATTACHMENT,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let resolve_ref = vk::AttachmentReference {
        attachment: RESOLVE_ATTACHMENT,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };

    let color_refs = [color_ref];
    let resolve_refs = [resolve_ref];
    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .depth_stencil_attachment(&depth_ref);
    if multisampled {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }

    let subpasses = [subpass.build()];
    let dependencies = [external_dependency()];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create render pass")
}

/// Inputs to a graphics pipeline build.
pub struct GraphicsPipelineDesc<'a> {
    pub shaders: &'a [ShaderModule],
    pub vertex_bindings: &'a [vk::VertexInputBindingDescription],
    pub vertex_attributes: &'a [vk::VertexInputAttributeDescription],
    pub descriptor_layouts: &'a [vk::DescriptorSetLayout],
    pub push_constant_ranges: &'a [vk::PushConstantRange],
    pub front_face: vk::FrontFace,
    pub cull_mode: vk::CullModeFlags,
}

pub struct GraphicsPipeline {
    device: Arc<DeviceInstance>,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    pub descriptor_layouts: Vec<vk::DescriptorSetLayout>,
    attachments: AttachmentLayout,
}

impl GraphicsPipeline {
    pub fn new(
        device: Arc<DeviceInstance>,
        desc: &GraphicsPipelineDesc,
        attachments: AttachmentLayout,
    ) -> Result<Self> {
        let render_pass = create_render_pass(&device, &attachments)?;

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(desc.descriptor_layouts)
            .push_constant_ranges(desc.push_constant_ranges);

        let layout = match unsafe { device.device.create_pipeline_layout(&layout_info, None) } {
            Ok(layout) => layout,
            Err(e) => {
                unsafe { device.device.destroy_render_pass(render_pass, None) };
                return Err(e).context("Failed to create pipeline layout");
            }
        };

        let pipeline = match Self::create_pipeline(&device, desc, &attachments, render_pass, layout) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe {
                    device.device.destroy_pipeline_layout(layout, None);
                    device.device.destroy_render_pass(render_pass, None);
                }
                return Err(e);
            }
        };

        log::info!(
            "Graphics pipeline built ({:?}, {:?} samples)",
            attachments.color_format,
            attachments.samples
        );

        Ok(Self {
            device,
            render_pass,
            layout,
            pipeline,
            push_constant_ranges: desc.push_constant_ranges.to_vec(),
            descriptor_layouts: desc.descriptor_layouts.to_vec(),
            attachments,
        })
    }

    fn create_pipeline(
        device: &DeviceInstance,
        desc: &GraphicsPipelineDesc,
        attachments: &AttachmentLayout,
        render_pass: vk::RenderPass,
        layout: vk::PipelineLayout,
    ) -> Result<vk::Pipeline> {
        let shader_stages: Vec<_> = desc
            .shaders
            .iter()
            .map(|shader| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(shader.stage())
                    .module(shader.handle())
                    .name(ENTRY_POINT)
                    .build()
            })
            .collect();

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(desc.vertex_bindings)
            .vertex_attribute_descriptions(desc.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are set per frame so resizes keep the pipeline
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(desc.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(attachments.samples);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS) // Closer objects win
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
                .map_err(|(_, e)| e)
                .context("Failed to create graphics pipeline")?
        };

        Ok(pipelines[0])
    }

    pub fn attachments(&self) -> &AttachmentLayout {
        &self.attachments
    }

    pub fn destroy(&mut self) {
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                self.device.device.destroy_pipeline(self.pipeline, None);
                self.pipeline = vk::Pipeline::null();
            }
            if self.layout != vk::PipelineLayout::null() {
                self.device.device.destroy_pipeline_layout(self.layout, None);
                self.layout = vk::PipelineLayout::null();
            }
            if self.render_pass != vk::RenderPass::null() {
                self.device.device.destroy_render_pass(self.render_pass, None);
                self.render_pass = vk::RenderPass::null();
            }
        }
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        self.destroy();
    }
}

pub struct ComputePipeline {
    device: Arc<DeviceInstance>,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl ComputePipeline {
    pub fn new(
        device: Arc<DeviceInstance>,
        shader: &ShaderModule,
        descriptor_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> Result<Self> {
        if shader.stage() != vk::ShaderStageFlags::COMPUTE {
            return Err(EngineError::ShaderCompile(format!(
                "compute pipeline given a {:?} shader",
                shader.stage()
            ))
            .into());
        }

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(descriptor_layouts)
            .push_constant_ranges(push_constant_ranges);
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create compute pipeline layout")?;

        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader.handle())
            .name(ENTRY_POINT)
            .build();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();

        let pipeline = match unsafe {
            device
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        } {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(e).context("Failed to create compute pipeline");
            }
        };

        Ok(Self { device, layout, pipeline })
    }
}

impl Drop for ComputePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(samples: vk::SampleCountFlags) -> AttachmentLayout {
        AttachmentLayout {
            color_format: vk::Format::B8G8R8A8_SRGB,
            depth_format: vk::Format::D32_SFLOAT,
            samples,
        }
    }

    #[test]
    fn three_attachments_in_fixed_order() {
        let attachments = attachment_descriptions(&layout(vk::SampleCountFlags::TYPE_4));
        assert_eq!(attachments[MULTISAMPLE_ATTACHMENT as usize].samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(attachments[DEPTH_ATTACHMENT as usize].format, vk::Format::D32_SFLOAT);
        assert_eq!(attachments[DEPTH_ATTACHMENT as usize].samples, vk::SampleCountFlags::TYPE_4);
        let resolve = attachments[RESOLVE_ATTACHMENT as usize];
        assert_eq!(resolve.samples, vk::SampleCountFlags::TYPE_1);
        assert_eq!(resolve.final_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(resolve.store_op, vk::AttachmentStoreOp::STORE);
    }

    #[test]
    fn single_sample_keeps_shape_and_clears_swapchain_image() {
        let attachments = attachment_descriptions(&layout(vk::SampleCountFlags::TYPE_1));
        assert_eq!(attachments.len(), 3);
        assert_eq!(attachments[RESOLVE_ATTACHMENT as usize].load_op, vk::AttachmentLoadOp::CLEAR);
    }

    #[test]
    fn external_dependency_waits_for_colour_output() {
        let dep = external_dependency();
        assert_eq!(dep.src_subpass, vk::SUBPASS_EXTERNAL);
        assert_eq!(dep.dst_subpass, 0);
        assert!(dep.src_stage_mask.contains(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT));
        assert!(dep.dst_access_mask.contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
    }

    #[test]
    fn external_dependency_makes_shared_attachment_writes_available() {
        let dep = external_dependency();
        assert!(dep.src_stage_mask.contains(vk::PipelineStageFlags::LATE_FRAGMENT_TESTS));
        assert!(dep
            .src_access_mask
            .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE));
        assert!(dep.dst_stage_mask.contains(vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS));
    }

    #[test]
    fn mismatched_targets_are_rejected() {
        let expected = layout(vk::SampleCountFlags::TYPE_4);
        assert!(check_attachments(&expected, &expected).is_ok());

        let found = layout(vk::SampleCountFlags::TYPE_2);
        let err = check_attachments(&expected, &found).unwrap_err();
        assert!(matches!(err, EngineError::AttachmentMismatch { .. }));

        let found = AttachmentLayout {
            color_format: vk::Format::R8G8B8A8_UNORM,
            ..expected
        };
        assert!(check_attachments(&expected, &found).is_err());
    }
}
