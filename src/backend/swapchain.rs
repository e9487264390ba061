// Swapchain - Window presentation
//
// WindowIntegration owns the surface, the swapchain, one view per image and
// the shared depth / multisample targets sized to the current extent.
// Everything except the surface is rebuilt wholesale on resize.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::buffer::{ImageDesc, SimpleImage};
use super::device::{DeviceInstance, QueueRef};
use super::pipeline::AttachmentLayout;
use super::surface;
use crate::error::EngineError;
use crate::teardown::{self, Stage, Teardown};

const PREFERRED_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// User-facing knobs for swapchain creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPreferences {
    pub image_count: u32,
    /// `None` = lowest-latency non-tearing mode available.
    pub present_mode: Option<vk::PresentModeKHR>,
    pub msaa_samples: u32,
}

impl Default for SwapchainPreferences {
    fn default() -> Self {
        Self {
            image_count: 3,
            present_mode: None,
            msaa_samples: 4,
        }
    }
}

/// Clamp the preferred count into the surface's [min, max]; max 0 is unbounded.
pub fn choose_image_count(preferred: u32, min: u32, max: u32) -> u32 {
    let count = preferred.max(min);
    if max > 0 {
        count.min(max)
    } else {
        count
    }
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR, EngineError> {
    formats
        .iter()
        .copied()
        .find(|f| f.format == PREFERRED_FORMAT.format && f.color_space == PREFERRED_FORMAT.color_space)
        .or_else(|| formats.first().copied())
        .ok_or(EngineError::NoSurfaceFormat)
}

/// Configured mode if offered, else MAILBOX, else FIFO (always supported).
pub fn choose_present_mode(available: &[vk::PresentModeKHR], preferred: Option<vk::PresentModeKHR>) -> vk::PresentModeKHR {
    preferred
        .into_iter()
        .chain([vk::PresentModeKHR::MAILBOX])
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_size: (u32, u32)) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer_size.0.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer_size.1.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Highest supported sample count not above `requested`, at least one.
pub fn clamp_sample_count(requested: u32, supported: vk::SampleCountFlags) -> vk::SampleCountFlags {
    [
        vk::SampleCountFlags::TYPE_64,
        vk::SampleCountFlags::TYPE_32,
        vk::SampleCountFlags::TYPE_16,
        vk::SampleCountFlags::TYPE_8,
        vk::SampleCountFlags::TYPE_4,
        vk::SampleCountFlags::TYPE_2,
    ]
    .into_iter()
    .find(|&count| count.as_raw() <= requested && supported.contains(count))
    .unwrap_or(vk::SampleCountFlags::TYPE_1)
}

/// A failed support query is a Vulkan error, not a "no".
fn check_present_support(supported: Result<bool, vk::Result>, family: u32) -> Result<()> {
    let supported = supported.context("Failed to query surface presentation support")?;
    if !supported {
        return Err(EngineError::PresentationUnsupported { family }.into());
    }
    Ok(())
}

/// Everything negotiated against the surface for one swapchain build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainPlan {
    pub image_count: u32,
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
}

impl SwapchainPlan {
    pub fn choose(
        caps: &vk::SurfaceCapabilitiesKHR,
        formats: &[vk::SurfaceFormatKHR],
        present_modes: &[vk::PresentModeKHR],
        framebuffer_size: (u32, u32),
        prefs: &SwapchainPreferences,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            image_count: choose_image_count(prefs.image_count, caps.min_image_count, caps.max_image_count),
            format: choose_surface_format(formats)?,
            present_mode: choose_present_mode(present_modes, prefs.present_mode),
            extent: choose_extent(caps, framebuffer_size),
        })
    }
}

/// Result of asking the presentation engine for an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquired {
    Image { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    OutOfDate,
}

impl PresentStatus {
    pub fn needs_recreate(self) -> bool {
        self != PresentStatus::Optimal
    }
}

pub struct WindowIntegration {
    device: Arc<DeviceInstance>,
    surface_loader: khr::Surface,
    surface: vk::SurfaceKHR,
    swapchain_loader: khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth: Option<SimpleImage>,
    multisample: Option<SimpleImage>,
    plan: SwapchainPlan,
    depth_format: vk::Format,
    samples: vk::SampleCountFlags,
    present_queue: QueueRef,
    prefs: SwapchainPreferences,
}

impl WindowIntegration {
    /// Create the surface and the first swapchain for a window.
    ///
    /// # Safety
    /// The window behind the handles must outlive the returned object.
    pub unsafe fn new(
        device: Arc<DeviceInstance>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        framebuffer_size: (u32, u32),
        present_queue: QueueRef,
        prefs: SwapchainPreferences,
    ) -> Result<Self> {
        let surface_loader = khr::Surface::new(&device.entry, &device.instance);
        let surface = surface::create_surface(&device.entry, &device.instance, display, window)?;

        let supported = surface_loader.get_physical_device_surface_support(
            device.physical_device,
            present_queue.family_index,
            surface,
        );
        if let Err(e) = check_present_support(supported, present_queue.family_index) {
            surface_loader.destroy_surface(surface, None);
            return Err(e);
        }

        let depth_format = match device.find_depth_format() {
            Ok(format) => format,
            Err(e) => {
                surface_loader.destroy_surface(surface, None);
                return Err(e);
            }
        };
        let samples = clamp_sample_count(prefs.msaa_samples, device.supported_sample_counts());
        let swapchain_loader = khr::Swapchain::new(&device.instance, &device.device);

        let mut integration = Self {
            device,
            surface_loader,
            surface,
            swapchain_loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth: None,
            multisample: None,
            plan: SwapchainPlan {
                image_count: 0,
                format: PREFERRED_FORMAT,
                present_mode: vk::PresentModeKHR::FIFO,
                extent: vk::Extent2D::default(),
            },
            depth_format,
            samples,
            present_queue,
            prefs,
        };

        // Drop cleans up the surface if this fails
        integration.create_swapchain_objects(framebuffer_size)?;
        Ok(integration)
    }

    fn query_plan(&self, framebuffer_size: (u32, u32)) -> Result<(SwapchainPlan, vk::SurfaceCapabilitiesKHR)> {
        let pd = self.device.physical_device;
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(pd, self.surface)
        }
        .context("Failed to query surface capabilities")?;
        let formats = unsafe { self.surface_loader.get_physical_device_surface_formats(pd, self.surface) }
            .context("Failed to query surface formats")?;
        let present_modes = unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(pd, self.surface)
        }
        .context("Failed to query present modes")?;

        log::debug!(
            "Surface caps: images {}..{}, current extent {:?}",
            caps.min_image_count,
            caps.max_image_count,
            caps.current_extent
        );

        let plan = SwapchainPlan::choose(&caps, &formats, &present_modes, framebuffer_size, &self.prefs)?;
        Ok((plan, caps))
    }

    fn create_swapchain_objects(&mut self, framebuffer_size: (u32, u32)) -> Result<()> {
        let (plan, caps) = self.query_plan(framebuffer_size)?;

        log::info!(
            "Creating swapchain: {}x{}, {} images, {:?}",
            plan.extent.width,
            plan.extent.height,
            plan.image_count,
            plan.present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(plan.image_count)
            .image_format(plan.format.format)
            .image_color_space(plan.format.color_space)
            .image_extent(plan.extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(plan.present_mode)
            .clipped(true);

        self.swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;
        self.plan = plan;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(self.swapchain) }
            .context("Failed to get swapchain images")?;

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(plan.format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            self.image_views.push(view);
        }

        self.depth = Some(SimpleImage::new(
            self.device.clone(),
            ImageDesc::depth(plan.extent, self.depth_format, self.samples),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?);
        self.multisample = Some(SimpleImage::new(
            self.device.clone(),
            ImageDesc::multisample_color(plan.extent, plan.format.format, self.samples),
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?);

        log::info!("Created swapchain with {} images", self.images.len());
        Ok(())
    }

    /// Rebuild for a new framebuffer size.
    ///
    /// The caller must have waited for the device to go idle and must destroy
    /// its framebuffers after this tears the old swapchain down.
    pub fn recreate(&mut self, framebuffer_size: (u32, u32)) -> Result<()> {
        teardown::run(self, &WINDOW_RECREATE_ORDER);
        self.create_swapchain_objects(framebuffer_size)
    }

    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<Acquired> {
        let result = unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => Ok(Acquired::Image { index, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Acquired::OutOfDate),
            Err(e) => Err(e).context("Failed to acquire swapchain image"),
        }
    }

    pub fn present(&self, queue: vk::Queue, image_index: u32, wait_semaphores: &[vk::Semaphore]) -> Result<PresentStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentStatus::Optimal),
            Ok(true) => Ok(PresentStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::OutOfDate),
            Err(e) => Err(e).context("Failed to present"),
        }
    }

    pub fn attachment_layout(&self) -> AttachmentLayout {
        AttachmentLayout {
            color_format: self.plan.format.format,
            depth_format: self.depth_format,
            samples: self.samples,
        }
    }

    pub fn plan(&self) -> &SwapchainPlan {
        &self.plan
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.plan.extent
    }

    pub fn format(&self) -> vk::Format {
        self.plan.format.format
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_views(&self) -> &[vk::ImageView] {
        &self.image_views
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.as_ref().map_or(vk::ImageView::null(), |d| d.view())
    }

    pub fn multisample_view(&self) -> vk::ImageView {
        self.multisample.as_ref().map_or(vk::ImageView::null(), |m| m.view())
    }

    pub fn samples(&self) -> vk::SampleCountFlags {
        self.samples
    }

    pub fn present_queue(&self) -> QueueRef {
        self.present_queue
    }
}

const WINDOW_RECREATE_ORDER: [Stage; 4] = [
    Stage::ImageViews,
    Stage::DepthImage,
    Stage::MultisampleImage,
    Stage::Swapchain,
];

impl Teardown for WindowIntegration {
    fn destroy_stage(&mut self, stage: Stage) {
        match stage {
            Stage::ImageViews => {
                for view in self.image_views.drain(..) {
                    unsafe { self.device.device.destroy_image_view(view, None) };
                }
            }
            Stage::DepthImage => self.depth = None,
            Stage::MultisampleImage => self.multisample = None,
            Stage::Swapchain => {
                if self.swapchain != vk::SwapchainKHR::null() {
                    unsafe { self.swapchain_loader.destroy_swapchain(self.swapchain, None) };
                    self.swapchain = vk::SwapchainKHR::null();
                }
                // Images belong to the swapchain
                self.images.clear();
            }
            Stage::Surface => {
                if self.surface != vk::SurfaceKHR::null() {
                    unsafe { self.surface_loader.destroy_surface(self.surface, None) };
                    self.surface = vk::SurfaceKHR::null();
                }
            }
            _ => {}
        }
    }
}

impl Drop for WindowIntegration {
    fn drop(&mut self) {
        teardown::run(self, &teardown::WINDOW_ORDER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D { width: 800, height: 600 },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D { width: 4096, height: 4096 },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_stays_within_bounds() {
        for min in 1..=8 {
            for max in [0, 8, 9, 16] {
                let count = choose_image_count(3, min, max);
                assert!(count >= min, "min {min} max {max} -> {count}");
                assert!(count <= 3.max(min));
                if max > 0 {
                    assert!(count <= max);
                }
            }
        }
    }

    #[test]
    fn image_count_targets_three() {
        assert_eq!(choose_image_count(3, 2, 0), 3);
        assert_eq!(choose_image_count(3, 2, 2), 2);
        assert_eq!(choose_image_count(3, 4, 8), 4);
    }

    #[test]
    fn prefers_srgb_bgra_else_first_format() {
        let other = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(&[other, PREFERRED_FORMAT]).unwrap(), PREFERRED_FORMAT);
        assert_eq!(choose_surface_format(&[other]).unwrap(), other);
        assert!(matches!(choose_surface_format(&[]), Err(EngineError::NoSurfaceFormat)));
    }

    #[test]
    fn present_mode_prefers_configured_then_mailbox_then_fifo() {
        use vk::PresentModeKHR as P;
        let all = [P::FIFO, P::MAILBOX, P::IMMEDIATE];
        assert_eq!(choose_present_mode(&all, None), P::MAILBOX);
        assert_eq!(choose_present_mode(&all, Some(P::IMMEDIATE)), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE], None), P::FIFO);
        assert_eq!(choose_present_mode(&[P::FIFO], Some(P::IMMEDIATE)), P::FIFO);
    }

    #[test]
    fn extent_uses_surface_value_unless_sentinel() {
        let c = caps(2, 3);
        assert_eq!(choose_extent(&c, (1920, 1080)), vk::Extent2D { width: 800, height: 600 });

        let mut c = caps(2, 3);
        c.current_extent = vk::Extent2D { width: u32::MAX, height: u32::MAX };
        assert_eq!(choose_extent(&c, (1920, 1080)), vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!(choose_extent(&c, (10_000, 0)), vk::Extent2D { width: 4096, height: 1 });
    }

    #[test]
    fn sample_count_clamps_to_supported() {
        let supported = vk::SampleCountFlags::TYPE_1 | vk::SampleCountFlags::TYPE_2 | vk::SampleCountFlags::TYPE_4;
        assert_eq!(clamp_sample_count(8, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_sample_count(4, supported), vk::SampleCountFlags::TYPE_4);
        assert_eq!(clamp_sample_count(3, supported), vk::SampleCountFlags::TYPE_2);
        assert_eq!(clamp_sample_count(1, supported), vk::SampleCountFlags::TYPE_1);
        assert_eq!(clamp_sample_count(0, supported), vk::SampleCountFlags::TYPE_1);
    }

    #[test]
    fn replanning_with_same_inputs_is_idempotent() {
        let c = caps(2, 8);
        let formats = [PREFERRED_FORMAT];
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        let prefs = SwapchainPreferences::default();
        let first = SwapchainPlan::choose(&c, &formats, &modes, (800, 600), &prefs).unwrap();
        let second = SwapchainPlan::choose(&c, &formats, &modes, (800, 600), &prefs).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.image_count, 3);
    }

    #[test]
    fn present_support_query_failure_is_not_reported_as_unsupported() {
        let lost = check_present_support(Err(vk::Result::ERROR_SURFACE_LOST_KHR), 2).unwrap_err();
        assert!(!crate::error::is_engine_error(&lost, |e| matches!(
            e,
            EngineError::PresentationUnsupported { .. }
        )));
        assert_eq!(lost.root_cause().downcast_ref::<vk::Result>(), Some(&vk::Result::ERROR_SURFACE_LOST_KHR));

        let unsupported = check_present_support(Ok(false), 2).unwrap_err();
        assert!(crate::error::is_engine_error(&unsupported, |e| matches!(
            e,
            EngineError::PresentationUnsupported { family: 2 }
        )));

        assert!(check_present_support(Ok(true), 2).is_ok());
    }

    #[test]
    fn only_optimal_present_keeps_swapchain() {
        assert!(!PresentStatus::Optimal.needs_recreate());
        assert!(PresentStatus::Suboptimal.needs_recreate());
        assert!(PresentStatus::OutOfDate.needs_recreate());
    }
}
