// Framebuffers - one per swapchain image
//
// Each framebuffer shares the multisample and depth views and binds its own
// swapchain view as the resolve target.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::pipeline::{check_attachments, GraphicsPipeline};
use super::swapchain::WindowIntegration;
use super::DeviceInstance;

pub struct FrameBufferSet {
    device: Arc<DeviceInstance>,
    framebuffers: Vec<vk::Framebuffer>,
    extent: vk::Extent2D,
}

impl FrameBufferSet {
    pub fn new(device: Arc<DeviceInstance>, pipeline: &GraphicsPipeline, window: &WindowIntegration) -> Result<Self> {
        check_attachments(pipeline.attachments(), &window.attachment_layout())?;

        let extent = window.extent();
        let mut set = Self {
            device,
            framebuffers: Vec::with_capacity(window.image_views().len()),
            extent,
        };

        for &image_view in window.image_views() {
            let attachments = [window.multisample_view(), window.depth_view(), image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(pipeline.render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            // On failure `set` drops and frees what was already created
            let framebuffer = unsafe { set.device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            set.framebuffers.push(framebuffer);
        }

        Ok(set)
    }

    /// Framebuffer for an acquired swapchain image index.
    pub fn get(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    pub fn len(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.framebuffers.is_empty()
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn destroy(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
        }
    }
}

impl Drop for FrameBufferSet {
    fn drop(&mut self) {
        self.destroy();
    }
}
