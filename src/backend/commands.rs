// Command pool and one-shot submission
//
// The renderer keeps one resettable pool on the graphics queue. Per-image
// command buffers come from it, and so do the short-lived buffers used for
// uploads, which are submitted with their own fence and waited on.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::device::{DeviceInstance, QueueRef};

pub struct CommandPool {
    device: Arc<DeviceInstance>,
    pool: vk::CommandPool,
    queue: QueueRef,
}

impl CommandPool {
    pub fn new(device: Arc<DeviceInstance>, queue: QueueRef) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(queue.family_index)
            // RESET: per-image buffers are re-recorded every frame
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self { device, pool, queue })
    }

    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub fn queue(&self) -> QueueRef {
        self.queue
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    pub fn free(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() || self.pool == vk::CommandPool::null() {
            return;
        }
        unsafe { self.device.device.free_command_buffers(self.pool, buffers) };
    }

    /// Record `record` into a fresh buffer, submit it and block until the GPU
    /// has finished with it.
    pub fn submit_and_wait<F>(&self, record: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = &self.device.device;
        let cmd = self.allocate(1)?[0];

        let result = (|| -> Result<()> {
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            unsafe { device.begin_command_buffer(cmd, &begin_info) }?;

            record(device, cmd);

            unsafe { device.end_command_buffer(cmd) }?;

            let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) }
                .context("Failed to create upload fence")?;

            let command_buffers = [cmd];
            let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
            let submitted = unsafe {
                device
                    .queue_submit(self.queue.queue, &[submit_info.build()], fence)
                    .and_then(|_| device.wait_for_fences(&[fence], true, u64::MAX))
            };
            unsafe { device.destroy_fence(fence, None) };
            submitted.context("One-shot submission failed")
        })();

        self.free(&[cmd]);
        result
    }

    pub fn destroy(&mut self) {
        if self.pool != vk::CommandPool::null() {
            unsafe { self.device.device.destroy_command_pool(self.pool, None) };
            self.pool = vk::CommandPool::null();
        }
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        self.destroy();
    }
}
