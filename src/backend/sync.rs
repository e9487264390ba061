// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync, plus the buffer barrier
// every host upload must record before its first consumer.

use anyhow::{Context, Result};
use ash::vk;

use super::DeviceInstance;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
}

impl FrameSync {
    pub fn new(device: &DeviceInstance) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder()
            .flags(vk::FenceCreateFlags::SIGNALED); // First wait must not block

        unsafe {
            let image_available = device.device.create_semaphore(&semaphore_info, None)
                .context("Failed to create semaphore")?;
            let render_finished = match device.device.create_semaphore(&semaphore_info, None) {
                Ok(s) => s,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    return Err(e).context("Failed to create semaphore");
                }
            };
            let in_flight_fence = match device.device.create_fence(&fence_info, None) {
                Ok(f) => f,
                Err(e) => {
                    device.device.destroy_semaphore(image_available, None);
                    device.device.destroy_semaphore(render_finished, None);
                    return Err(e).context("Failed to create fence");
                }
            };

            Ok(Self {
                image_available,
                render_finished,
                in_flight_fence,
            })
        }
    }

    /// One set per frame slot.
    pub fn ring(device: &DeviceInstance, frames_in_flight: usize) -> Result<Vec<Self>> {
        let mut slots = Vec::with_capacity(frames_in_flight);
        for _ in 0..frames_in_flight {
            match Self::new(device) {
                Ok(sync) => slots.push(sync),
                Err(e) => {
                    for sync in &slots {
                        sync.destroy(&device.device);
                    }
                    return Err(e);
                }
            }
        }
        Ok(slots)
    }

    /// Block until the GPU signals this slot's fence. No timeout: a fence that
    /// never signals means the device is lost and the run is over anyway.
    pub fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight_fence], true, u64::MAX) }
            .context("Waiting on frame fence failed")
    }

    pub fn reset(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.reset_fences(&[self.in_flight_fence]) }.context("Failed to reset frame fence")
    }

    pub fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

/// The access a buffer is consumed with after a transfer write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConsumer {
    pub stage: vk::PipelineStageFlags,
    pub access: vk::AccessFlags,
}

impl BufferConsumer {
    pub const VERTEX_INPUT: Self = Self {
        stage: vk::PipelineStageFlags::VERTEX_INPUT,
        access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
    };
    pub const INDEX_INPUT: Self = Self {
        stage: vk::PipelineStageFlags::VERTEX_INPUT,
        access: vk::AccessFlags::INDEX_READ,
    };
    pub const UNIFORM: Self = Self {
        stage: vk::PipelineStageFlags::from_raw(
            vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
                | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw(),
        ),
        access: vk::AccessFlags::UNIFORM_READ,
    };
    pub const HOST_READ: Self = Self {
        stage: vk::PipelineStageFlags::HOST,
        access: vk::AccessFlags::HOST_READ,
    };
    pub const COMPUTE_READ: Self = Self {
        stage: vk::PipelineStageFlags::COMPUTE_SHADER,
        access: vk::AccessFlags::SHADER_READ,
    };
}

/// Transfer-write → consumer barrier for `size` bytes of `buffer`.
pub fn upload_barrier(buffer: vk::Buffer, size: vk::DeviceSize, consumer: BufferConsumer) -> vk::BufferMemoryBarrier {
    vk::BufferMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(consumer.access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(size)
        .build()
}

/// Record the barrier between a transfer write and its first consumer.
pub fn cmd_upload_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    size: vk::DeviceSize,
    consumer: BufferConsumer,
) {
    let barrier = upload_barrier(buffer, size, consumer);
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            consumer.stage,
            vk::DependencyFlags::empty(),
            &[],
            &[barrier],
            &[],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_barrier_orders_transfer_write_before_consumer() {
        let barrier = upload_barrier(vk::Buffer::null(), 64, BufferConsumer::VERTEX_INPUT);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::VERTEX_ATTRIBUTE_READ);
        assert_eq!(barrier.size, 64);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn uniform_consumer_covers_both_shader_stages() {
        let stage = BufferConsumer::UNIFORM.stage;
        assert!(stage.contains(vk::PipelineStageFlags::VERTEX_SHADER));
        assert!(stage.contains(vk::PipelineStageFlags::FRAGMENT_SHADER));
    }
}
