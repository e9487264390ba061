// Buffer and image wrappers
//
// SimpleBuffer / SimpleImage pair one Vulkan object with one dedicated
// memory allocation. Memory is allocated and bound in the constructor and
// released on drop. Nothing here tracks GPU usage: dropping or rewriting
// memory that queued work still touches is the caller's problem.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::commands::CommandPool;
use super::device::{DeviceInstance, MemoryTarget};
use super::sync::{self, BufferConsumer};

pub const HOST_VISIBLE_COHERENT: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

pub struct SimpleBuffer {
    device: Arc<DeviceInstance>,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
    mapped: Option<*mut u8>,
}

impl SimpleBuffer {
    pub fn new(
        device: Arc<DeviceInstance>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        let buffer = device.create_buffer(size, usage)?;

        let memory = match device.allocate_memory_for(MemoryTarget::Buffer(buffer), properties) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = device.bind_memory(MemoryTarget::Buffer(buffer), memory) {
            unsafe {
                device.device.destroy_buffer(buffer, None);
                device.device.free_memory(memory, None);
            }
            return Err(e);
        }

        Ok(Self {
            device,
            buffer,
            memory,
            size,
            usage,
            properties,
            mapped: None,
        })
    }

    /// Host-visible, coherent buffer for staging and read-back.
    pub fn host_visible(device: Arc<DeviceInstance>, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<Self> {
        Self::new(device, size, usage, HOST_VISIBLE_COHERENT)
    }

    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    pub fn usage(&self) -> vk::BufferUsageFlags {
        self.usage
    }

    pub fn properties(&self) -> vk::MemoryPropertyFlags {
        self.properties
    }

    /// Map the whole buffer. Repeated calls return the same mapping.
    pub fn map(&mut self) -> Result<&mut [u8]> {
        if !self.properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            anyhow::bail!("Cannot map buffer without HOST_VISIBLE memory");
        }
        let ptr = match self.mapped {
            Some(ptr) => ptr,
            None => {
                let ptr = self.device.map_memory(self.memory, 0, vk::WHOLE_SIZE)?;
                self.mapped = Some(ptr);
                ptr
            }
        };
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, self.size as usize) })
    }

    pub fn flush(&self) -> Result<()> {
        if self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            return Ok(());
        }
        self.device.flush_memory(self.memory, 0, vk::WHOLE_SIZE)
    }

    pub fn invalidate(&self) -> Result<()> {
        if self.properties.contains(vk::MemoryPropertyFlags::HOST_COHERENT) {
            return Ok(());
        }
        self.device.invalidate_memory(self.memory, 0, vk::WHOLE_SIZE)
    }

    pub fn unmap(&mut self) {
        if self.mapped.take().is_some() {
            self.device.unmap_memory(self.memory);
        }
    }

    /// map → copy → flush → unmap.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let range = write_range(offset, bytes.len(), self.size)?;
        let mapped = self.map()?;
        mapped[range].copy_from_slice(bytes);
        let flushed = self.flush();
        self.unmap();
        flushed
    }

    /// map → invalidate → copy out → unmap.
    pub fn read(&mut self) -> Result<Vec<u8>> {
        self.map()?;
        self.invalidate()?;
        let data = self.map()?.to_vec();
        self.unmap();
        Ok(data)
    }
}

impl Drop for SimpleBuffer {
    fn drop(&mut self) {
        self.unmap();
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Parameters for a 2D single-mip image plus its view.
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    pub extent: vk::Extent2D,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub samples: vk::SampleCountFlags,
    pub aspect: vk::ImageAspectFlags,
}

impl ImageDesc {
    pub fn depth(extent: vk::Extent2D, format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            samples,
            aspect: vk::ImageAspectFlags::DEPTH,
        }
    }

    /// Transient multisampled colour target that resolves into the swapchain.
    pub fn multisample_color(extent: vk::Extent2D, format: vk::Format, samples: vk::SampleCountFlags) -> Self {
        Self {
            extent,
            format,
            usage: vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSIENT_ATTACHMENT,
            samples,
            aspect: vk::ImageAspectFlags::COLOR,
        }
    }

    fn create_info(&self) -> vk::ImageCreateInfo {
        vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(self.format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(self.usage)
            .samples(self.samples)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build()
    }
}

pub struct SimpleImage {
    device: Arc<DeviceInstance>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    desc: ImageDesc,
}

impl SimpleImage {
    pub fn new(device: Arc<DeviceInstance>, desc: ImageDesc, properties: vk::MemoryPropertyFlags) -> Result<Self> {
        let image = device.create_image(&desc.create_info())?;

        let memory = match device
            .allocate_memory_for(MemoryTarget::Image(image), properties)
            .and_then(|memory| match device.bind_memory(MemoryTarget::Image(image), memory) {
                Ok(()) => Ok(memory),
                Err(e) => {
                    unsafe { device.device.free_memory(memory, None) };
                    Err(e)
                }
            }) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(desc.format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: desc.aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { device.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                unsafe {
                    device.device.destroy_image(image, None);
                    device.device.free_memory(memory, None);
                }
                return Err(e).context("Failed to create image view");
            }
        };

        Ok(Self {
            device,
            image,
            memory,
            view,
            desc,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }
}

impl Drop for SimpleImage {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_image_view(self.view, None);
            self.device.device.destroy_image(self.image, None);
            self.device.device.free_memory(self.memory, None);
        }
    }
}

/// Device-side copy of `size` bytes from `src` to `dst`, followed by a
/// barrier making the result visible to `consumer`. Blocks until done.
/// Byte range of a `len`-byte write at `offset` into a `size`-byte buffer.
fn write_range(offset: usize, len: usize, size: vk::DeviceSize) -> Result<std::ops::Range<usize>> {
    match offset.checked_add(len) {
        Some(end) if end as vk::DeviceSize <= size => Ok(offset..end),
        _ => anyhow::bail!("Write of {} bytes at {} overflows {}-byte buffer", len, offset, size),
    }
}

pub fn copy_buffer(
    pool: &CommandPool,
    src: &SimpleBuffer,
    dst: &SimpleBuffer,
    size: vk::DeviceSize,
    consumer: BufferConsumer,
) -> Result<()> {
    if size > src.size() || size > dst.size() {
        anyhow::bail!("Copy of {} bytes exceeds buffer size", size);
    }
    let (src, dst) = (src.handle(), dst.handle());
    pool.submit_and_wait(|device, cmd| unsafe {
        let region = vk::BufferCopy::builder().size(size).build();
        device.cmd_copy_buffer(cmd, src, dst, &[region]);
        sync::cmd_upload_barrier(device, cmd, dst, size, consumer);
    })
}

/// Stage `bytes` through host-visible memory into a new device-local buffer.
///
/// The copy and its transfer→consumer barrier are recorded in one command
/// buffer that is waited on before returning, so the result is safe to use
/// from any later submission.
pub fn upload_to_device_local(
    device: &Arc<DeviceInstance>,
    pool: &CommandPool,
    bytes: &[u8],
    usage: vk::BufferUsageFlags,
    consumer: BufferConsumer,
) -> Result<SimpleBuffer> {
    if bytes.is_empty() {
        anyhow::bail!("Refusing to create an empty buffer");
    }
    let size = bytes.len() as vk::DeviceSize;

    let mut staging = SimpleBuffer::host_visible(device.clone(), size, vk::BufferUsageFlags::TRANSFER_SRC)?;
    staging.write(0, bytes)?;

    let buffer = SimpleBuffer::new(
        device.clone(),
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;

    copy_buffer(pool, &staging, &buffer, size, consumer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_range_accepts_writes_up_to_the_end() {
        assert_eq!(write_range(0, 13, 13).unwrap(), 0..13);
        assert_eq!(write_range(8, 8, 16).unwrap(), 8..16);
        assert_eq!(write_range(16, 0, 16).unwrap(), 16..16);
    }

    #[test]
    fn write_range_rejects_overflowing_writes() {
        assert!(write_range(8, 9, 16).is_err());
        assert!(write_range(usize::MAX, 2, 16).is_err());
        assert!(write_range(1, usize::MAX, vk::DeviceSize::MAX).is_err());
    }
}
