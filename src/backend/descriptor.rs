// Uniform buffer descriptors
//
// One set layout with a single uniform buffer binding, and a pool holding
// one set per swapchain image.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::DeviceInstance;

pub fn create_uniform_layout(device: &DeviceInstance, stages: vk::ShaderStageFlags) -> Result<vk::DescriptorSetLayout> {
    let binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(stages)
        .build();
    let bindings = [binding];
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

    unsafe { device.device.create_descriptor_set_layout(&layout_info, None) }
        .context("Failed to create descriptor set layout")
}

pub struct UniformDescriptors {
    device: Arc<DeviceInstance>,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
}

impl UniformDescriptors {
    /// Allocate one set per buffer and point binding 0 at it.
    pub fn new(
        device: Arc<DeviceInstance>,
        layout: vk::DescriptorSetLayout,
        buffers: &[vk::Buffer],
        range: vk::DeviceSize,
    ) -> Result<Self> {
        let count = buffers.len().max(1) as u32;
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: count,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(count)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.device.create_descriptor_pool(&pool_info, None) }
            .context("Failed to create descriptor pool")?;
        let mut descriptors = Self {
            device,
            pool,
            sets: Vec::new(),
        };

        if buffers.is_empty() {
            return Ok(descriptors);
        }

        let layouts = vec![layout; buffers.len()];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);
        descriptors.sets = unsafe { descriptors.device.device.allocate_descriptor_sets(&alloc_info) }
            .context("Failed to allocate descriptor sets")?;

        for (&set, &buffer) in descriptors.sets.iter().zip(buffers) {
            let buffer_info = [vk::DescriptorBufferInfo {
                buffer,
                offset: 0,
                range,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();
            unsafe { descriptors.device.device.update_descriptor_sets(&[write], &[]) };
        }

        Ok(descriptors)
    }

    pub fn get(&self, image_index: u32) -> vk::DescriptorSet {
        self.sets[image_index as usize]
    }

    /// Destroying the pool frees its sets.
    pub fn destroy(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            unsafe { self.device.device.destroy_descriptor_pool(self.pool, None) };
            self.pool = vk::DescriptorPool::null();
            self.sets.clear();
        }
    }
}

impl Drop for UniformDescriptors {
    fn drop(&mut self) {
        self.destroy();
    }
}
