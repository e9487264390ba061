// Device-backed tests. They need a Vulkan driver, so they are ignored by
// default: cargo test -- --ignored

use ash::vk;
use std::path::Path;
use std::sync::Arc;

use vk_inflight::backend::buffer::{self, SimpleBuffer, HOST_VISIBLE_COHERENT};
use vk_inflight::backend::commands::CommandPool;
use vk_inflight::backend::device::{DeviceInstance, DeviceRequirements};
use vk_inflight::backend::pipeline::ComputePipeline;
use vk_inflight::backend::shader::ShaderModule;
use vk_inflight::backend::sync::BufferConsumer;
use vk_inflight::error::{is_engine_error, EngineError};

fn headless() -> (Arc<DeviceInstance>, CommandPool) {
    let device = DeviceInstance::new(&DeviceRequirements::headless("gpu_roundtrip")).unwrap();
    let queue = device.queue(vk::QueueFlags::GRAPHICS).unwrap();
    let pool = CommandPool::new(device.clone(), queue).unwrap();
    (device, pool)
}

#[test]
#[ignore = "needs a Vulkan device"]
fn hello_world_survives_buffer_to_buffer_copy() {
    let (device, pool) = headless();
    let message = b"Hello, World!";
    let size = message.len() as vk::DeviceSize;

    let mut a = SimpleBuffer::host_visible(device.clone(), size, vk::BufferUsageFlags::TRANSFER_SRC).unwrap();
    let mut b = SimpleBuffer::host_visible(device.clone(), size, vk::BufferUsageFlags::TRANSFER_DST).unwrap();
    a.write(0, message).unwrap();

    buffer::copy_buffer(&pool, &a, &b, size, BufferConsumer::HOST_READ).unwrap();

    assert_eq!(b.read().unwrap(), message);
}

#[test]
#[ignore = "needs a Vulkan device"]
fn staged_upload_reaches_device_local_memory() {
    let (device, pool) = headless();
    let data: Vec<u8> = (0..=255).collect();

    let device_local = buffer::upload_to_device_local(
        &device,
        &pool,
        &data,
        vk::BufferUsageFlags::TRANSFER_SRC,
        BufferConsumer::HOST_READ,
    )
    .unwrap();
    assert!(device_local.properties().contains(vk::MemoryPropertyFlags::DEVICE_LOCAL));

    let mut readback =
        SimpleBuffer::host_visible(device.clone(), data.len() as u64, vk::BufferUsageFlags::TRANSFER_DST).unwrap();
    buffer::copy_buffer(&pool, &device_local, &readback, data.len() as u64, BufferConsumer::HOST_READ).unwrap();

    assert_eq!(readback.read().unwrap(), data);
}

#[test]
#[ignore = "needs a Vulkan device"]
fn headless_device_finds_graphics_queue() {
    let (device, _pool) = headless();
    let graphics = device.queue(vk::QueueFlags::GRAPHICS).unwrap();
    assert!(graphics.flags.contains(vk::QueueFlags::GRAPHICS));
    assert!(!device.info.name.is_empty());
    assert!(device
        .supported_sample_counts()
        .contains(vk::SampleCountFlags::TYPE_1));
}

#[test]
#[ignore = "needs a Vulkan device"]
fn unsatisfiable_memory_properties_are_reported() {
    let (device, _pool) = headless();
    // Lazily allocated memory is never host visible
    let impossible = HOST_VISIBLE_COHERENT | vk::MemoryPropertyFlags::LAZILY_ALLOCATED;

    let err = SimpleBuffer::new(device, 64, vk::BufferUsageFlags::TRANSFER_SRC, impossible)
        .err()
        .expect("allocation should fail");
    assert!(is_engine_error(&err, |e| matches!(e, EngineError::NoSuitableHeap { .. })));
}

#[test]
#[ignore = "needs a Vulkan device"]
fn compute_fill_writes_every_element() {
    let spv = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders/fill.comp.spv");
    if !spv.exists() {
        eprintln!("skipping: {:?} not built (glslc missing)", spv);
        return;
    }

    let (device, pool) = headless();
    let count = 256u32;
    let size = (count as usize * std::mem::size_of::<u32>()) as vk::DeviceSize;
    let mut storage = SimpleBuffer::host_visible(device.clone(), size, vk::BufferUsageFlags::STORAGE_BUFFER).unwrap();
    storage.write(0, &vec![0u8; size as usize]).unwrap();

    let raw = &device.device;
    let binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .build();
    let layout = unsafe {
        raw.create_descriptor_set_layout(
            &vk::DescriptorSetLayoutCreateInfo::builder().bindings(&[binding]),
            None,
        )
    }
    .unwrap();
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::STORAGE_BUFFER,
        descriptor_count: 1,
    }];
    let descriptor_pool = unsafe {
        raw.create_descriptor_pool(
            &vk::DescriptorPoolCreateInfo::builder()
                .max_sets(1)
                .pool_sizes(&pool_sizes),
            None,
        )
    }
    .unwrap();
    let set = unsafe {
        raw.allocate_descriptor_sets(
            &vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(descriptor_pool)
                .set_layouts(&[layout]),
        )
    }
    .unwrap()[0];
    let buffer_info = [vk::DescriptorBufferInfo {
        buffer: storage.handle(),
        offset: 0,
        range: size,
    }];
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
        .buffer_info(&buffer_info)
        .build();
    unsafe { raw.update_descriptor_sets(&[write], &[]) };

    let shader = ShaderModule::from_file(device.clone(), vk::ShaderStageFlags::COMPUTE, &spv).unwrap();
    let push_range = vk::PushConstantRange {
        stage_flags: vk::ShaderStageFlags::COMPUTE,
        offset: 0,
        size: 8,
    };
    let pipeline = ComputePipeline::new(device.clone(), &shader, &[layout], &[push_range]).unwrap();

    let push: [u32; 2] = [0xC0FFEE, count];
    pool.submit_and_wait(|d, cmd| unsafe {
        d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
        d.cmd_bind_descriptor_sets(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.layout, 0, &[set], &[]);
        d.cmd_push_constants(
            cmd,
            pipeline.layout,
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::cast_slice(&push),
        );
        d.cmd_dispatch(cmd, count.div_ceil(64), 1, 1);
        let barrier = vk::MemoryBarrier::builder()
            .src_access_mask(vk::AccessFlags::SHADER_WRITE)
            .dst_access_mask(vk::AccessFlags::HOST_READ)
            .build();
        d.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
    })
    .unwrap();

    let bytes = storage.read().unwrap();
    let values: Vec<u32> = bytes.chunks_exact(4).map(bytemuck::pod_read_unaligned).collect();
    assert_eq!(values.len(), count as usize);
    assert!(values.iter().all(|&v| v == 0xC0FFEE));

    drop(pipeline);
    unsafe {
        raw.destroy_descriptor_pool(descriptor_pool, None);
        raw.destroy_descriptor_set_layout(layout, None);
    }
}
