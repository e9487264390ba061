// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with validation layers
// - Physical device ranking (prefer discrete GPU, then newer API)
// - Logical device with one queue per distinct requested family
// - Raw buffer/image/memory primitives (dedicated allocations only)

use anyhow::{Context, Result};
use ash::{vk, Entry};
use std::cmp::Ordering;
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Arc;

use super::memory;
use crate::error::EngineError;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Device features the engine can require. Anything not listed stays disabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequiredFeatures {
    pub sampler_anisotropy: bool,
    pub fill_mode_non_solid: bool,
    pub wide_lines: bool,
    pub sample_rate_shading: bool,
}

impl RequiredFeatures {
    pub fn supported_by(&self, features: &vk::PhysicalDeviceFeatures) -> bool {
        let ok = |wanted: bool, have: vk::Bool32| !wanted || have == vk::TRUE;
        ok(self.sampler_anisotropy, features.sampler_anisotropy)
            && ok(self.fill_mode_non_solid, features.fill_mode_non_solid)
            && ok(self.wide_lines, features.wide_lines)
            && ok(self.sample_rate_shading, features.sample_rate_shading)
    }

    pub fn to_vk(self) -> vk::PhysicalDeviceFeatures {
        let flag = |b: bool| if b { vk::TRUE } else { vk::FALSE };
        vk::PhysicalDeviceFeatures {
            sampler_anisotropy: flag(self.sampler_anisotropy),
            fill_mode_non_solid: flag(self.fill_mode_non_solid),
            wide_lines: flag(self.wide_lines),
            sample_rate_shading: flag(self.sample_rate_shading),
            ..Default::default()
        }
    }
}

/// Everything `DeviceInstance::new` needs to know up front.
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    pub app_name: String,
    pub enable_validation: bool,
    /// Extra instance extensions (surface extensions for windowed use).
    pub instance_extensions: Vec<&'static CStr>,
    pub device_extensions: Vec<&'static CStr>,
    pub features: RequiredFeatures,
    pub queue_capabilities: Vec<vk::QueueFlags>,
}

impl DeviceRequirements {
    /// Surface-free device with a graphics queue, for offline work and tests.
    pub fn headless(app_name: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            enable_validation: false,
            instance_extensions: Vec::new(),
            device_extensions: Vec::new(),
            features: RequiredFeatures::default(),
            queue_capabilities: vec![vk::QueueFlags::GRAPHICS],
        }
    }
}

/// Snapshot of a physical device taken during enumeration. Never mutated.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub limits: vk::PhysicalDeviceLimits,
    pub extensions: Vec<CString>,
}

impl PhysicalDeviceInfo {
    fn query(instance: &ash::Instance, handle: vk::PhysicalDevice) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .context("Failed to enumerate device extensions")?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect();

        Ok(Self {
            handle,
            name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            api_version: properties.api_version,
            queue_families: unsafe {
                instance.get_physical_device_queue_family_properties(handle)
            },
            memory: unsafe { instance.get_physical_device_memory_properties(handle) },
            features: unsafe { instance.get_physical_device_features(handle) },
            limits: properties.limits,
            extensions,
        })
    }

    fn supports_extensions(&self, wanted: &[&CStr]) -> bool {
        wanted
            .iter()
            .all(|w| self.extensions.iter().any(|have| have.as_c_str() == *w))
    }
}

fn device_type_rank(device_type: vk::PhysicalDeviceType) -> u8 {
    match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 0,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 2,
        vk::PhysicalDeviceType::CPU => 3,
        _ => 4,
    }
}

/// Sort devices best-first. Stable, so equal devices keep enumeration order.
pub fn rank_devices(devices: &mut [PhysicalDeviceInfo]) {
    devices.sort_by(|a, b| compare_devices(a.device_type, a.api_version, b.device_type, b.api_version));
}

fn compare_devices(
    a_type: vk::PhysicalDeviceType,
    a_api: u32,
    b_type: vk::PhysicalDeviceType,
    b_api: u32,
) -> Ordering {
    device_type_rank(a_type)
        .cmp(&device_type_rank(b_type))
        .then_with(|| b_api.cmp(&a_api))
}

/// A queue-create request for one family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueuePlan {
    pub family_index: u32,
    pub flags: vk::QueueFlags,
}

/// Map requested capabilities onto queue families, one request per family.
pub fn plan_queues(
    families: &[vk::QueueFamilyProperties],
    requested: &[vk::QueueFlags],
) -> Result<Vec<QueuePlan>, EngineError> {
    let mut plans: Vec<QueuePlan> = Vec::new();

    for &capability in requested {
        let (index, family) = families
            .iter()
            .enumerate()
            .find(|(_, f)| f.queue_count > 0 && f.queue_flags.contains(capability))
            .ok_or(EngineError::UnsupportedQueue { capability })?;

        let family_index = index as u32;
        if !plans.iter().any(|p| p.family_index == family_index) {
            plans.push(QueuePlan {
                family_index,
                flags: family.queue_flags,
            });
        }
    }

    Ok(plans)
}

/// A queue fetched from the logical device.
///
/// `flags` are the capabilities of the whole family, so a queue requested
/// for graphics also answers lookups for compute/transfer when the family
/// supports them. Submissions to one queue must be serialized by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueRef {
    pub family_index: u32,
    pub flags: vk::QueueFlags,
    pub queue: vk::Queue,
}

/// First queue whose family flags intersect `flags`.
pub fn find_queue(queues: &[QueueRef], flags: vk::QueueFlags) -> Option<QueueRef> {
    queues.iter().copied().find(|q| q.flags.intersects(flags))
}

/// What a dedicated allocation is for.
#[derive(Debug, Clone, Copy)]
pub enum MemoryTarget {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

struct DebugMessenger {
    loader: ash::extensions::ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

/// Vulkan device context. Shared as `Arc<DeviceInstance>` by everything that
/// owns GPU objects, so it is always the last thing destroyed.
pub struct DeviceInstance {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    queues: Vec<QueueRef>,
    debug_messenger: Option<DebugMessenger>,

    pub info: PhysicalDeviceInfo,
}

impl DeviceInstance {
    /// Create the instance, pick a GPU and open a logical device on it.
    pub fn new(requirements: &DeviceRequirements) -> Result<Arc<Self>> {
        log::info!("Creating Vulkan device: {}", requirements.app_name);

        let entry = unsafe { Entry::load() }
            .context("Failed to load Vulkan library. Is Vulkan installed?")?;

        let validation = requirements.enable_validation && Self::validation_available(&entry);
        if requirements.enable_validation && !validation {
            log::warn!("Validation layer requested but not installed, continuing without it");
        }

        let instance = Self::create_instance(&entry, requirements, validation)?;

        let debug_messenger = if validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let picked = Self::pick_physical_device(&instance, requirements).and_then(|info| {
            let plans = plan_queues(&info.queue_families, &requirements.queue_capabilities)?;
            let (device, queues) =
                Self::create_logical_device(&instance, &info, &plans, requirements)?;
            Ok((info, device, queues))
        });

        let (info, device, queues) = match picked {
            Ok(picked) => picked,
            Err(e) => {
                unsafe {
                    if let Some(debug) = &debug_messenger {
                        debug.loader.destroy_debug_utils_messenger(debug.messenger, None);
                    }
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        log::info!("Selected GPU: {} ({:?})", info.name, info.device_type);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(info.api_version),
            vk::api_version_minor(info.api_version),
            vk::api_version_patch(info.api_version)
        );
        for q in &queues {
            log::debug!("Queue family {}: {:?}", q.family_index, q.flags);
        }

        Ok(Arc::new(Self {
            device,
            physical_device: info.handle,
            instance,
            entry,
            queues,
            debug_messenger,
            info,
        }))
    }

    fn validation_available(entry: &Entry) -> bool {
        entry
            .enumerate_instance_layer_properties()
            .map(|layers| {
                layers.iter().any(|l| {
                    (unsafe { CStr::from_ptr(l.layer_name.as_ptr()) }) == VALIDATION_LAYER
                })
            })
            .unwrap_or(false)
    }

    fn create_instance(
        entry: &Entry,
        requirements: &DeviceRequirements,
        validation: bool,
    ) -> Result<ash::Instance> {
        let app_name_cstr = CString::new(requirements.app_name.as_str())?;
        let engine_name = CString::new("vk-inflight")?;

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let mut extensions: Vec<*const c_char> = requirements
            .instance_extensions
            .iter()
            .map(|e| e.as_ptr())
            .collect();
        if validation {
            extensions.push(ash::extensions::ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }
            .context("Failed to create Vulkan instance")
    }

    fn setup_debug_messenger(entry: &Entry, instance: &ash::Instance) -> Result<DebugMessenger> {
        let loader = ash::extensions::ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { loader.create_debug_utils_messenger(&create_info, None) }
            .context("Failed to create debug messenger")?;

        Ok(DebugMessenger { loader, messenger })
    }

    fn pick_physical_device(
        instance: &ash::Instance,
        requirements: &DeviceRequirements,
    ) -> Result<PhysicalDeviceInfo> {
        let handles = unsafe { instance.enumerate_physical_devices() }
            .context("Failed to enumerate physical devices")?;

        if handles.is_empty() {
            return Err(EngineError::NoDevice.into());
        }

        let mut candidates = Vec::with_capacity(handles.len());
        for handle in handles {
            let info = PhysicalDeviceInfo::query(instance, handle)?;
            if !requirements.features.supported_by(&info.features) {
                log::debug!("Skipping {}: missing required features", info.name);
                continue;
            }
            if !info.supports_extensions(&requirements.device_extensions) {
                log::debug!("Skipping {}: missing device extensions", info.name);
                continue;
            }
            if let Err(e) = plan_queues(&info.queue_families, &requirements.queue_capabilities) {
                log::debug!("Skipping {}: {}", info.name, e);
                continue;
            }
            candidates.push(info);
        }

        rank_devices(&mut candidates);
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::NoSuitableDevice.into())
    }

    fn create_logical_device(
        instance: &ash::Instance,
        info: &PhysicalDeviceInfo,
        plans: &[QueuePlan],
        requirements: &DeviceRequirements,
    ) -> Result<(ash::Device, Vec<QueueRef>)> {
        let queue_priorities = [1.0];
        let queue_create_infos: Vec<_> = plans
            .iter()
            .map(|plan| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(plan.family_index)
                    .queue_priorities(&queue_priorities)
                    .build()
            })
            .collect();

        let extensions: Vec<*const c_char> = requirements
            .device_extensions
            .iter()
            .map(|e| e.as_ptr())
            .collect();
        let features = requirements.features.to_vk();

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(info.handle, &create_info, None) }
            .context("Failed to create logical device")?;

        let queues = plans
            .iter()
            .map(|plan| QueueRef {
                family_index: plan.family_index,
                flags: plan.flags,
                queue: unsafe { device.get_device_queue(plan.family_index, 0) },
            })
            .collect();

        Ok((device, queues))
    }

    /// First created queue whose family supports any of `flags`.
    pub fn queue(&self, flags: vk::QueueFlags) -> Option<QueueRef> {
        find_queue(&self.queues, flags)
    }

    pub fn queues(&self) -> &[QueueRef] {
        &self.queues
    }

    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.info.memory
    }

    pub fn find_memory_type(&self, type_bits: u32, required: vk::MemoryPropertyFlags) -> Result<u32> {
        Ok(memory::find_memory_type(&self.info.memory, type_bits, required)?)
    }

    pub fn create_buffer(&self, size: vk::DeviceSize, usage: vk::BufferUsageFlags) -> Result<vk::Buffer> {
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        unsafe { self.device.create_buffer(&buffer_info, None) }.context("Failed to create buffer")
    }

    pub fn create_image(&self, info: &vk::ImageCreateInfo) -> Result<vk::Image> {
        unsafe { self.device.create_image(info, None) }.context("Failed to create image")
    }

    /// Allocate dedicated memory sized for `target` from the first matching heap.
    pub fn allocate_memory_for(
        &self,
        target: MemoryTarget,
        required: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let requirements = unsafe {
            match target {
                MemoryTarget::Buffer(buffer) => self.device.get_buffer_memory_requirements(buffer),
                MemoryTarget::Image(image) => self.device.get_image_memory_requirements(image),
            }
        };

        let memory_type_index = self.find_memory_type(requirements.memory_type_bits, required)?;

        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        unsafe { self.device.allocate_memory(&alloc_info, None) }
            .context("Failed to allocate device memory")
    }

    pub fn bind_memory(&self, target: MemoryTarget, memory: vk::DeviceMemory) -> Result<()> {
        unsafe {
            match target {
                MemoryTarget::Buffer(buffer) => self.device.bind_buffer_memory(buffer, memory, 0),
                MemoryTarget::Image(image) => self.device.bind_image_memory(image, memory, 0),
            }
        }
        .context("Failed to bind memory")
    }

    pub fn map_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<*mut u8> {
        let ptr = unsafe {
            self.device
                .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())
        }
        .context("Failed to map memory")?;
        Ok(ptr as *mut u8)
    }

    pub fn unmap_memory(&self, memory: vk::DeviceMemory) {
        unsafe { self.device.unmap_memory(memory) }
    }

    /// Make host writes visible to the device (needed for non-coherent memory).
    pub fn flush_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
        let range = vk::MappedMemoryRange::builder()
            .memory(memory)
            .offset(offset)
            .size(size)
            .build();
        unsafe { self.device.flush_mapped_memory_ranges(&[range]) }
            .context("Failed to flush mapped memory")
    }

    /// Make device writes visible to the host (needed for non-coherent memory).
    pub fn invalidate_memory(&self, memory: vk::DeviceMemory, offset: vk::DeviceSize, size: vk::DeviceSize) -> Result<()> {
        let range = vk::MappedMemoryRange::builder()
            .memory(memory)
            .offset(offset)
            .size(size)
            .build();
        unsafe { self.device.invalidate_mapped_memory_ranges(&[range]) }
            .context("Failed to invalidate mapped memory")
    }

    /// Sample counts usable for both colour and depth attachments.
    pub fn supported_sample_counts(&self) -> vk::SampleCountFlags {
        self.info.limits.framebuffer_color_sample_counts
            & self.info.limits.framebuffer_depth_sample_counts
    }

    /// First depth format with optimal-tiling attachment support.
    pub fn find_depth_format(&self) -> Result<vk::Format> {
        [
            vk::Format::D32_SFLOAT,
            vk::Format::D32_SFLOAT_S8_UINT,
            vk::Format::D24_UNORM_S8_UINT,
        ]
        .into_iter()
        .find(|&format| {
            let props = unsafe {
                self.instance
                    .get_physical_device_format_properties(self.physical_device, format)
            };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .context("No supported depth format")
    }

    /// Wait for device to be idle (e.g., before cleanup or swapchain recreation)
    pub fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")
    }
}

impl Drop for DeviceInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        unsafe {
            self.device.destroy_device(None);
            if let Some(debug) = self.debug_messenger.take() {
                debug.loader.destroy_debug_utils_messenger(debug.messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
