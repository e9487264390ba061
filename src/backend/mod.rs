// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Every object holds an Arc<DeviceInstance>, so the
// device outlives anything created from it.

pub mod buffer;
pub mod commands;
pub mod descriptor;
pub mod device;
pub mod framebuffer;
pub mod memory;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::{SimpleBuffer, SimpleImage};
pub use device::DeviceInstance;
pub use swapchain::WindowIntegration;
