// vk-inflight - Vulkan rendering core with frames in flight
//
// backend/   thin ash wrappers (device, buffers, swapchain, pipelines)
// frame      slot / image bookkeeping for F frames in flight
// renderer   ties the backend to the frame cycle and exposes the draw API

pub mod backend;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod renderer;
pub mod scene;
pub mod teardown;

pub use backend::{DeviceInstance, SimpleBuffer, SimpleImage, WindowIntegration};
pub use config::Config;
pub use error::EngineError;
pub use events::{EngineEvent, EventQueue, EventResponse};
pub use renderer::Renderer;
pub use scene::{Light, MeshHandle, Vertex};
