// Engine error taxonomy
//
// Fatal conditions that callers may want to tell apart. Everything else
// travels as anyhow::Error with context attached at the Vulkan call site.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No Vulkan-capable GPU found")]
    NoDevice,

    #[error("No GPU satisfies the required features and extensions")]
    NoSuitableDevice,

    #[error("No queue family supports {capability:?}")]
    UnsupportedQueue { capability: vk::QueueFlags },

    #[error("No memory type in mask {type_bits:#b} provides {required:?}")]
    NoSuitableHeap {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    #[error("Queue family {family} cannot present to this surface")]
    PresentationUnsupported { family: u32 },

    #[error("Surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("Shader module rejected: {0}")]
    ShaderCompile(String),

    #[error("Render pass expects {expected:?} but framebuffer targets are {found:?}")]
    AttachmentMismatch {
        expected: crate::backend::pipeline::AttachmentLayout,
        found: crate::backend::pipeline::AttachmentLayout,
    },

    #[error("Unsupported window system: {0}")]
    UnsupportedPlatform(String),

    #[error("Frame cycle misuse: {0}")]
    FrameOrder(&'static str),
}

/// True if `err` carries the given engine error variant.
pub fn is_engine_error(err: &anyhow::Error, pred: impl Fn(&EngineError) -> bool) -> bool {
    err.downcast_ref::<EngineError>().map_or(false, pred)
}
