// Shader module loading and hot reload
//
// Vulkan uses SPIR-V bytecode for shaders. Modules are validated on the
// host before the driver sees them, and a notify watcher flags the shader
// directory when compiled artifacts change.

use anyhow::{Context, Result};
use ash::vk;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::DeviceInstance;
use crate::error::EngineError;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytes into aligned words, rejecting obviously broken input.
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>, EngineError> {
    if bytes.is_empty() {
        return Err(EngineError::ShaderCompile("empty SPIR-V blob".into()));
    }
    let words = ash::util::read_spv(&mut std::io::Cursor::new(bytes))
        .map_err(|e| EngineError::ShaderCompile(e.to_string()))?;

    // read_spv already swapped opposite-endian input into native order
    match words.first() {
        Some(&SPIRV_MAGIC) if words.len() >= 5 => Ok(words),
        Some(&SPIRV_MAGIC) => Err(EngineError::ShaderCompile("truncated SPIR-V header".into())),
        _ => Err(EngineError::ShaderCompile("missing SPIR-V magic number".into())),
    }
}

/// A compiled shader stage. Destroyed on drop; safe to drop once every
/// pipeline using it has been created.
pub struct ShaderModule {
    device: Arc<DeviceInstance>,
    module: vk::ShaderModule,
    stage: vk::ShaderStageFlags,
}

impl ShaderModule {
    pub fn from_spirv(device: Arc<DeviceInstance>, stage: vk::ShaderStageFlags, bytes: &[u8]) -> Result<Self> {
        let code = parse_spirv(bytes)?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .map_err(|e| EngineError::ShaderCompile(format!("driver rejected module: {e}")))?;

        Ok(Self { device, module, stage })
    }

    pub fn from_file(device: Arc<DeviceInstance>, stage: vk::ShaderStageFlags, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader {:?}", path))?;
        Self::from_spirv(device, stage, &bytes)
            .with_context(|| format!("Failed to load shader {:?}", path))
    }

    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    pub fn stage(&self) -> vk::ShaderStageFlags {
        self.stage
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

pub fn is_shader_artifact(path: &Path) -> bool {
    path.extension().map_or(false, |ext| ext == "spv")
}

/// Watches a directory for changed `.spv` files.
pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    changed: Arc<Mutex<bool>>,
    directory: PathBuf,
}

impl ShaderWatcher {
    pub fn new(directory: &Path) -> Result<Self> {
        let changed = Arc::new(Mutex::new(false));
        let flag = changed.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let relevant = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_))
                        && event.paths.iter().any(|p| is_shader_artifact(p));
                    if relevant {
                        log::debug!("Shader change detected: {:?}", event.paths);
                        *flag.lock() = true;
                    }
                }
                Err(e) => log::warn!("Shader watcher error: {}", e),
            }
        })
        .context("Failed to create shader watcher")?;

        watcher
            .watch(directory, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {:?}", directory))?;

        log::info!("Watching {:?} for shader changes", directory);

        Ok(Self {
            _watcher: watcher,
            changed,
            directory: directory.to_path_buf(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// True once per batch of changes.
    pub fn take_changed(&self) -> bool {
        std::mem::take(&mut *self.changed.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(magic: u32) -> Vec<u8> {
        [magic, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_le_bytes())
            .collect()
    }

    #[test]
    fn accepts_well_formed_header() {
        let words = parse_spirv(&header(SPIRV_MAGIC)).unwrap();
        assert_eq!(words[0], SPIRV_MAGIC);
        assert_eq!(words.len(), 5);
    }

    #[test]
    fn accepts_big_endian_modules() {
        let bytes: Vec<u8> = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]
            .iter()
            .flat_map(|w| w.to_be_bytes())
            .collect();
        assert_eq!(parse_spirv(&bytes).unwrap()[0], SPIRV_MAGIC);
    }

    #[test]
    fn rejects_misaligned_empty_and_foreign_input() {
        assert!(matches!(parse_spirv(&[]), Err(EngineError::ShaderCompile(_))));
        assert!(matches!(parse_spirv(&[1, 2, 3]), Err(EngineError::ShaderCompile(_))));
        assert!(matches!(parse_spirv(&header(0xdead_beef)), Err(EngineError::ShaderCompile(_))));
        assert!(matches!(
            parse_spirv(&SPIRV_MAGIC.to_le_bytes()),
            Err(EngineError::ShaderCompile(_))
        ));
        assert!(matches!(parse_spirv(b"#version 450\n"), Err(EngineError::ShaderCompile(_))));
    }

    #[test]
    fn only_spv_files_trigger_reload() {
        assert!(is_shader_artifact(Path::new("shaders/mesh.vert.spv")));
        assert!(!is_shader_artifact(Path::new("shaders/mesh.vert")));
        assert!(!is_shader_artifact(Path::new("shaders/spv")));
    }
}
