// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section falls back to its defaults field by field, so a config file
// only needs the keys it wants to change. A missing or broken file is not
// fatal: the renderer starts with defaults and logs why.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::backend::swapchain::SwapchainPreferences;

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "vk-inflight".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// "auto", "immediate", "mailbox", "fifo" or "fifo_relaxed"
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub image_count: u32,
    /// 0 = one slot per swapchain image
    pub frames_in_flight: usize,
    pub msaa_samples: u32,
    /// "counter_clockwise" or "clockwise"
    pub front_face: String,
    /// Negative-height viewport so +Y points up in clip space
    pub flip_viewport_y: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.02, 0.02, 0.04, 1.0],
            image_count: 3,
            frames_in_flight: 0,
            msaa_samples: 4,
            front_face: "counter_clockwise".to_string(),
            flip_viewport_y: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "vk_inflight.log".to_string(),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub fullscreen_key: String,
    pub quit_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            fullscreen_key: "F11".to_string(),
            quit_key: "Escape".to_string(),
        }
    }
}

/// Shader locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub directory: PathBuf,
    /// Rebuild the pipeline when a compiled shader in `directory` changes
    pub hot_reload: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("shaders"),
            hot_reload: true,
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if not found
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("Failed to load config.toml: {:#}. Using defaults.", e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config = Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Present mode as Vulkan enum; `None` lets the swapchain pick.
    pub fn get_present_mode(&self) -> Option<vk::PresentModeKHR> {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "auto" => None,
            "immediate" => Some(vk::PresentModeKHR::IMMEDIATE),
            "mailbox" => Some(vk::PresentModeKHR::MAILBOX),
            "fifo" => Some(vk::PresentModeKHR::FIFO),
            "fifo_relaxed" => Some(vk::PresentModeKHR::FIFO_RELAXED),
            _ => {
                log::warn!(
                    "Unknown present mode '{}', letting the swapchain choose",
                    self.graphics.present_mode
                );
                None
            }
        }
    }

    pub fn get_front_face(&self) -> vk::FrontFace {
        match self.graphics.front_face.to_lowercase().as_str() {
            "clockwise" | "cw" => vk::FrontFace::CLOCKWISE,
            "counter_clockwise" | "ccw" => vk::FrontFace::COUNTER_CLOCKWISE,
            _ => {
                log::warn!(
                    "Unknown front face '{}', defaulting to counter_clockwise",
                    self.graphics.front_face
                );
                vk::FrontFace::COUNTER_CLOCKWISE
            }
        }
    }

    pub fn swapchain_preferences(&self) -> SwapchainPreferences {
        SwapchainPreferences {
            image_count: self.graphics.image_count.max(1),
            present_mode: self.get_present_mode(),
            msaa_samples: self.graphics.msaa_samples.max(1),
        }
    }

    /// Frame slots for a swapchain of `image_count` images.
    pub fn frames_in_flight(&self, image_count: usize) -> usize {
        match self.graphics.frames_in_flight {
            0 => image_count.max(1),
            n => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.graphics.image_count, 3);
        assert_eq!(config.graphics.msaa_samples, 4);
        assert_eq!(config.controls.quit_key, "Escape");
        assert!(config.shaders.hot_reload);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config = Config::parse(
            r#"
            [graphics]
            present_mode = "fifo"
            frames_in_flight = 2

            [shaders]
            directory = "assets/spv"
            "#,
        )
        .unwrap();

        assert_eq!(config.get_present_mode(), Some(vk::PresentModeKHR::FIFO));
        assert_eq!(config.frames_in_flight(3), 2);
        assert_eq!(config.graphics.image_count, 3);
        assert_eq!(config.shaders.directory, PathBuf::from("assets/spv"));
        assert!(config.shaders.hot_reload);
    }

    #[test]
    fn frames_in_flight_defaults_to_image_count() {
        let config = Config::default();
        assert_eq!(config.frames_in_flight(3), 3);
        assert_eq!(config.frames_in_flight(0), 1);
    }

    #[test]
    fn present_mode_strings() {
        let mut config = Config::default();
        assert_eq!(config.get_present_mode(), Some(vk::PresentModeKHR::MAILBOX));
        config.graphics.present_mode = "auto".into();
        assert_eq!(config.get_present_mode(), None);
        config.graphics.present_mode = "Immediate".into();
        assert_eq!(config.get_present_mode(), Some(vk::PresentModeKHR::IMMEDIATE));
        config.graphics.present_mode = "vsync-ish".into();
        assert_eq!(config.get_present_mode(), None);
    }

    #[test]
    fn front_face_strings() {
        let mut config = Config::default();
        assert_eq!(config.get_front_face(), vk::FrontFace::COUNTER_CLOCKWISE);
        config.graphics.front_face = "clockwise".into();
        assert_eq!(config.get_front_face(), vk::FrontFace::CLOCKWISE);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[graphics\nimage_count = 3").is_err());
        assert!(Config::parse("[graphics]\nimage_count = \"three\"").is_err());
    }

    #[test]
    fn preferences_clamp_to_at_least_one() {
        let mut config = Config::default();
        config.graphics.image_count = 0;
        config.graphics.msaa_samples = 0;
        let prefs = config.swapchain_preferences();
        assert_eq!(prefs.image_count, 1);
        assert_eq!(prefs.msaa_samples, 1);
    }
}
