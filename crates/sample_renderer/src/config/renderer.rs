use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::Config;

/// Settings injected into the render context at construction.
///
/// Replaces any process-wide window or path state: everything the context
/// and its render states need to know about their environment lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name reported to the driver
    pub application_name: String,
    /// Framebuffer width requested before the surface reports one
    pub initial_width: u32,
    /// Framebuffer height requested before the surface reports one
    pub initial_height: u32,
    /// Directory holding compiled `<name>.spv` shader binaries
    pub shader_dir: PathBuf,
    /// Enable the Khronos validation layer and debug messenger
    pub enable_validation: bool,
    /// Color the render pass clears to
    pub clear_color: [f32; 4],
    /// Depth the render pass clears to
    pub clear_depth: f32,
    /// Use MAILBOX presentation when available, FIFO otherwise
    pub prefer_mailbox: bool,
}

impl RendererConfig {
    /// Create a configuration with defaults for everything but the name
    pub fn new(application_name: impl Into<String>) -> Self {
        Self {
            application_name: application_name.into(),
            ..Self::default()
        }
    }

    /// Set the initial framebuffer extent
    #[must_use]
    pub const fn with_extent(mut self, width: u32, height: u32) -> Self {
        self.initial_width = width;
        self.initial_height = height;
        self
    }

    /// Set the shader binary directory
    #[must_use]
    pub fn with_shader_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_dir = dir.into();
        self
    }

    /// Enable or disable validation layers
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = enabled;
        self
    }

    /// Set the clear color
    #[must_use]
    pub const fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    /// Check the configuration for values the context cannot work with
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }
        if self.initial_width == 0 || self.initial_height == 0 {
            return Err(format!(
                "Initial extent must be non-zero, got {}x{}",
                self.initial_width, self.initial_height
            ));
        }
        if !(0.0..=1.0).contains(&self.clear_depth) {
            return Err(format!("Clear depth {} is outside [0, 1]", self.clear_depth));
        }
        Ok(())
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "sample viewer".to_string(),
            initial_width: 1280,
            initial_height: 720,
            shader_dir: PathBuf::from("../shaders"),
            enable_validation: cfg!(debug_assertions),
            clear_color: [0.4, 0.42, 0.38, 1.0],
            clear_depth: 1.0,
            prefer_mailbox: true,
        }
    }
}

impl Config for RendererConfig {}
