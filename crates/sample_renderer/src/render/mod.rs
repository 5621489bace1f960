//! Rendering system
//!
//! The [`context::RenderContext`] owns a [`device::GpuDevice`] and the
//! per-swap-chain-image resources built on it; [`state::RenderState`]s
//! record their draws into its command buffers; [`renderer::Renderer`] turns
//! high-level draw calls into render-state updates once per frame.

pub mod commands;
pub mod context;
pub mod device;
pub mod primitives;
pub mod renderer;
pub mod resource;
pub mod shader;
pub mod skinning;
pub mod state;
pub mod vulkan;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::path::PathBuf;
use thiserror::Error;

pub use context::{ContextState, FrameStatus, RenderContext, RenderStateId};
pub use device::{GpuDevice, GpuHandle};

/// Rendering errors
#[derive(Error, Debug)]
pub enum RenderError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// A handle did not resolve to a live device resource
    #[error("Resource not found: {handle:?}")]
    ResourceNotFound {
        /// The stale or foreign handle
        handle: GpuHandle,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Memory allocation failed
    #[error("Out of memory: {requested} bytes")]
    OutOfMemory {
        /// Number of bytes that were requested
        requested: u64,
    },

    /// A context or render-state initialization stage failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// Shader bytecode could not be read
    #[error("Failed to load shader {path:?}: {source}")]
    ShaderLoad {
        /// Resolved shader path
        path: PathBuf,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// The logical device was lost; the context must be rebuilt
    #[error("Device lost")]
    DeviceLost,

    /// Windowing collaborator failure
    #[error("Window error: {0}")]
    Window(String),
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Api(other),
        }
    }
}

/// Result type for rendering operations
pub type RenderResult<T> = Result<T, RenderError>;

/// Tag a failed initialization step with its stage name and log it once
pub(crate) fn init_stage<T>(stage: &str, result: RenderResult<T>) -> RenderResult<T> {
    result.map_err(|err| {
        log::error!("Initialization failed at {stage}: {err}");
        RenderError::InitializationFailed(format!("{stage}: {err}"))
    })
}

/// 8-bit RGBA color, laid out as `R8G8B8A8_UNORM` in vertex buffers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct Color {
    /// Red
    pub r: u8,
    /// Green
    pub g: u8,
    /// Blue
    pub b: u8,
    /// Alpha
    pub a: u8,
}

impl Color {
    /// Opaque red
    pub const RED: Self = Self::rgb(0xff, 0, 0);
    /// Opaque green
    pub const GREEN: Self = Self::rgb(0, 0xff, 0);
    /// Opaque blue
    pub const BLUE: Self = Self::rgb(0, 0, 0xff);
    /// Opaque white
    pub const WHITE: Self = Self::rgb(0xff, 0xff, 0xff);
    /// Opaque grey used for grid lines
    pub const GREY: Self = Self::rgb(0x80, 0x80, 0x80);

    /// Create a color from its components
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create an opaque color
    #[must_use]
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self::new(r, g, b, 0xff)
    }

    /// Components as a byte array
    #[must_use]
    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }
}
