//! # Sample Renderer
//!
//! Render-context and render-state lifecycle core for the animation sample
//! viewer, built on Vulkan.
//!
//! ## Layers
//!
//! - **Device seam**: [`render::device::GpuDevice`] exposes every device
//!   operation the core issues. [`render::vulkan::VulkanDevice`] drives a real
//!   GPU, [`render::device::headless::HeadlessDevice`] runs the same protocol in
//!   memory.
//! - **Render Context**: swap-chain generations, command-buffer recording,
//!   frame submission and the render-state registry.
//! - **Render States**: line batches, instanced models and skinned models.
//! - **Renderer Facade**: high-level draw calls accumulated per frame.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sample_renderer::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RendererConfig::default();
//!     let mut window = Window::new(&config.application_name, config.initial_width, config.initial_height)?;
//!     let device = VulkanDevice::new(&config, &mut window)?;
//!     let mut renderer = Renderer::initialize(config, device)?;
//!
//!     while !window.should_close() {
//!         window.poll_events();
//!         renderer.draw_grid(20, 1.0)?;
//!         renderer.draw_axes(&Mat4::identity())?;
//!         renderer.render_frame()?;
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;

/// Common imports for viewer applications
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, RendererConfig},
        foundation::math::{Mat4, Mat4Ext, Vec3},
        render::{
            primitives::BoxShape,
            renderer::{DrawOptions, Renderer},
            skinning::{Skeleton, SkinnedMesh, SkinnedVertex},
            vulkan::{VulkanDevice, Window},
            Color, FrameStatus, RenderError, RenderResult,
        },
    };
}
