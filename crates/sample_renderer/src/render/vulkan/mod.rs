//! Vulkan backend
//!
//! [`VulkanDevice`] implements [`GpuDevice`](crate::render::device::GpuDevice)
//! with `ash`, presenting to a GLFW [`Window`].

mod device;
mod instance;
mod memory;
mod pipeline;
mod swapchain;
mod window;

pub use device::VulkanDevice;
pub use window::{Window, WindowEvents};
