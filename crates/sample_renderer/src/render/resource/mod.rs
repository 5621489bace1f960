//! Device resource ownership
//!
//! - [`DeviceHandle`]: scoped ownership of a single raw handle with a captured
//!   destroy function.
//! - [`ResourceArena`]: generation-tagged storage for every object a device
//!   creates, torn down in dependency order.
//! - [`SizedBuffer`]: a typed GPU buffer that decides between in-place update
//!   and recreation from the element count.

mod arena;
mod handle;
mod sized_buffer;

pub use arena::ResourceArena;
pub use handle::{DeviceHandle, NullHandle};
pub use sized_buffer::{BufferFate, SizedBuffer};
