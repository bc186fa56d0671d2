//! Low-level graphics interface: textures, buffers, synchronous transfers and
//! capture over Vulkan, DirectX 12, Metal and a host-memory reference device.

pub mod gpu;
pub mod utils;

pub use gpu::*;
