use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
#[cfg(feature = "llgi-serde")]
use serde::{Deserialize, Serialize};

use super::state::ResourceState;

/// Integer 2D vector. Used for texture extents, `x` is the width.
#[repr(C)]
#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Vec2I {
    pub x: i32,
    pub y: i32,
}

impl Vec2I {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// True when either component can't describe a real allocation.
    pub fn is_empty(&self) -> bool {
        self.x <= 0 || self.y <= 0
    }
}

/// 8-bit RGBA color, laid out exactly like an `R8G8B8A8Unorm` texel.
#[repr(C)]
#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Color8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color8 {
    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }
}

#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Format {
    #[default]
    Unknown,
    R8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8UnormSrgb,
    B8G8R8A8Unorm,
    B8G8R8A8UnormSrgb,
    R16G16B16A16Float,
    R32G32B32A32Float,
    D32Float,
    D24S8,
}

impl Format {
    /// Size of a single texel in bytes. `Unknown` is a raw byte stream.
    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            Format::Unknown | Format::R8Unorm => 1,
            Format::R8G8B8A8Unorm
            | Format::R8G8B8A8UnormSrgb
            | Format::B8G8R8A8Unorm
            | Format::B8G8R8A8UnormSrgb
            | Format::D32Float
            | Format::D24S8 => 4,
            Format::R16G16B16A16Float => 8,
            Format::R32G32B32A32Float => 16,
        }
    }

    pub fn is_depth(&self) -> bool {
        matches!(self, Format::D32Float | Format::D24S8)
    }
}

/// Bytes needed to hold a tightly packed 2D image of `size` texels.
pub fn texture_memory_size(format: Format, size: Vec2I) -> u64 {
    if size.is_empty() {
        return 0;
    }
    size.x as u64 * size.y as u64 * format.bytes_per_pixel() as u64
}

/// Where an allocation lives and who can touch it.
#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum HeapType {
    /// GPU only. Fastest to sample, never mapped.
    #[default]
    DeviceLocal,
    /// CPU writes, GPU reads once. Source of uploads.
    HostUpload,
    /// GPU writes, CPU reads. Destination of captures.
    HostReadback,
}

impl HeapType {
    pub fn is_host_visible(&self) -> bool {
        !matches!(self, HeapType::DeviceLocal)
    }
}

#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceDimension {
    #[default]
    Buffer,
    Texture2D,
}

#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextureType {
    /// Swap-chain image owned by the platform.
    Screen,
    /// Sampled texture populated from the CPU.
    #[default]
    Color,
    /// Off-screen color render target.
    Render,
    Depth,
}

#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    #[default]
    Vertex,
    Index,
    Constant,
}

#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Null,
    Vulkan,
    DirectX12,
    Metal,
}

bitflags! {
    #[repr(C)]
    #[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
    #[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UsageBits: u32 {
        const SAMPLED       = 0x1;
        const RENDER_TARGET = 0x2;
        const DEPTH_STENCIL = 0x4;
        const COPY_SRC      = 0x8;
        const COPY_DST      = 0x10;
        const VERTEX        = 0x20;
        const INDEX         = 0x40;
        const UNIFORM       = 0x80;
    }
}

unsafe impl Pod for UsageBits {}
unsafe impl Zeroable for UsageBits {}

/// Request for a GPU allocation.
///
/// Buffers use `Format::Unknown`; their size lives in `bytes`, `extent.x`
/// only mirrors it up to `i32::MAX` for display.
#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResourceDesc {
    pub heap: HeapType,
    pub format: Format,
    pub dimension: ResourceDimension,
    pub initial_state: ResourceState,
    pub usage: UsageBits,
    pub extent: Vec2I,
    /// Bytes the caller will see through this resource.
    pub bytes: u64,
}

impl ResourceDesc {
    pub fn buffer(heap: HeapType, byte_size: u64, usage: UsageBits) -> Self {
        let initial_state = match heap {
            HeapType::HostReadback => ResourceState::CopyDestination,
            _ => ResourceState::GenericRead,
        };
        Self {
            heap,
            format: Format::Unknown,
            dimension: ResourceDimension::Buffer,
            initial_state,
            usage,
            extent: Vec2I::new(byte_size.min(i32::MAX as u64) as i32, 1),
            bytes: byte_size,
        }
    }

    pub fn texture_2d(
        format: Format,
        extent: Vec2I,
        usage: UsageBits,
        initial_state: ResourceState,
    ) -> Self {
        Self {
            heap: HeapType::DeviceLocal,
            format,
            dimension: ResourceDimension::Texture2D,
            initial_state,
            usage,
            extent,
            bytes: texture_memory_size(format, extent),
        }
    }

    pub fn byte_size(&self) -> u64 {
        self.bytes
    }
}
