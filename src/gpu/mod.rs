//! Backend-agnostic resource lifecycle and transfer layer.
//!
//! The staging, state-tracking, one-shot transfer and capture algorithms are
//! written once against [`Backend`]; each native API only implements the
//! primitives.

use std::ptr::NonNull;

pub mod context;
pub mod driver;
pub mod error;
pub mod footprint;

pub mod buffer;
pub mod capture;
pub mod graphics;
pub mod staging;
pub mod texture;
pub mod transfer;

pub mod null;

#[cfg(feature = "llgi-vulkan")]
pub mod vulkan;

#[cfg(all(windows, feature = "llgi-dx12"))]
pub mod dx12;

#[cfg(all(target_os = "macos", feature = "llgi-metal"))]
pub mod metal;

pub use buffer::Buffer;
pub use context::ContextInfo;
pub use driver::command::CopyCommand;
pub use driver::state::{Barrier, BarrierSink, ResourceState, StateTracker};
pub use driver::types::*;
pub use error::*;
pub use footprint::Footprint;
pub use graphics::{Graphics, GraphicsInfo, PlatformStatus};
pub use texture::{Texture, TextureDesc};
pub use transfer::{execute_one_shot, OneShot};

/// Primitives a native graphics API has to provide.
///
/// A `Backend` value is the device: it is shared through an `Arc` by the
/// graphics facade and every texture or buffer allocated from it.
///
/// # Examples
/// ```ignore
/// use llgi::gpu::{Backend, ResourceDesc};
/// fn upload_heap<B: Backend>(device: &B, bytes: u64) -> llgi::Result<B::Resource> {
///     device.allocate(&ResourceDesc::buffer(llgi::HeapType::HostUpload, bytes, Default::default()))
/// }
/// ```
pub trait Backend: Sized + 'static {
    /// Native buffer or image together with its memory.
    type Resource;
    /// Ephemeral allocator / command buffer / fence / event bundle. Dropping
    /// it releases every object it acquired, in reverse order.
    type Transfer;

    fn device_type(&self) -> DeviceType;

    /// Creates a resource already in `desc.initial_state`.
    fn allocate(&self, desc: &ResourceDesc) -> Result<Self::Resource>;

    /// Copy layout of mip 0 of `resource` in a linear buffer.
    fn footprint(&self, resource: &Self::Resource) -> Footprint;

    /// Maps the whole of a host-visible allocation.
    fn map(&self, resource: &mut Self::Resource) -> Result<NonNull<u8>>;

    fn unmap(&self, resource: &mut Self::Resource);

    fn release(&self, resource: Self::Resource);

    /// Creates the command allocator, command buffer, fence and wait handle
    /// of a one-shot transfer and opens the command buffer for recording.
    fn begin_transfer(&self) -> Result<Self::Transfer>;

    fn record_copy(&self, transfer: &mut Self::Transfer, copy: CopyCommand<'_, Self::Resource>);

    fn record_barrier(&self, transfer: &mut Self::Transfer, barrier: Barrier<'_, Self::Resource>);

    /// Closes the command buffer, submits it and signals the fence.
    fn submit(&self, transfer: &mut Self::Transfer) -> Result<()>;

    /// Blocks, without timeout, until the submitted work completes.
    fn wait(&self, transfer: &mut Self::Transfer) -> Result<()>;

    /// Blocks until the device has no work in flight.
    fn wait_idle(&self) -> Result<()>;
}
