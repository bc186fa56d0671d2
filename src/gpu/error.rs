use std::fmt;

use thiserror::Error;

use super::driver::types::{Format, UsageBits, Vec2I};

/// Native memory or resource creation failed.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("resource extent {0:?} has an empty dimension")]
    ZeroSized(Vec2I),
    #[error("format {format:?} cannot be used with {usage:?}")]
    UnsupportedFormat { format: Format, usage: UsageBits },
    #[error("device out of memory ({requested} bytes requested)")]
    OutOfMemory { requested: u64 },
    #[error("native allocation failed: {0}")]
    Native(String),
}

/// Native objects making up a one-shot transfer context.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TransferObject {
    CommandAllocator,
    CommandBuffer,
    Queue,
    Fence,
    Event,
}

impl fmt::Display for TransferObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferObject::CommandAllocator => "command allocator",
            TransferObject::CommandBuffer => "command buffer",
            TransferObject::Queue => "command queue",
            TransferObject::Fence => "fence",
            TransferObject::Event => "wait event",
        };
        f.write_str(name)
    }
}

/// A one-shot submission primitive failed to create, submit or complete.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("failed to create {object}: {reason}")]
    Create {
        object: TransferObject,
        reason: String,
    },
    #[error("queue submission failed: {0}")]
    Submit(String),
    #[error("waiting for transfer completion failed: {0}")]
    Wait(String),
}

impl TransferError {
    pub fn create(object: TransferObject, reason: impl fmt::Display) -> Self {
        TransferError::Create {
            object,
            reason: reason.to_string(),
        }
    }
}

/// A resource was used in a way its current lifecycle state does not allow.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("resource has no backing allocation")]
    NotAllocated,
    #[error("resource was created without a staging buffer")]
    NotEditable,
    #[error("unlock called without a matching lock")]
    NotLocked,
    #[error("resource memory is not visible to the host")]
    NotHostVisible,
    #[error("range {offset}+{size} exceeds {capacity} bytes")]
    OutOfRange { offset: u64, size: u64, capacity: u64 },
}

#[cfg(feature = "llgi-vulkan")]
#[derive(Debug)]
pub struct VulkanError {
    pub(crate) res: ash::vk::Result,
}

#[cfg(feature = "llgi-vulkan")]
impl fmt::Display for VulkanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vulkan Error: {}", self.res)
    }
}

#[derive(Debug, Error)]
pub enum GPUError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("device lost or unavailable: {0}")]
    DeviceUnavailable(String),
    #[cfg(feature = "llgi-vulkan")]
    #[error("{0}")]
    VulkanError(VulkanError),
    #[cfg(feature = "llgi-vulkan")]
    #[error("failed to load the Vulkan library: {0}")]
    LoadingError(ash::LoadingError),
    #[cfg(all(windows, feature = "llgi-dx12"))]
    #[error("DirectX 12 error: {0}")]
    Dx12Error(windows::core::Error),
}

/// Convenient crate-wide result type.
pub type Result<T, E = GPUError> = std::result::Result<T, E>;

#[cfg(feature = "llgi-vulkan")]
impl From<ash::vk::Result> for GPUError {
    fn from(res: ash::vk::Result) -> Self {
        GPUError::VulkanError(VulkanError { res })
    }
}

#[cfg(feature = "llgi-vulkan")]
impl From<ash::LoadingError> for GPUError {
    fn from(res: ash::LoadingError) -> Self {
        GPUError::LoadingError(res)
    }
}

#[cfg(all(windows, feature = "llgi-dx12"))]
impl From<windows::core::Error> for GPUError {
    fn from(err: windows::core::Error) -> Self {
        GPUError::Dx12Error(err)
    }
}
