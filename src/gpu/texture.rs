use std::sync::{Arc, Weak};

use bytemuck::Pod;
#[cfg(feature = "llgi-serde")]
use serde::{Deserialize, Serialize};

use super::capture;
use super::driver::command::CopyCommand;
use super::driver::state::{BarrierSink, ResourceState, StateTracker};
use super::driver::types::{texture_memory_size, Format, ResourceDesc, TextureType, UsageBits, Vec2I};
use super::error::StateError;
use super::graphics::{Graphics, GraphicsInner};
use super::staging::StagingBuffer;
use super::transfer::execute_one_shot;
use super::{Backend, Result};

#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub size: Vec2I,
    pub format: Format,
    pub ty: TextureType,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            size: Vec2I::new(1, 1),
            format: Format::R8G8B8A8Unorm,
            ty: TextureType::Color,
        }
    }
}

/// Back-reference from a texture to the graphics object that created it.
pub(crate) enum OwnerRef<B: Backend> {
    Strong(Arc<GraphicsInner<B>>),
    /// Screen textures are owned by the platform, which the graphics object
    /// outlives; holding it strongly would form a cycle.
    Weak(Weak<GraphicsInner<B>>),
    None,
}

fn usage_for(ty: TextureType) -> UsageBits {
    match ty {
        TextureType::Color => UsageBits::SAMPLED | UsageBits::COPY_DST | UsageBits::COPY_SRC,
        TextureType::Render => {
            UsageBits::SAMPLED | UsageBits::RENDER_TARGET | UsageBits::COPY_DST | UsageBits::COPY_SRC
        }
        TextureType::Depth => UsageBits::DEPTH_STENCIL | UsageBits::SAMPLED | UsageBits::COPY_SRC,
        TextureType::Screen => UsageBits::RENDER_TARGET | UsageBits::COPY_SRC,
    }
}

/// A 2D GPU image together with its staging buffer and tracked state.
pub struct Texture<B: Backend> {
    device: Arc<B>,
    owner: OwnerRef<B>,
    resource: Option<B::Resource>,
    staging: Option<StagingBuffer<B>>,
    state: StateTracker,
    steady: ResourceState,
    ty: TextureType,
    format: Format,
    size: Vec2I,
    memory_size: u64,
    locked: bool,
}

impl<B: Backend> Texture<B> {
    /// Allocates a texture not tied to any [`Graphics`].
    pub fn new(device: Arc<B>, desc: &TextureDesc) -> Result<Self> {
        Self::with_owner(device, desc, OwnerRef::None)
    }

    pub(crate) fn with_owner(device: Arc<B>, desc: &TextureDesc, owner: OwnerRef<B>) -> Result<Self> {
        let format = match desc.ty {
            TextureType::Depth if !desc.format.is_depth() => Format::D32Float,
            _ => desc.format,
        };
        let initial = ResourceState::initial_for(desc.ty);
        let resource = device.allocate(&ResourceDesc::texture_2d(
            format,
            desc.size,
            usage_for(desc.ty),
            initial,
        ))?;

        let mut texture = Self::assemble(device, owner, resource, desc.ty, format, desc.size);

        if matches!(desc.ty, TextureType::Color | TextureType::Render) {
            let footprint = texture.device.footprint(texture.resource()?);
            // Dropping `texture` on failure releases the image.
            texture.staging = Some(StagingBuffer::new(
                &*texture.device,
                footprint,
                texture.memory_size,
            )?);
        }

        log::debug!(
            "created {:?} texture {}x{} {:?}",
            desc.ty,
            desc.size.x,
            desc.size.y,
            format
        );
        Ok(texture)
    }

    /// Takes ownership of a platform image (typically a swap-chain buffer)
    /// currently in `PresentSource`.
    pub fn from_native(device: Arc<B>, resource: B::Resource, format: Format, size: Vec2I) -> Self {
        Self::assemble(device, OwnerRef::None, resource, TextureType::Screen, format, size)
    }

    pub(crate) fn set_owner(&mut self, owner: OwnerRef<B>) {
        self.owner = owner;
    }

    fn assemble(
        device: Arc<B>,
        owner: OwnerRef<B>,
        resource: B::Resource,
        ty: TextureType,
        format: Format,
        size: Vec2I,
    ) -> Self {
        Self {
            device,
            owner,
            resource: Some(resource),
            staging: None,
            state: StateTracker::new(ResourceState::initial_for(ty)),
            steady: ResourceState::steady_for(ty),
            ty,
            format,
            size,
            memory_size: texture_memory_size(format, size),
            locked: false,
        }
    }

    /// Tightly packed view of the texture's contents for the CPU to fill.
    ///
    /// Calling it again before [`unlock`](Self::unlock) returns the same
    /// region.
    pub fn lock(&mut self) -> Result<&mut [u8]> {
        let staging = self.staging.as_mut().ok_or(StateError::NotEditable)?;
        let view = staging.lock(&self.device)?;
        self.locked = true;
        Ok(view)
    }

    /// Uploads what was written since [`lock`](Self::lock) and blocks until
    /// the texture is back in its steady state.
    pub fn unlock(&mut self) -> Result<()> {
        if !self.locked {
            return Err(StateError::NotLocked.into());
        }
        let staging = self.staging.as_mut().ok_or(StateError::NotEditable)?;
        let resource = self.resource.as_ref().ok_or(StateError::NotAllocated)?;
        self.locked = false;
        staging.flush(&self.device)?;

        let snapshot = self.state.snapshot();
        let steady = self.steady;
        let footprint = staging.footprint();
        let state = &mut self.state;
        let uploaded = execute_one_shot(&*self.device, |ctx| {
            state.transition(resource, ResourceState::CopyDestination, ctx);
            ctx.copy(CopyCommand::BufferToTexture {
                src: staging.resource(),
                footprint,
                dst: resource,
            });
            state.transition(resource, steady, ctx);
            Ok(())
        });

        if uploaded.is_err() {
            self.state.restore(snapshot);
        }
        uploaded
    }

    /// Replaces the whole texture with `bytes`, which must be exactly
    /// [`memory_size`](Self::memory_size) long.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() as u64 != self.memory_size {
            return Err(StateError::OutOfRange {
                offset: 0,
                size: bytes.len() as u64,
                capacity: self.memory_size,
            }
            .into());
        }
        self.lock()?.copy_from_slice(bytes);
        self.unlock()
    }

    pub fn write_pixels<T: Pod>(&mut self, pixels: &[T]) -> Result<()> {
        self.write(bytemuck::cast_slice(pixels))
    }

    /// Moves the texture to `target` in a one-shot submission. Does nothing
    /// when it is already there.
    pub fn transition(&mut self, target: ResourceState) -> Result<()> {
        if self.state.current() == target {
            return Ok(());
        }
        let resource = self.resource.as_ref().ok_or(StateError::NotAllocated)?;
        let snapshot = self.state.snapshot();
        let state = &mut self.state;
        let moved = execute_one_shot(&*self.device, |ctx| {
            state.transition(resource, target, ctx);
            Ok(())
        });
        if moved.is_err() {
            self.state.restore(snapshot);
        }
        moved
    }

    /// Records the barrier into a caller's command stream. Returns whether a
    /// barrier was needed.
    pub fn record_transition<S>(&mut self, target: ResourceState, sink: &mut S) -> Result<bool>
    where
        S: BarrierSink<B::Resource> + ?Sized,
    {
        let resource = self.resource.as_ref().ok_or(StateError::NotAllocated)?;
        Ok(self.state.transition(resource, target, sink))
    }

    /// Tightly packed pixels of mip 0, or an empty vector on failure.
    pub fn capture(&mut self) -> Vec<u8> {
        let Some(resource) = self.resource.as_ref() else {
            log::error!("capture of a texture without a backing allocation");
            return Vec::new();
        };
        capture::capture(&*self.device, resource, &mut self.state, self.memory_size)
    }

    pub fn size_as_2d(&self) -> Vec2I {
        self.size
    }

    /// Bytes of the tightly packed image.
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn texture_type(&self) -> TextureType {
        self.ty
    }

    pub fn state(&self) -> ResourceState {
        self.state.current()
    }

    pub fn is_editable(&self) -> bool {
        self.staging.is_some()
    }

    /// Whether locks go through a tightly packed host copy because the
    /// device pads rows. Unpadded textures map the upload buffer directly.
    pub fn is_shadowed(&self) -> bool {
        self.staging.as_ref().is_some_and(StagingBuffer::is_shadowed)
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn resource(&self) -> Result<&B::Resource> {
        Ok(self.resource.as_ref().ok_or(StateError::NotAllocated)?)
    }

    pub fn device(&self) -> &Arc<B> {
        &self.device
    }

    /// The graphics object this texture was created from, if it is alive.
    pub fn graphics(&self) -> Option<Graphics<B>> {
        match &self.owner {
            OwnerRef::Strong(inner) => Some(Graphics::from_inner(Arc::clone(inner))),
            OwnerRef::Weak(inner) => inner.upgrade().map(Graphics::from_inner),
            OwnerRef::None => None,
        }
    }
}

impl<B: Backend> Drop for Texture<B> {
    fn drop(&mut self) {
        if let Some(staging) = self.staging.take() {
            staging.release(&self.device);
        }
        if let Some(resource) = self.resource.take() {
            self.device.release(resource);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::error::{AllocationError, GPUError};
    use crate::gpu::null::{Fault, NullDevice, NullDeviceInfo};

    fn device() -> Arc<NullDevice> {
        Arc::new(NullDevice::default())
    }

    #[test]
    fn depth_textures_default_to_d32() {
        let texture = Texture::new(
            device(),
            &TextureDesc {
                size: Vec2I::new(8, 8),
                format: Format::R8G8B8A8Unorm,
                ty: TextureType::Depth,
            },
        )
        .unwrap();
        assert_eq!(texture.format(), Format::D32Float);
        assert_eq!(texture.state(), ResourceState::DepthRead);
        assert!(!texture.is_editable());
    }

    #[test]
    fn staging_failure_releases_the_image() {
        // 64 bytes of image fit, the 784 byte pitched upload buffer does not.
        let device = Arc::new(NullDevice::new(NullDeviceInfo {
            memory_budget: Some(100),
            ..Default::default()
        }));
        let desc = TextureDesc {
            size: Vec2I::new(4, 4),
            ..Default::default()
        };

        assert!(matches!(
            Texture::new(Arc::clone(&device), &desc),
            Err(GPUError::Allocation(AllocationError::OutOfMemory { requested: 784 }))
        ));
        assert_eq!(device.live_allocations(), 0);

        device.inject_fault(Fault::Allocate);
        assert!(Texture::new(Arc::clone(&device), &TextureDesc::default()).is_err());
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn unlock_without_lock_is_rejected() {
        let mut texture = Texture::new(device(), &TextureDesc::default()).unwrap();
        assert!(matches!(
            texture.unlock(),
            Err(GPUError::State(StateError::NotLocked))
        ));
    }

    #[test]
    fn write_rejects_wrong_length() {
        let mut texture = Texture::new(
            device(),
            &TextureDesc {
                size: Vec2I::new(2, 2),
                ..Default::default()
            },
        )
        .unwrap();
        assert!(texture.write(&[0u8; 3]).is_err());
        assert!(!texture.is_locked());
        texture.write(&[7u8; 16]).unwrap();
        assert_eq!(texture.capture(), vec![7u8; 16]);
    }

    #[test]
    fn record_transition_reports_noop() {
        let mut texture = Texture::new(device(), &TextureDesc::default()).unwrap();
        let mut barriers: Vec<(ResourceState, ResourceState)> = Vec::new();
        assert!(!texture
            .record_transition(ResourceState::CopyDestination, &mut barriers)
            .unwrap());
        assert!(texture
            .record_transition(ResourceState::GenericRead, &mut barriers)
            .unwrap());
        assert_eq!(
            barriers,
            vec![(ResourceState::CopyDestination, ResourceState::GenericRead)]
        );
    }
}
