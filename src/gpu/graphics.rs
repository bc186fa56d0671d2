use std::sync::Arc;

#[cfg(feature = "llgi-serde")]
use serde::{Deserialize, Serialize};

use super::buffer::Buffer;
use super::driver::types::{BufferUsage, DeviceType, Format, TextureType, Vec2I};
use super::texture::{OwnerRef, Texture, TextureDesc};
use super::{Backend, Result};

/// What the platform layer reports about the swap chain each frame.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PlatformStatus {
    pub current_swap_buffer_index: i32,
}

#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GraphicsInfo {
    pub swap_buffer_count: u32,
}

impl Default for GraphicsInfo {
    fn default() -> Self {
        Self {
            swap_buffer_count: 2,
        }
    }
}

type StatusFn = dyn Fn() -> PlatformStatus + Send + Sync;

pub(crate) struct GraphicsInner<B: Backend> {
    device: Arc<B>,
    info: GraphicsInfo,
    status: Option<Box<StatusFn>>,
}

/// Entry point for creating textures and buffers on one device.
///
/// Cheap to clone; clones share the device.
pub struct Graphics<B: Backend> {
    inner: Arc<GraphicsInner<B>>,
}

impl<B: Backend> Clone for Graphics<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: Backend> Graphics<B> {
    /// `status` is polled whenever the current swap-buffer index is needed.
    pub fn new<F>(device: Arc<B>, info: GraphicsInfo, status: F) -> Self
    where
        F: Fn() -> PlatformStatus + Send + Sync + 'static,
    {
        Self::build(device, info, Some(Box::new(status)))
    }

    /// Graphics without a swap chain.
    pub fn headless(device: Arc<B>, info: GraphicsInfo) -> Self {
        Self::build(device, info, None)
    }

    fn build(device: Arc<B>, info: GraphicsInfo, status: Option<Box<StatusFn>>) -> Self {
        log::info!(
            "{:?} graphics with {} swap buffers",
            device.device_type(),
            info.swap_buffer_count
        );
        Self {
            inner: Arc::new(GraphicsInner {
                device,
                info,
                status,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<GraphicsInner<B>>) -> Self {
        Self { inner }
    }

    pub fn device(&self) -> &Arc<B> {
        &self.inner.device
    }

    pub fn device_type(&self) -> DeviceType {
        self.inner.device.device_type()
    }

    pub fn swap_buffer_count(&self) -> u32 {
        self.inner.info.swap_buffer_count
    }

    pub fn current_swap_buffer_index(&self) -> i32 {
        self.inner
            .status
            .as_ref()
            .map_or(0, |status| status().current_swap_buffer_index)
    }

    /// Blocks until every submitted command has completed.
    pub fn wait_finish(&self) -> Result<()> {
        self.inner.device.wait_idle()
    }

    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Texture<B>> {
        Texture::with_owner(
            Arc::clone(&self.inner.device),
            desc,
            OwnerRef::Strong(Arc::clone(&self.inner)),
        )
    }

    pub fn create_render_texture(&self, size: Vec2I, format: Format) -> Result<Texture<B>> {
        self.create_texture(&TextureDesc {
            size,
            format,
            ty: TextureType::Render,
        })
    }

    pub fn create_depth_texture(&self, size: Vec2I) -> Result<Texture<B>> {
        self.create_texture(&TextureDesc {
            size,
            format: Format::D32Float,
            ty: TextureType::Depth,
        })
    }

    /// Wraps a swap-chain image. The texture only weakly refers back to this
    /// graphics object.
    pub fn wrap_screen_texture(&self, resource: B::Resource, format: Format, size: Vec2I) -> Texture<B> {
        let mut texture = Texture::from_native(Arc::clone(&self.inner.device), resource, format, size);
        texture.set_owner(OwnerRef::Weak(Arc::downgrade(&self.inner)));
        texture
    }

    pub fn create_vertex_buffer(&self, size: u64) -> Result<Buffer<B>> {
        Buffer::new(Arc::clone(&self.inner.device), BufferUsage::Vertex, size, 0)
    }

    /// `stride` is 2 or 4 bytes per index.
    pub fn create_index_buffer(&self, stride: u32, count: u64) -> Result<Buffer<B>> {
        Buffer::new(
            Arc::clone(&self.inner.device),
            BufferUsage::Index,
            stride as u64 * count,
            stride,
        )
    }

    pub fn create_constant_buffer(&self, size: u64) -> Result<Buffer<B>> {
        Buffer::new(Arc::clone(&self.inner.device), BufferUsage::Constant, size, 0)
    }

    /// Raw, tightly packed pixels of `texture`; empty if the capture failed.
    pub fn capture_render_target(&self, texture: &mut Texture<B>) -> Vec<u8> {
        texture.capture()
    }

    pub fn read_buffer(&self, buffer: &mut Buffer<B>) -> Vec<u8> {
        buffer.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::null::NullDevice;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn status_callback_drives_swap_index() {
        let frame = Arc::new(AtomicI32::new(0));
        let counter = Arc::clone(&frame);
        let graphics = Graphics::new(
            Arc::new(NullDevice::default()),
            GraphicsInfo {
                swap_buffer_count: 3,
            },
            move || PlatformStatus {
                current_swap_buffer_index: counter.load(Ordering::SeqCst) % 3,
            },
        );

        assert_eq!(graphics.swap_buffer_count(), 3);
        assert_eq!(graphics.current_swap_buffer_index(), 0);
        frame.store(4, Ordering::SeqCst);
        assert_eq!(graphics.current_swap_buffer_index(), 1);
    }

    #[test]
    fn screen_textures_do_not_keep_graphics_alive() {
        let device = Arc::new(NullDevice::default());
        let graphics = Graphics::headless(Arc::clone(&device), GraphicsInfo::default());
        let size = Vec2I::new(4, 4);
        let image = device
            .create_screen_image(Format::B8G8R8A8Unorm, size)
            .unwrap();

        let screen = graphics.wrap_screen_texture(image, Format::B8G8R8A8Unorm, size);
        let texture = graphics.create_texture(&TextureDesc::default()).unwrap();
        assert!(screen.graphics().is_some());

        drop(graphics);
        assert!(texture.graphics().is_some());
        drop(texture);
        assert!(screen.graphics().is_none());
    }
}
