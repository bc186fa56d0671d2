//! Metal implementation of [`Backend`].
//!
//! Metal tracks hazards on its own, so barriers only exist for the state
//! tracker. Copies go through one blit encoder per transfer and the command
//! buffer's completion wait stands in for fence and event.

use std::ptr::NonNull;

use objc2::rc::Retained;
use objc2::runtime::ProtocolObject;
use objc2_metal::{
    MTLBlitCommandEncoder, MTLBuffer, MTLCommandBuffer, MTLCommandBufferStatus, MTLCommandEncoder,
    MTLCommandQueue, MTLCreateSystemDefaultDevice, MTLDevice, MTLOrigin, MTLPixelFormat,
    MTLResourceOptions, MTLSize, MTLStorageMode, MTLTexture, MTLTextureDescriptor, MTLTextureUsage,
};

use crate::gpu::context::ContextInfo;
use crate::gpu::driver::command::CopyCommand;
use crate::gpu::driver::state::{Barrier, ResourceState};
use crate::gpu::driver::types::{
    DeviceType, Format, HeapType, ResourceDesc, ResourceDimension, UsageBits, Vec2I,
};
use crate::gpu::error::{AllocationError, GPUError, StateError, TransferError, TransferObject};
use crate::gpu::footprint::Footprint;
use crate::gpu::Backend;
use crate::Result;

type Device = ProtocolObject<dyn MTLDevice>;
type Queue = ProtocolObject<dyn MTLCommandQueue>;
type CommandBuffer = ProtocolObject<dyn MTLCommandBuffer>;
type BlitEncoder = ProtocolObject<dyn MTLBlitCommandEncoder>;

fn pixel_format(fmt: Format) -> MTLPixelFormat {
    match fmt {
        Format::Unknown => MTLPixelFormat::Invalid,
        Format::R8Unorm => MTLPixelFormat::R8Unorm,
        Format::R8G8B8A8Unorm => MTLPixelFormat::RGBA8Unorm,
        Format::R8G8B8A8UnormSrgb => MTLPixelFormat::RGBA8Unorm_sRGB,
        Format::B8G8R8A8Unorm => MTLPixelFormat::BGRA8Unorm,
        Format::B8G8R8A8UnormSrgb => MTLPixelFormat::BGRA8Unorm_sRGB,
        Format::R16G16B16A16Float => MTLPixelFormat::RGBA16Float,
        Format::R32G32B32A32Float => MTLPixelFormat::RGBA32Float,
        Format::D32Float => MTLPixelFormat::Depth32Float,
        Format::D24S8 => MTLPixelFormat::Depth24Unorm_Stencil8,
    }
}

fn texture_usage(usage: UsageBits) -> MTLTextureUsage {
    let mut out = MTLTextureUsage::ShaderRead;
    if usage.intersects(UsageBits::RENDER_TARGET | UsageBits::DEPTH_STENCIL) {
        out |= MTLTextureUsage::RenderTarget;
    }
    out
}

enum Raw {
    Buffer(Retained<ProtocolObject<dyn MTLBuffer>>),
    Texture(Retained<ProtocolObject<dyn MTLTexture>>),
}

pub struct MetalResource {
    raw: Raw,
    desc: ResourceDesc,
}

impl MetalResource {
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn texture(&self) -> Option<&ProtocolObject<dyn MTLTexture>> {
        match &self.raw {
            Raw::Texture(t) => Some(t),
            Raw::Buffer(_) => None,
        }
    }

    pub fn buffer(&self) -> Option<&ProtocolObject<dyn MTLBuffer>> {
        match &self.raw {
            Raw::Buffer(b) => Some(b),
            Raw::Texture(_) => None,
        }
    }
}

pub struct MetalTransfer {
    cmd: Option<Retained<CommandBuffer>>,
    blit: Option<Retained<BlitEncoder>>,
    submitted: bool,
    invalid: Option<String>,
}

impl Drop for MetalTransfer {
    fn drop(&mut self) {
        if let Some(blit) = self.blit.take() {
            blit.endEncoding();
        }
        if let Some(cmd) = self.cmd.take() {
            if self.submitted {
                cmd.waitUntilCompleted();
            }
        }
    }
}

pub struct MetalDevice {
    device: Retained<Device>,
    queue: Retained<Queue>,
}

impl MetalDevice {
    pub fn new(info: &ContextInfo) -> Result<Self> {
        if info.validation_requested() {
            log::warn!("metal: validation is controlled by MTL_DEBUG_LAYER, ignoring request");
        }
        let device = MTLCreateSystemDefaultDevice()
            .ok_or_else(|| GPUError::DeviceUnavailable("no system default Metal device".into()))?;
        let queue = device
            .newCommandQueue()
            .ok_or_else(|| GPUError::DeviceUnavailable("newCommandQueue returned nil".into()))?;
        log::info!("Metal device ready");
        Ok(Self { device, queue })
    }

    pub fn raw_device(&self) -> &ProtocolObject<dyn MTLDevice> {
        &self.device
    }

    /// Adopts a drawable's texture.
    pub fn wrap_drawable_texture(
        &self,
        texture: Retained<ProtocolObject<dyn MTLTexture>>,
        format: Format,
        size: Vec2I,
    ) -> MetalResource {
        MetalResource {
            raw: Raw::Texture(texture),
            desc: ResourceDesc::texture_2d(
                format,
                size,
                UsageBits::RENDER_TARGET | UsageBits::COPY_SRC,
                ResourceState::PresentSource,
            ),
        }
    }

    fn blit<'t>(&self, transfer: &'t mut MetalTransfer) -> Option<&'t BlitEncoder> {
        if transfer.blit.is_none() {
            let encoder = transfer.cmd.as_ref()?.blitCommandEncoder();
            if encoder.is_none() {
                transfer.invalid = Some("blitCommandEncoder returned nil".into());
            }
            transfer.blit = encoder;
        }
        transfer.blit.as_deref()
    }
}

impl Backend for MetalDevice {
    type Resource = MetalResource;
    type Transfer = MetalTransfer;

    fn device_type(&self) -> DeviceType {
        DeviceType::Metal
    }

    fn allocate(&self, desc: &ResourceDesc) -> Result<MetalResource> {
        desc.validate()?;
        let raw = match desc.dimension {
            ResourceDimension::Buffer => {
                let options = match desc.heap {
                    HeapType::DeviceLocal => MTLResourceOptions::StorageModePrivate,
                    HeapType::HostUpload | HeapType::HostReadback => MTLResourceOptions::StorageModeShared,
                };
                let buffer = self
                    .device
                    .newBufferWithLength_options(desc.byte_size() as usize, options)
                    .ok_or(AllocationError::OutOfMemory {
                        requested: desc.byte_size(),
                    })?;
                Raw::Buffer(buffer)
            }
            ResourceDimension::Texture2D => {
                let td = unsafe {
                    MTLTextureDescriptor::texture2DDescriptorWithPixelFormat_width_height_mipmapped(
                        pixel_format(desc.format),
                        desc.extent.x as usize,
                        desc.extent.y as usize,
                        false,
                    )
                };
                td.setStorageMode(MTLStorageMode::Private);
                td.setUsage(texture_usage(desc.usage));
                let texture = self.device.newTextureWithDescriptor(&td).ok_or(
                    AllocationError::OutOfMemory {
                        requested: desc.byte_size(),
                    },
                )?;
                Raw::Texture(texture)
            }
        };
        Ok(MetalResource { raw, desc: *desc })
    }

    fn footprint(&self, resource: &MetalResource) -> Footprint {
        match resource.desc.dimension {
            ResourceDimension::Buffer => Footprint::linear(resource.desc.byte_size()),
            ResourceDimension::Texture2D => Footprint::aligned(resource.desc.format, resource.desc.extent, 1),
        }
    }

    fn map(&self, resource: &mut MetalResource) -> Result<NonNull<u8>> {
        if !resource.desc.heap.is_host_visible() {
            return Err(StateError::NotHostVisible.into());
        }
        match &resource.raw {
            Raw::Buffer(buffer) => Ok(buffer.contents().cast::<u8>()),
            Raw::Texture(_) => Err(StateError::NotHostVisible.into()),
        }
    }

    fn unmap(&self, _resource: &mut MetalResource) {}

    fn release(&self, resource: MetalResource) {
        drop(resource);
    }

    fn begin_transfer(&self) -> Result<MetalTransfer> {
        let cmd = self
            .queue
            .commandBuffer()
            .ok_or_else(|| TransferError::create(TransferObject::CommandBuffer, "commandBuffer returned nil"))?;
        Ok(MetalTransfer {
            cmd: Some(cmd),
            blit: None,
            submitted: false,
            invalid: None,
        })
    }

    fn record_copy(&self, transfer: &mut MetalTransfer, copy: CopyCommand<'_, MetalResource>) {
        let Some(blit) = self.blit(transfer) else {
            return;
        };
        let ok = match copy {
            CopyCommand::BufferToTexture {
                src,
                footprint,
                dst,
            } => match (src.buffer(), dst.texture()) {
                (Some(buffer), Some(texture)) => {
                    unsafe {
                        blit.copyFromBuffer_sourceOffset_sourceBytesPerRow_sourceBytesPerImage_sourceSize_toTexture_destinationSlice_destinationLevel_destinationOrigin(
                            buffer,
                            footprint.offset as usize,
                            footprint.row_pitch as usize,
                            footprint.total_size as usize,
                            MTLSize { width: footprint.width as usize, height: footprint.height as usize, depth: 1 },
                            texture,
                            0,
                            0,
                            MTLOrigin { x: 0, y: 0, z: 0 },
                        );
                    }
                    true
                }
                _ => false,
            },
            CopyCommand::TextureToBuffer {
                src,
                dst,
                footprint,
            } => match (src.texture(), dst.buffer()) {
                (Some(texture), Some(buffer)) => {
                    unsafe {
                        blit.copyFromTexture_sourceSlice_sourceLevel_sourceOrigin_sourceSize_toBuffer_destinationOffset_destinationBytesPerRow_destinationBytesPerImage(
                            texture,
                            0,
                            0,
                            MTLOrigin { x: 0, y: 0, z: 0 },
                            MTLSize { width: footprint.width as usize, height: footprint.height as usize, depth: 1 },
                            buffer,
                            footprint.offset as usize,
                            footprint.row_pitch as usize,
                            footprint.total_size as usize,
                        );
                    }
                    true
                }
                _ => false,
            },
            CopyCommand::BufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => match (src.buffer(), dst.buffer()) {
                (Some(from), Some(to)) => {
                    unsafe {
                        blit.copyFromBuffer_sourceOffset_toBuffer_destinationOffset_size(
                            from,
                            src_offset as usize,
                            to,
                            dst_offset as usize,
                            size as usize,
                        );
                    }
                    true
                }
                _ => false,
            },
        };
        if !ok {
            transfer.invalid = Some("copy between mismatched resource kinds".into());
        }
    }

    fn record_barrier(&self, _transfer: &mut MetalTransfer, barrier: Barrier<'_, MetalResource>) {
        log::trace!("metal: {:?} -> {:?} tracked implicitly", barrier.before, barrier.after);
    }

    fn submit(&self, transfer: &mut MetalTransfer) -> Result<()> {
        if let Some(reason) = transfer.invalid.take() {
            return Err(TransferError::Submit(reason).into());
        }
        if let Some(blit) = transfer.blit.take() {
            blit.endEncoding();
        }
        let cmd = transfer
            .cmd
            .as_ref()
            .ok_or_else(|| TransferError::Submit("command buffer missing".into()))?;
        cmd.commit();
        transfer.submitted = true;
        Ok(())
    }

    fn wait(&self, transfer: &mut MetalTransfer) -> Result<()> {
        if !transfer.submitted {
            return Err(TransferError::Wait("nothing was submitted".into()).into());
        }
        let cmd = transfer
            .cmd
            .as_ref()
            .ok_or_else(|| TransferError::Wait("command buffer missing".into()))?;
        cmd.waitUntilCompleted();
        if cmd.status() == MTLCommandBufferStatus::Error {
            return Err(TransferError::Wait("command buffer completed with an error".into()).into());
        }
        Ok(())
    }

    /// The queue is serial, so an empty command buffer completes after
    /// everything submitted before it.
    fn wait_idle(&self) -> Result<()> {
        let cmd = self
            .queue
            .commandBuffer()
            .ok_or_else(|| TransferError::create(TransferObject::CommandBuffer, "commandBuffer returned nil"))?;
        cmd.commit();
        cmd.waitUntilCompleted();
        Ok(())
    }
}
