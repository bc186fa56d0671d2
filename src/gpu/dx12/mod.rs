//! Direct3D 12 implementation of [`Backend`].
//!
//! Every one-shot transfer creates its own command allocator, command list,
//! command queue, fence and Win32 event, so uploads never interleave with
//! the frame's main queue.

use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use windows::core::{ComInterface, PCSTR};
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::{CreateDXGIFactory1, IDXGIAdapter1, IDXGIFactory4};
use windows::Win32::System::Threading::{CreateEventA, WaitForSingleObject, INFINITE};

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

fn dxgi_format(fmt: Format) -> DXGI_FORMAT {
    match fmt {
        Format::Unknown => DXGI_FORMAT_UNKNOWN,
        Format::R8Unorm => DXGI_FORMAT_R8_UNORM,
        Format::R8G8B8A8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        Format::R8G8B8A8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        Format::B8G8R8A8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        Format::B8G8R8A8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        Format::R16G16B16A16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        Format::R32G32B32A32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        Format::D32Float => DXGI_FORMAT_D32_FLOAT,
        Format::D24S8 => DXGI_FORMAT_D24_UNORM_S8_UINT,
    }
}

fn native_state(state: ResourceState) -> D3D12_RESOURCE_STATES {
    match state {
        ResourceState::GenericRead => D3D12_RESOURCE_STATE_GENERIC_READ,
        ResourceState::CopySource => D3D12_RESOURCE_STATE_COPY_SOURCE,
        ResourceState::CopyDestination => D3D12_RESOURCE_STATE_COPY_DEST,
        ResourceState::RenderTarget => D3D12_RESOURCE_STATE_RENDER_TARGET,
        ResourceState::DepthRead => D3D12_RESOURCE_STATE_DEPTH_READ,
        ResourceState::DepthWrite => D3D12_RESOURCE_STATE_DEPTH_WRITE,
        ResourceState::PresentSource => D3D12_RESOURCE_STATE_PRESENT,
    }
}

fn heap_type(heap: HeapType) -> D3D12_HEAP_TYPE {
    match heap {
        HeapType::DeviceLocal => D3D12_HEAP_TYPE_DEFAULT,
        HeapType::HostUpload => D3D12_HEAP_TYPE_UPLOAD,
        HeapType::HostReadback => D3D12_HEAP_TYPE_READBACK,
    }
}

fn resource_desc(desc: &ResourceDesc) -> D3D12_RESOURCE_DESC {
    match desc.dimension {
        ResourceDimension::Buffer => D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: desc.byte_size(),
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        },
        ResourceDimension::Texture2D => {
            let mut flags = D3D12_RESOURCE_FLAG_NONE;
            if desc.usage.contains(UsageBits::RENDER_TARGET) {
                flags |= D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET;
            }
            if desc.usage.contains(UsageBits::DEPTH_STENCIL) {
                flags |= D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL;
            }
            D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                Width: desc.extent.x as u64,
                Height: desc.extent.y as u32,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: dxgi_format(desc.format),
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
                Flags: flags,
                ..Default::default()
            }
        }
    }
}

/// Borrowed COM pointer for descriptor structs that never release it.
fn weak_ref(resource: &ID3D12Resource) -> ManuallyDrop<Option<ID3D12Resource>> {
    unsafe { std::mem::transmute_copy(resource) }
}

pub struct Dx12Resource {
    raw: ID3D12Resource,
    desc: ResourceDesc,
}

impl Dx12Resource {
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn raw(&self) -> &ID3D12Resource {
        &self.raw
    }
}

/// Objects of one one-shot transfer, released in reverse creation order.
pub struct Dx12Transfer {
    allocator: Option<ID3D12CommandAllocator>,
    list: Option<ID3D12GraphicsCommandList>,
    queue: Option<ID3D12CommandQueue>,
    fence: Option<ID3D12Fence>,
    event: Option<HANDLE>,
    submitted: bool,
    invalid: Option<String>,
}

impl Drop for Dx12Transfer {
    fn drop(&mut self) {
        if self.submitted {
            // The allocator must outlive the work recorded from it.
            if let (Some(fence), Some(event)) = (&self.fence, self.event) {
                unsafe {
                    if fence.GetCompletedValue() < 1 && fence.SetEventOnCompletion(1, event).is_ok() {
                        WaitForSingleObject(event, INFINITE);
                    }
                }
            }
        }
        if let Some(event) = self.event.take() {
            if let Err(err) = unsafe { CloseHandle(event) } {
                log::warn!("dx12: closing transfer event failed: {err}");
            }
        }
        self.fence = None;
        self.queue = None;
        self.list = None;
        self.allocator = None;
    }
}

impl Dx12Transfer {
    fn list(&self) -> Option<&ID3D12GraphicsCommandList> {
        self.list.as_ref()
    }
}

pub struct Dx12Device {
    #[allow(dead_code)]
    factory: IDXGIFactory4,
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    idle_fence: ID3D12Fence,
    idle_value: AtomicU64,
}

impl Dx12Device {
    pub fn new(info: &ContextInfo) -> Result<Self> {
        let validation = info.validation_requested();
        if validation {
            let mut debug: Option<ID3D12Debug> = None;
            match unsafe { D3D12GetDebugInterface(&mut debug) } {
                Ok(()) => {
                    if let Some(debug) = debug {
                        unsafe { debug.EnableDebugLayer() };
                    }
                }
                Err(err) => log::warn!("dx12: debug layer unavailable: {err}"),
            }
        }

        let factory: IDXGIFactory4 = unsafe { CreateDXGIFactory1() }?;
        let adapter: IDXGIAdapter1 = unsafe { factory.EnumAdapters1(info.device_id as u32) }
            .map_err(|err| GPUError::DeviceUnavailable(format!("adapter {}: {err}", info.device_id)))?;

        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, &mut device) }?;
        let device = device.ok_or_else(|| GPUError::DeviceUnavailable("D3D12CreateDevice returned no device".into()))?;

        let queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }?;
        let idle_fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }?;

        let desc = unsafe { adapter.GetDesc1() }?;
        let name_len = desc.Description.iter().position(|&c| c == 0).unwrap_or(desc.Description.len());
        log::info!(
            "DirectX 12 device {} (validation {validation})",
            String::from_utf16_lossy(&desc.Description[..name_len])
        );

        Ok(Self {
            factory,
            device,
            queue,
            idle_fence,
            idle_value: AtomicU64::new(0),
        })
    }

    pub fn raw_device(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn queue(&self) -> &ID3D12CommandQueue {
        &self.queue
    }

    /// Adopts a swap-chain buffer, currently in `D3D12_RESOURCE_STATE_PRESENT`.
    pub fn wrap_swapchain_buffer(&self, raw: ID3D12Resource, format: Format, size: Vec2I) -> Dx12Resource {
        Dx12Resource {
            raw,
            desc: ResourceDesc::texture_2d(
                format,
                size,
                UsageBits::RENDER_TARGET | UsageBits::COPY_SRC,
                ResourceState::PresentSource,
            ),
        }
    }

    fn create_transfer_objects(&self, transfer: &mut Dx12Transfer) -> std::result::Result<(), TransferError> {
        let allocator: ID3D12CommandAllocator =
            unsafe { self.device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .map_err(|e| TransferError::create(TransferObject::CommandAllocator, e))?;
        let list: ID3D12GraphicsCommandList = unsafe {
            self.device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &allocator,
                None::<&ID3D12PipelineState>,
            )
        }
        .map_err(|e| TransferError::create(TransferObject::CommandBuffer, e))?;
        transfer.allocator = Some(allocator);
        transfer.list = Some(list);

        let queue: ID3D12CommandQueue = unsafe {
            self.device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                ..Default::default()
            })
        }
        .map_err(|e| TransferError::create(TransferObject::Queue, e))?;
        transfer.queue = Some(queue);

        let fence: ID3D12Fence = unsafe { self.device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .map_err(|e| TransferError::create(TransferObject::Fence, e))?;
        transfer.fence = Some(fence);

        let event = unsafe { CreateEventA(None, false, false, PCSTR::null()) }
            .map_err(|e| TransferError::create(TransferObject::Event, e))?;
        transfer.event = Some(event);
        Ok(())
    }
}

impl Backend for Dx12Device {
    type Resource = Dx12Resource;
    type Transfer = Dx12Transfer;

    fn device_type(&self) -> DeviceType {
        DeviceType::DirectX12
    }

    fn allocate(&self, desc: &ResourceDesc) -> Result<Dx12Resource> {
        desc.validate()?;

        let heap_props = D3D12_HEAP_PROPERTIES {
            Type: heap_type(desc.heap),
            CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
            MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
            CreationNodeMask: 1,
            VisibleNodeMask: 1,
        };
        let native_desc = resource_desc(desc);

        let mut raw: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap_props,
                D3D12_HEAP_FLAG_NONE,
                &native_desc,
                native_state(desc.initial_state),
                None,
                &mut raw,
            )
        }
        .map_err(|err| {
            if err.code() == windows::Win32::Foundation::E_OUTOFMEMORY {
                AllocationError::OutOfMemory {
                    requested: desc.byte_size(),
                }
            } else {
                AllocationError::Native(err.to_string())
            }
        })?;
        let raw = raw.ok_or_else(|| AllocationError::Native("CreateCommittedResource returned nothing".into()))?;

        log::debug!(
            "dx12: allocated {:?} {:?} {}x{} in {:?}",
            desc.dimension,
            desc.format,
            desc.extent.x,
            desc.extent.y,
            desc.heap
        );
        Ok(Dx12Resource { raw, desc: *desc })
    }

    /// Rows are padded to `D3D12_TEXTURE_DATA_PITCH_ALIGNMENT`, as reported by
    /// `GetCopyableFootprints`.
    fn footprint(&self, resource: &Dx12Resource) -> Footprint {
        let native_desc = unsafe { resource.raw.GetDesc() };
        let mut layout = D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default();
        let mut rows = 0u32;
        let mut row_size = 0u64;
        let mut total = 0u64;
        unsafe {
            self.device.GetCopyableFootprints(
                &native_desc,
                0,
                1,
                0,
                Some(&mut layout),
                Some(&mut rows),
                Some(&mut row_size),
                Some(&mut total),
            );
        }

        let format = match resource.desc.dimension {
            ResourceDimension::Buffer => Format::Unknown,
            ResourceDimension::Texture2D => resource.desc.format,
        };
        Footprint {
            offset: layout.Offset,
            format,
            width: layout.Footprint.Width,
            height: rows,
            row_pitch: layout.Footprint.RowPitch,
            total_size: total,
        }
    }

    fn map(&self, resource: &mut Dx12Resource) -> Result<NonNull<u8>> {
        if !resource.desc.heap.is_host_visible() {
            return Err(StateError::NotHostVisible.into());
        }
        let mut data = std::ptr::null_mut();
        unsafe { resource.raw.Map(0, None, Some(&mut data)) }?;
        NonNull::new(data as *mut u8).ok_or_else(|| StateError::NotAllocated.into())
    }

    fn unmap(&self, resource: &mut Dx12Resource) {
        unsafe { resource.raw.Unmap(0, None) };
    }

    fn release(&self, resource: Dx12Resource) {
        drop(resource);
    }

    fn begin_transfer(&self) -> Result<Dx12Transfer> {
        let mut transfer = Dx12Transfer {
            allocator: None,
            list: None,
            queue: None,
            fence: None,
            event: None,
            submitted: false,
            invalid: None,
        };
        self.create_transfer_objects(&mut transfer)?;
        Ok(transfer)
    }

    fn record_copy(&self, transfer: &mut Dx12Transfer, copy: CopyCommand<'_, Dx12Resource>) {
        let Some(list) = transfer.list().cloned() else {
            return;
        };

        match copy {
            CopyCommand::BufferToTexture {
                src,
                footprint,
                dst,
            } => {
                let src_loc = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: weak_ref(&src.raw),
                    Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        PlacedFootprint: placed(&footprint),
                    },
                };
                let dst_loc = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: weak_ref(&dst.raw),
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        SubresourceIndex: 0,
                    },
                };
                unsafe { list.CopyTextureRegion(&dst_loc, 0, 0, 0, &src_loc, None) };
            }
            CopyCommand::TextureToBuffer {
                src,
                dst,
                footprint,
            } => {
                let src_loc = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: weak_ref(&src.raw),
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        SubresourceIndex: 0,
                    },
                };
                let dst_loc = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: weak_ref(&dst.raw),
                    Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        PlacedFootprint: placed(&footprint),
                    },
                };
                unsafe { list.CopyTextureRegion(&dst_loc, 0, 0, 0, &src_loc, None) };
            }
            CopyCommand::BufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                if src.desc.dimension != ResourceDimension::Buffer
                    || dst.desc.dimension != ResourceDimension::Buffer
                {
                    transfer.invalid = Some("buffer copy between non-buffer resources".into());
                    return;
                }
                unsafe { list.CopyBufferRegion(&dst.raw, dst_offset, &src.raw, src_offset, size) };
            }
        }
    }

    fn record_barrier(&self, transfer: &mut Dx12Transfer, barrier: Barrier<'_, Dx12Resource>) {
        let Some(list) = transfer.list() else {
            return;
        };
        let native = D3D12_RESOURCE_BARRIER {
            Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
            Anonymous: D3D12_RESOURCE_BARRIER_0 {
                Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                    pResource: weak_ref(&barrier.resource.raw),
                    StateBefore: native_state(barrier.before),
                    StateAfter: native_state(barrier.after),
                    Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                }),
            },
        };
        unsafe { list.ResourceBarrier(&[native]) };
    }

    fn submit(&self, transfer: &mut Dx12Transfer) -> Result<()> {
        if let Some(reason) = transfer.invalid.take() {
            return Err(TransferError::Submit(reason).into());
        }
        let (Some(list), Some(queue), Some(fence)) = (&transfer.list, &transfer.queue, &transfer.fence) else {
            return Err(TransferError::Submit("transfer objects missing".into()).into());
        };

        let submit = || -> windows::core::Result<()> {
            unsafe {
                list.Close()?;
                queue.ExecuteCommandLists(&[Some(list.cast::<ID3D12CommandList>()?)]);
                queue.Signal(fence, 1)
            }
        };
        submit().map_err(|e| TransferError::Submit(e.to_string()))?;
        transfer.submitted = true;
        Ok(())
    }

    fn wait(&self, transfer: &mut Dx12Transfer) -> Result<()> {
        if !transfer.submitted {
            return Err(TransferError::Wait("nothing was submitted".into()).into());
        }
        let (Some(fence), Some(event)) = (&transfer.fence, transfer.event) else {
            return Err(TransferError::Wait("transfer objects missing".into()).into());
        };
        unsafe {
            if fence.GetCompletedValue() < 1 {
                fence
                    .SetEventOnCompletion(1, event)
                    .map_err(|e| TransferError::Wait(e.to_string()))?;
                WaitForSingleObject(event, INFINITE);
            }
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let value = self.idle_value.fetch_add(1, Ordering::SeqCst) + 1;
        unsafe {
            self.queue.Signal(&self.idle_fence, value)?;
            if self.idle_fence.GetCompletedValue() < value {
                let event = CreateEventA(None, false, false, PCSTR::null())?;
                let waited = self.idle_fence.SetEventOnCompletion(value, event);
                if waited.is_ok() {
                    WaitForSingleObject(event, INFINITE);
                }
                let _ = CloseHandle(event);
                waited?;
            }
        }
        Ok(())
    }
}

fn placed(footprint: &Footprint) -> D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
    D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
        Offset: footprint.offset,
        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
            Format: dxgi_format(footprint.format),
            Width: footprint.width,
            Height: footprint.height,
            Depth: 1,
            RowPitch: footprint.row_pitch,
        },
    }
}
