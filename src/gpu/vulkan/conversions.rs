use ash::vk;

use crate::gpu::driver::state::ResourceState;
use crate::gpu::driver::types::{Format, HeapType, UsageBits};

pub(super) fn lib_to_vk_image_format(fmt: Format) -> vk::Format {
    match fmt {
        Format::Unknown => vk::Format::UNDEFINED,
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::R8G8B8A8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::R8G8B8A8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        Format::B8G8R8A8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::B8G8R8A8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        Format::R16G16B16A16Float => vk::Format::R16G16B16A16_SFLOAT,
        Format::R32G32B32A32Float => vk::Format::R32G32B32A32_SFLOAT,
        Format::D32Float => vk::Format::D32_SFLOAT,
        Format::D24S8 => vk::Format::D24_UNORM_S8_UINT,
    }
}

pub(super) fn aspect_for(fmt: Format) -> vk::ImageAspectFlags {
    match fmt {
        Format::D32Float => vk::ImageAspectFlags::DEPTH,
        Format::D24S8 => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Aspect named by a buffer/image copy. A copy may only name one aspect, and
/// readback of a combined depth-stencil image covers the depth plane.
pub(super) fn copy_aspect_for(fmt: Format) -> vk::ImageAspectFlags {
    if fmt.is_depth() {
        vk::ImageAspectFlags::DEPTH
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

pub(super) fn image_usage(usage: UsageBits) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(UsageBits::SAMPLED) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(UsageBits::RENDER_TARGET) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(UsageBits::DEPTH_STENCIL) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.contains(UsageBits::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(UsageBits::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(super) fn buffer_usage(usage: UsageBits) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST;
    if usage.contains(UsageBits::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(UsageBits::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(UsageBits::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    flags
}

pub(super) fn allocation_info(heap: HeapType) -> vk_mem::AllocationCreateInfo {
    match heap {
        HeapType::DeviceLocal => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        },
        HeapType::HostUpload => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        },
        HeapType::HostReadback => vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferHost,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
            ..Default::default()
        },
    }
}

/// Image layout backing a [`ResourceState`]. Depth formats read through the
/// depth read-only layout instead of the shader one.
pub(super) fn layout_for(state: ResourceState, depth: bool) -> vk::ImageLayout {
    match state {
        ResourceState::GenericRead if depth => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::GenericRead => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ResourceState::CopySource => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ResourceState::CopyDestination => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ResourceState::RenderTarget => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ResourceState::DepthRead => vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
        ResourceState::DepthWrite => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ResourceState::PresentSource => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

fn stage_and_access(state: Option<ResourceState>) -> (vk::PipelineStageFlags, vk::AccessFlags) {
    use vk::{AccessFlags as AF, PipelineStageFlags as PS};

    match state {
        // Freshly created, contents undefined.
        None => (PS::TOP_OF_PIPE, AF::empty()),
        Some(ResourceState::GenericRead) => (
            PS::VERTEX_INPUT | PS::VERTEX_SHADER | PS::FRAGMENT_SHADER,
            AF::SHADER_READ | AF::VERTEX_ATTRIBUTE_READ | AF::INDEX_READ | AF::UNIFORM_READ,
        ),
        Some(ResourceState::CopySource) => (PS::TRANSFER, AF::TRANSFER_READ),
        Some(ResourceState::CopyDestination) => (PS::TRANSFER, AF::TRANSFER_WRITE),
        Some(ResourceState::RenderTarget) => (
            PS::COLOR_ATTACHMENT_OUTPUT,
            AF::COLOR_ATTACHMENT_READ | AF::COLOR_ATTACHMENT_WRITE,
        ),
        Some(ResourceState::DepthRead) => (
            PS::EARLY_FRAGMENT_TESTS | PS::LATE_FRAGMENT_TESTS | PS::FRAGMENT_SHADER,
            AF::DEPTH_STENCIL_ATTACHMENT_READ | AF::SHADER_READ,
        ),
        Some(ResourceState::DepthWrite) => (
            PS::EARLY_FRAGMENT_TESTS | PS::LATE_FRAGMENT_TESTS,
            AF::DEPTH_STENCIL_ATTACHMENT_READ | AF::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        Some(ResourceState::PresentSource) => (PS::BOTTOM_OF_PIPE, AF::empty()),
    }
}

/// src/dst pipeline stages and access masks for a transition. `None` is the
/// undefined layout of a resource that was just created.
pub(super) fn barrier_masks_for_transition(
    before: Option<ResourceState>,
    after: ResourceState,
) -> (
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
) {
    let (src_stage, src_access) = stage_and_access(before);
    let (mut dst_stage, dst_access) = stage_and_access(Some(after));
    // Presenting happens outside the pipeline; nothing to wait for.
    if after == ResourceState::PresentSource {
        dst_stage = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }
    (src_stage, src_access, dst_stage, dst_access)
}
