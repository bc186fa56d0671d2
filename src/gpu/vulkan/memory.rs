use ash::vk;
use vk_mem::Alloc;

use super::conversions::{
    allocation_info, aspect_for, buffer_usage, copy_aspect_for, image_usage,
    lib_to_vk_image_format,
};
use super::VulkanDevice;
use crate::gpu::driver::types::{Format, ResourceDesc, UsageBits, Vec2I};
use crate::gpu::driver::state::ResourceState;
use crate::gpu::error::AllocationError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Raw {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

/// A buffer or image and the vk-mem allocation backing it.
///
/// Swap-chain images have no allocation and are never destroyed here.
#[derive(Debug)]
pub struct VulkanResource {
    pub(super) raw: Raw,
    pub(super) alloc: Option<vk_mem::Allocation>,
    pub(super) desc: ResourceDesc,
}

impl VulkanResource {
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    pub fn buffer(&self) -> Option<vk::Buffer> {
        match self.raw {
            Raw::Buffer(b) => Some(b),
            Raw::Image(_) => None,
        }
    }

    pub fn image(&self) -> Option<vk::Image> {
        match self.raw {
            Raw::Image(i) => Some(i),
            Raw::Buffer(_) => None,
        }
    }

    pub(super) fn aspect(&self) -> vk::ImageAspectFlags {
        aspect_for(self.desc.format)
    }

    pub(super) fn copy_aspect(&self) -> vk::ImageAspectFlags {
        copy_aspect_for(self.desc.format)
    }
}

fn native(err: vk::Result, requested: u64) -> AllocationError {
    match err {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            AllocationError::OutOfMemory { requested }
        }
        other => AllocationError::Native(other.to_string()),
    }
}

impl VulkanDevice {
    pub(super) fn create_buffer(&self, desc: &ResourceDesc) -> Result<VulkanResource> {
        let (buffer, allocation) = unsafe {
            self.allocator.create_buffer(
                &vk::BufferCreateInfo::builder()
                    .size(desc.byte_size())
                    .usage(buffer_usage(desc.usage))
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &allocation_info(desc.heap),
            )
        }
        .map_err(|e| native(e, desc.byte_size()))?;

        Ok(VulkanResource {
            raw: Raw::Buffer(buffer),
            alloc: Some(allocation),
            desc: *desc,
        })
    }

    /// Creates the image and moves it out of `UNDEFINED` into
    /// `desc.initial_state` before handing it out.
    pub(super) fn create_image(&self, desc: &ResourceDesc) -> Result<VulkanResource> {
        let (image, allocation) = unsafe {
            self.allocator.create_image(
                &vk::ImageCreateInfo::builder()
                    .extent(vk::Extent3D {
                        width: desc.extent.x as u32,
                        height: desc.extent.y as u32,
                        depth: 1,
                    })
                    .array_layers(1)
                    .format(lib_to_vk_image_format(desc.format))
                    .mip_levels(1)
                    .initial_layout(vk::ImageLayout::UNDEFINED)
                    .usage(image_usage(desc.usage))
                    .image_type(vk::ImageType::TYPE_2D)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .tiling(vk::ImageTiling::OPTIMAL)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .build(),
                &allocation_info(desc.heap),
            )
        }
        .map_err(|e| native(e, desc.byte_size()))?;

        let resource = VulkanResource {
            raw: Raw::Image(image),
            alloc: Some(allocation),
            desc: *desc,
        };

        if let Err(err) = self.initialize_layout(&resource) {
            self.destroy(resource);
            return Err(err);
        }
        Ok(resource)
    }

    /// Adopts an image owned elsewhere, typically by a swap chain. The image
    /// must currently be in `PRESENT_SRC_KHR`.
    pub fn wrap_swapchain_image(&self, image: vk::Image, format: Format, size: Vec2I) -> VulkanResource {
        VulkanResource {
            raw: Raw::Image(image),
            alloc: None,
            desc: ResourceDesc::texture_2d(
                format,
                size,
                UsageBits::RENDER_TARGET | UsageBits::COPY_SRC,
                ResourceState::PresentSource,
            ),
        }
    }

    pub(super) fn destroy(&self, mut resource: VulkanResource) {
        let Some(mut alloc) = resource.alloc.take() else {
            return;
        };
        unsafe {
            match resource.raw {
                Raw::Buffer(buffer) => self.allocator.destroy_buffer(buffer, &mut alloc),
                Raw::Image(image) => self.allocator.destroy_image(image, &mut alloc),
            }
        }
    }
}
