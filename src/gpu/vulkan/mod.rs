//! Vulkan implementation of [`Backend`] on top of `ash` and `vk-mem`.

use std::ffi::{c_char, c_void, CStr, CString};
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use ash::{vk, Entry};

use crate::gpu::context::ContextInfo;
use crate::gpu::driver::command::CopyCommand;
use crate::gpu::driver::state::Barrier;
use crate::gpu::driver::types::{DeviceType, HeapType, ResourceDesc, ResourceDimension};
use crate::gpu::error::{GPUError, StateError};
use crate::gpu::footprint::Footprint;
use crate::gpu::Backend;
use crate::Result;

mod command_pool;
mod conversions;
mod memory;

pub use command_pool::VulkanTransfer;
pub use memory::VulkanResource;

use conversions::{barrier_masks_for_transition, layout_for};
use memory::Raw;

/// Names of debugging layers that should be enabled when validation is requested.
pub const DEBUG_LAYER_NAMES: [*const c_char; 1] =
    [b"VK_LAYER_KHRONOS_validation\0".as_ptr() as *const c_char];

unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut c_void,
) -> vk::Bool32 {
    let message = unsafe { CStr::from_ptr((*p_callback_data).p_message) }.to_string_lossy();
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::error!("[{message_type:?}] {message}"),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::warn!("[{message_type:?}] {message}"),
        _ => log::debug!("[{message_type:?}] {message}"),
    }
    vk::FALSE
}

pub(super) struct Queue {
    queue: vk::Queue,
    family: u32,
}

pub struct VulkanDevice {
    #[allow(dead_code)]
    entry: Entry,
    instance: ash::Instance,
    device: ash::Device,
    properties: vk::PhysicalDeviceProperties,
    allocator: ManuallyDrop<vk_mem::Allocator>,
    queue: Queue,
    debug_utils: Option<ash::extensions::ext::DebugUtils>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
}

impl VulkanDevice {
    /// Creates an instance, device and allocator without any surface
    /// support. Uploads and captures all go through the first queue family
    /// with graphics support.
    pub fn headless(info: &ContextInfo) -> Result<Self> {
        let enable_validation = info.validation_requested();

        let app_name = CString::new(info.debug_name.as_str()).unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .api_version(vk::make_api_version(0, 1, 2, 0))
            .build();

        let entry = unsafe { Entry::load() }?;
        let mut inst_exts = Vec::new();
        let mut inst_layers = Vec::new();
        if enable_validation {
            inst_exts.push(ash::extensions::ext::DebugUtils::name().as_ptr());
            let available_layers = entry.enumerate_instance_layer_properties()?;
            for &layer in &DEBUG_LAYER_NAMES {
                let name = unsafe { CStr::from_ptr(layer) };
                if available_layers
                    .iter()
                    .any(|prop| unsafe { CStr::from_ptr(prop.layer_name.as_ptr()) == name })
                {
                    inst_layers.push(layer);
                }
            }
        }

        let instance = unsafe {
            entry.create_instance(
                &vk::InstanceCreateInfo::builder()
                    .application_info(&app_info)
                    .enabled_extension_names(&inst_exts)
                    .enabled_layer_names(&inst_layers)
                    .build(),
                None,
            )
        }?;

        let pdevices = unsafe { instance.enumerate_physical_devices() }?;
        let Some(&pdevice) = pdevices.get(info.device_id) else {
            unsafe { instance.destroy_instance(None) };
            return Err(GPUError::DeviceUnavailable(format!(
                "no physical device at index {} ({} found)",
                info.device_id,
                pdevices.len()
            )));
        };
        let properties = unsafe { instance.get_physical_device_properties(pdevice) };
        let queue_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        let Some(family) = queue_props
            .iter()
            .position(|p| p.queue_flags.contains(vk::QueueFlags::GRAPHICS))
            .map(|i| i as u32)
        else {
            unsafe { instance.destroy_instance(None) };
            return Err(GPUError::DeviceUnavailable("no graphics queue family".into()));
        };

        let priorities = [1.0f32];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(family)
            .queue_priorities(&priorities)
            .build()];
        let device = match unsafe {
            instance.create_device(
                pdevice,
                &vk::DeviceCreateInfo::builder()
                    .queue_create_infos(&queue_infos)
                    .build(),
                None,
            )
        } {
            Ok(device) => device,
            Err(err) => {
                unsafe { instance.destroy_instance(None) };
                return Err(err.into());
            }
        };
        let queue = unsafe { device.get_device_queue(family, 0) };

        let allocator = match vk_mem::Allocator::new(vk_mem::AllocatorCreateInfo::new(
            &instance, &device, pdevice,
        )) {
            Ok(allocator) => allocator,
            Err(err) => {
                unsafe {
                    device.destroy_device(None);
                    instance.destroy_instance(None);
                }
                return Err(err.into());
            }
        };

        let (debug_utils, debug_messenger) = if enable_validation {
            let debug_utils = ash::extensions::ext::DebugUtils::new(&entry, &instance);
            let messenger_ci = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));
            let messenger = unsafe { debug_utils.create_debug_utils_messenger(&messenger_ci, None) }
                .map_err(|err| log::warn!("validation messenger unavailable: {err}"))
                .ok();
            (Some(debug_utils), messenger)
        } else {
            (None, None)
        };

        let name = unsafe { CStr::from_ptr(properties.device_name.as_ptr()) };
        log::info!(
            "Vulkan device {} (queue family {family}, validation {enable_validation})",
            name.to_string_lossy()
        );

        Ok(Self {
            entry,
            instance,
            device,
            properties,
            allocator: ManuallyDrop::new(allocator),
            queue: Queue { queue, family },
            debug_utils,
            debug_messenger,
        })
    }

    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    pub fn properties(&self) -> &vk::PhysicalDeviceProperties {
        &self.properties
    }

    /// One-shot `UNDEFINED -> initial_state` transition of a new image.
    fn initialize_layout(&self, resource: &VulkanResource) -> Result<()> {
        let Raw::Image(image) = resource.raw else {
            return Ok(());
        };
        let mut transfer = self.begin_transfer()?;
        let depth = resource.desc.format.is_depth();
        let after = resource.desc.initial_state;
        let (src_stage, src_access, dst_stage, dst_access) = barrier_masks_for_transition(None, after);
        let barrier = vk::ImageMemoryBarrier::builder()
            .image(image)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(layout_for(after, depth))
            .src_access_mask(src_access)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(full_range(resource.aspect()))
            .build();
        unsafe {
            self.device.cmd_pipeline_barrier(
                transfer.cmd,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        transfer.submit()?;
        transfer.wait()
    }
}

fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: aspect,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn copy_region(footprint: &Footprint, aspect: vk::ImageAspectFlags) -> vk::BufferImageCopy {
    vk::BufferImageCopy {
        buffer_offset: footprint.offset,
        // Texels, not bytes.
        buffer_row_length: footprint.row_pitch / footprint.format.bytes_per_pixel(),
        buffer_image_height: 0,
        image_subresource: vk::ImageSubresourceLayers {
            aspect_mask: aspect,
            mip_level: 0,
            base_array_layer: 0,
            layer_count: 1,
        },
        image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
        image_extent: vk::Extent3D {
            width: footprint.width,
            height: footprint.height,
            depth: 1,
        },
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();
            if let (Some(utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger.take()) {
                utils.destroy_debug_utils_messenger(messenger, None);
            }
            // Destroy allocator before tearing down device and instance
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
            self.instance.destroy_instance(None);
        }
    }
}

impl Backend for VulkanDevice {
    type Resource = VulkanResource;
    type Transfer = VulkanTransfer;

    fn device_type(&self) -> DeviceType {
        DeviceType::Vulkan
    }

    fn allocate(&self, desc: &ResourceDesc) -> Result<VulkanResource> {
        desc.validate()?;
        log::debug!(
            "vulkan: allocating {:?} {:?} {}x{} in {:?}",
            desc.dimension,
            desc.format,
            desc.extent.x,
            desc.extent.y,
            desc.heap
        );
        match desc.dimension {
            ResourceDimension::Buffer => self.create_buffer(desc),
            ResourceDimension::Texture2D => self.create_image(desc),
        }
    }

    /// Vulkan copies take their row length in texels, so rows stay tight.
    fn footprint(&self, resource: &VulkanResource) -> Footprint {
        let desc = &resource.desc;
        match desc.dimension {
            ResourceDimension::Buffer => Footprint::linear(desc.byte_size()),
            ResourceDimension::Texture2D => Footprint::aligned(desc.format, desc.extent, 1),
        }
    }

    fn map(&self, resource: &mut VulkanResource) -> Result<NonNull<u8>> {
        if !resource.desc.heap.is_host_visible() {
            return Err(StateError::NotHostVisible.into());
        }
        let alloc = resource.alloc.as_mut().ok_or(StateError::NotAllocated)?;
        if resource.desc.heap == HeapType::HostReadback {
            self.allocator
                .invalidate_allocation(alloc, 0, vk::WHOLE_SIZE as usize)?;
        }
        let ptr = unsafe { self.allocator.map_memory(alloc) }?;
        NonNull::new(ptr).ok_or_else(|| StateError::NotAllocated.into())
    }

    fn unmap(&self, resource: &mut VulkanResource) {
        let heap = resource.desc.heap;
        let Some(alloc) = resource.alloc.as_mut() else {
            return;
        };
        if heap == HeapType::HostUpload {
            if let Err(err) = self.allocator.flush_allocation(alloc, 0, vk::WHOLE_SIZE as usize) {
                log::warn!("vulkan: flushing upload memory failed: {err}");
            }
        }
        unsafe { self.allocator.unmap_memory(alloc) };
    }

    fn release(&self, resource: VulkanResource) {
        self.destroy(resource);
    }

    fn begin_transfer(&self) -> Result<VulkanTransfer> {
        VulkanTransfer::begin(&self.device, self.queue.queue, self.queue.family)
    }

    fn record_copy(&self, transfer: &mut VulkanTransfer, copy: CopyCommand<'_, VulkanResource>) {
        match copy {
            CopyCommand::BufferToTexture {
                src,
                footprint,
                dst,
            } => match (src.raw, dst.raw) {
                (Raw::Buffer(buffer), Raw::Image(image)) => unsafe {
                    log::trace!("vulkan: buffer -> image {}x{}", footprint.width, footprint.height);
                    self.device.cmd_copy_buffer_to_image(
                        transfer.cmd,
                        buffer,
                        image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &[copy_region(&footprint, dst.copy_aspect())],
                    );
                },
                _ => transfer.invalid = Some("buffer-to-image copy between wrong resource kinds".into()),
            },
            CopyCommand::TextureToBuffer {
                src,
                dst,
                footprint,
            } => match (src.raw, dst.raw) {
                (Raw::Image(image), Raw::Buffer(buffer)) => unsafe {
                    log::trace!("vulkan: image -> buffer {}x{}", footprint.width, footprint.height);
                    self.device.cmd_copy_image_to_buffer(
                        transfer.cmd,
                        image,
                        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                        buffer,
                        &[copy_region(&footprint, src.copy_aspect())],
                    );
                },
                _ => transfer.invalid = Some("image-to-buffer copy between wrong resource kinds".into()),
            },
            CopyCommand::BufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => match (src.raw, dst.raw) {
                (Raw::Buffer(from), Raw::Buffer(to)) => unsafe {
                    self.device.cmd_copy_buffer(
                        transfer.cmd,
                        from,
                        to,
                        &[vk::BufferCopy {
                            src_offset,
                            dst_offset,
                            size,
                        }],
                    );
                },
                _ => transfer.invalid = Some("buffer copy between non-buffer resources".into()),
            },
        }
    }

    fn record_barrier(&self, transfer: &mut VulkanTransfer, barrier: Barrier<'_, VulkanResource>) {
        let (src_stage, src_access, dst_stage, dst_access) =
            barrier_masks_for_transition(Some(barrier.before), barrier.after);
        let resource = barrier.resource;

        unsafe {
            match resource.raw {
                Raw::Image(image) => {
                    let depth = resource.desc.format.is_depth();
                    let vk_barrier = vk::ImageMemoryBarrier::builder()
                        .image(image)
                        .old_layout(layout_for(barrier.before, depth))
                        .new_layout(layout_for(barrier.after, depth))
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .subresource_range(full_range(resource.aspect()))
                        .build();
                    self.device.cmd_pipeline_barrier(
                        transfer.cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[vk_barrier],
                    );
                }
                Raw::Buffer(buffer) => {
                    let vk_barrier = vk::BufferMemoryBarrier::builder()
                        .buffer(buffer)
                        .offset(0)
                        .size(vk::WHOLE_SIZE)
                        .src_access_mask(src_access)
                        .dst_access_mask(dst_access)
                        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                        .build();
                    self.device.cmd_pipeline_barrier(
                        transfer.cmd,
                        src_stage,
                        dst_stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[vk_barrier],
                        &[],
                    );
                }
            }
        }
    }

    fn submit(&self, transfer: &mut VulkanTransfer) -> Result<()> {
        transfer.submit()
    }

    fn wait(&self, transfer: &mut VulkanTransfer) -> Result<()> {
        transfer.wait()
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }
}
