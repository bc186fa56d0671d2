use ash::{vk, Device};

use crate::gpu::error::{TransferError, TransferObject};
use crate::Result;

/// Transient command pool, command buffer and fence of one one-shot
/// transfer.
///
/// Handles are filled in as they are created; `Drop` destroys whatever was
/// created, in reverse order. The fence doubles as the host wait handle, so
/// no separate event object exists on Vulkan.
pub struct VulkanTransfer {
    device: Device,
    pub(super) queue: vk::Queue,
    pool: vk::CommandPool,
    pub(super) cmd: vk::CommandBuffer,
    pub(super) fence: vk::Fence,
    pub(super) submitted: bool,
    /// Set when a recorded command could not be encoded; fails the submit.
    pub(super) invalid: Option<String>,
}

impl VulkanTransfer {
    /// Creates the pool, allocates a primary command buffer, creates the
    /// fence and opens the command buffer for one-time submission.
    pub(super) fn begin(device: &Device, queue: vk::Queue, family: u32) -> Result<Self> {
        let mut transfer = Self {
            device: device.clone(),
            queue,
            pool: vk::CommandPool::null(),
            cmd: vk::CommandBuffer::null(),
            fence: vk::Fence::null(),
            submitted: false,
            invalid: None,
        };

        let ci = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .build();
        transfer.pool = unsafe { device.create_command_pool(&ci, None) }
            .map_err(|e| TransferError::create(TransferObject::CommandAllocator, e))?;

        let cmds = unsafe {
            device.allocate_command_buffers(
                &vk::CommandBufferAllocateInfo::builder()
                    .command_pool(transfer.pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1)
                    .build(),
            )
        }
        .map_err(|e| TransferError::create(TransferObject::CommandBuffer, e))?;
        transfer.cmd = cmds[0];

        transfer.fence = unsafe {
            device.create_fence(
                &vk::FenceCreateInfo::builder()
                    .flags(vk::FenceCreateFlags::empty())
                    .build(),
                None,
            )
        }
        .map_err(|e| TransferError::create(TransferObject::Fence, e))?;

        unsafe {
            device.begin_command_buffer(
                transfer.cmd,
                &vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
                    .build(),
            )
        }
        .map_err(|e| TransferError::create(TransferObject::CommandBuffer, e))?;

        Ok(transfer)
    }

    pub(super) fn submit(&mut self) -> Result<()> {
        if let Some(reason) = self.invalid.take() {
            return Err(TransferError::Submit(reason).into());
        }
        unsafe {
            self.device
                .end_command_buffer(self.cmd)
                .map_err(|e| TransferError::Submit(e.to_string()))?;
            let cmds = [self.cmd];
            let submit = vk::SubmitInfo::builder().command_buffers(&cmds).build();
            self.device
                .queue_submit(self.queue, &[submit], self.fence)
                .map_err(|e| TransferError::Submit(e.to_string()))?;
        }
        self.submitted = true;
        Ok(())
    }

    pub(super) fn wait(&mut self) -> Result<()> {
        if !self.submitted {
            return Err(TransferError::Wait("nothing was submitted".into()).into());
        }
        unsafe {
            self.device
                .wait_for_fences(&[self.fence], true, u64::MAX)
                .map_err(|e| TransferError::Wait(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for VulkanTransfer {
    fn drop(&mut self) {
        unsafe {
            if self.submitted {
                // A failed wait still leaves work in flight.
                let _ = self.device.wait_for_fences(&[self.fence], true, u64::MAX);
            }
            if self.fence != vk::Fence::null() {
                self.device.destroy_fence(self.fence, None);
            }
            if self.cmd != vk::CommandBuffer::null() {
                self.device.free_command_buffers(self.pool, &[self.cmd]);
            }
            if self.pool != vk::CommandPool::null() {
                self.device.destroy_command_pool(self.pool, None);
            }
        }
    }
}
