use std::ptr::NonNull;
use std::sync::Arc;

use super::capture;
use super::driver::command::CopyCommand;
use super::driver::state::{ResourceState, StateTracker};
use super::driver::types::{BufferUsage, HeapType, ResourceDesc, UsageBits};
use super::error::StateError;
use super::transfer::execute_one_shot;
use super::{Backend, Result};

fn usage_bits(usage: BufferUsage) -> UsageBits {
    let role = match usage {
        BufferUsage::Vertex => UsageBits::VERTEX,
        BufferUsage::Index => UsageBits::INDEX,
        BufferUsage::Constant => UsageBits::UNIFORM,
    };
    role | UsageBits::COPY_DST | UsageBits::COPY_SRC
}

/// Vertex, index or constant data: a host-visible upload buffer mirrored
/// into device-local memory on [`unlock`](Buffer::unlock).
pub struct Buffer<B: Backend> {
    device: Arc<B>,
    cpu: Option<B::Resource>,
    gpu: Option<B::Resource>,
    state: StateTracker,
    usage: BufferUsage,
    size: u64,
    stride: u32,
    mapped: Option<NonNull<u8>>,
}

impl<B: Backend> Buffer<B> {
    pub fn new(device: Arc<B>, usage: BufferUsage, size: u64, stride: u32) -> Result<Self> {
        let mut buffer = Self {
            device,
            cpu: None,
            gpu: None,
            state: StateTracker::new(ResourceState::GenericRead),
            usage,
            size,
            stride,
            mapped: None,
        };

        buffer.cpu = Some(buffer.device.allocate(&ResourceDesc::buffer(
            HeapType::HostUpload,
            size,
            UsageBits::COPY_SRC,
        ))?);
        let gpu_desc = ResourceDesc::buffer(HeapType::DeviceLocal, size, usage_bits(usage));
        buffer.gpu = Some(buffer.device.allocate(&gpu_desc)?);
        buffer.state = StateTracker::new(gpu_desc.initial_state);

        log::debug!("created {usage:?} buffer of {size} bytes");
        Ok(buffer)
    }

    pub fn lock(&mut self) -> Result<&mut [u8]> {
        self.lock_range(0, self.size)
    }

    /// Host-writable view of `size` bytes starting at `offset`.
    pub fn lock_range(&mut self, offset: u64, size: u64) -> Result<&mut [u8]> {
        if offset.checked_add(size).map_or(true, |end| end > self.size) {
            return Err(StateError::OutOfRange {
                offset,
                size,
                capacity: self.size,
            }
            .into());
        }

        let ptr = match self.mapped {
            Some(ptr) => ptr,
            None => {
                let cpu = self.cpu.as_mut().ok_or(StateError::NotAllocated)?;
                let ptr = self.device.map(cpu)?;
                self.mapped = Some(ptr);
                ptr
            }
        };

        // SAFETY: the upload buffer is `self.size` bytes, the range was
        // checked above and it stays mapped until `unlock`.
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr().add(offset as usize), size as usize) })
    }

    /// Unmaps and copies the whole upload buffer into device memory.
    pub fn unlock(&mut self) -> Result<()> {
        if self.mapped.take().is_none() {
            return Err(StateError::NotLocked.into());
        }
        let cpu = self.cpu.as_mut().ok_or(StateError::NotAllocated)?;
        let gpu = self.gpu.as_ref().ok_or(StateError::NotAllocated)?;
        self.device.unmap(cpu);

        let cpu = &*cpu;
        let size = self.size;
        let snapshot = self.state.snapshot();
        let state = &mut self.state;
        let uploaded = execute_one_shot(&*self.device, |ctx| {
            state.transition(gpu, ResourceState::CopyDestination, ctx);
            ctx.copy(CopyCommand::BufferToBuffer {
                src: cpu,
                src_offset: 0,
                dst: gpu,
                dst_offset: 0,
                size,
            });
            state.transition(gpu, ResourceState::GenericRead, ctx);
            Ok(())
        });

        if uploaded.is_err() {
            self.state.restore(snapshot);
        }
        uploaded
    }

    /// Device-side contents, or an empty vector if the readback failed.
    pub fn read(&mut self) -> Vec<u8> {
        let Some(gpu) = self.gpu.as_ref() else {
            return Vec::new();
        };
        capture::read_buffer(&*self.device, gpu, &mut self.state, self.size)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Bytes per element; `0` for unstructured data.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn count(&self) -> u64 {
        match self.stride {
            0 => 0,
            stride => self.size / stride as u64,
        }
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    pub fn state(&self) -> ResourceState {
        self.state.current()
    }

    pub fn resource(&self) -> Result<&B::Resource> {
        Ok(self.gpu.as_ref().ok_or(StateError::NotAllocated)?)
    }
}

impl<B: Backend> Drop for Buffer<B> {
    fn drop(&mut self) {
        if let Some(mut cpu) = self.cpu.take() {
            if self.mapped.take().is_some() {
                self.device.unmap(&mut cpu);
            }
            self.device.release(cpu);
        }
        if let Some(gpu) = self.gpu.take() {
            self.device.release(gpu);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::error::GPUError;
    use crate::gpu::null::NullDevice;

    #[test]
    fn range_outside_the_buffer_is_rejected() {
        let mut buffer = Buffer::new(Arc::new(NullDevice::default()), BufferUsage::Vertex, 64, 16).unwrap();
        assert!(matches!(
            buffer.lock_range(48, 32),
            Err(GPUError::State(StateError::OutOfRange { capacity: 64, .. }))
        ));
        assert!(buffer.lock_range(48, 16).is_ok());
        assert_eq!(buffer.count(), 4);
    }

    #[test]
    fn unlock_copies_whole_buffer() {
        let device = Arc::new(NullDevice::default());
        let mut buffer = Buffer::new(Arc::clone(&device), BufferUsage::Index, 8, 2).unwrap();
        buffer.lock_range(2, 2).unwrap().copy_from_slice(&[9, 9]);
        buffer.unlock().unwrap();

        assert_eq!(buffer.read(), vec![0, 0, 9, 9, 0, 0, 0, 0]);
        assert_eq!(buffer.state(), ResourceState::GenericRead);
        assert!(matches!(
            buffer.unlock(),
            Err(GPUError::State(StateError::NotLocked))
        ));

        drop(buffer);
        assert_eq!(device.live_allocations(), 0);
    }
}
