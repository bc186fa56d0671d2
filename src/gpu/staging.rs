use std::ptr::NonNull;

use super::driver::types::{HeapType, ResourceDesc, UsageBits};
use super::footprint::{copy_rows, Footprint};
use super::{Backend, Result};

/// CPU-visible upload allocation paired with a GPU-local texture.
///
/// When the texture's native row pitch matches the tightly packed row size
/// the mapped upload memory is handed out directly. Otherwise writes go to a
/// tightly packed shadow buffer that [`flush`](Self::flush) scatters into the
/// pitched upload layout.
pub struct StagingBuffer<B: Backend> {
    resource: B::Resource,
    footprint: Footprint,
    memory_size: usize,
    row_bytes: usize,
    shadow: Option<Vec<u8>>,
    mapped: Option<NonNull<u8>>,
}

impl<B: Backend> StagingBuffer<B> {
    /// `memory_size` is the tightly packed size of the texture.
    pub fn new(device: &B, footprint: Footprint, memory_size: u64) -> Result<Self> {
        let rows = footprint.height.max(1) as u64;
        let row_bytes = memory_size / rows;
        let upload_size = memory_size.max(footprint.offset + footprint.total_size);

        let resource = device.allocate(&ResourceDesc::buffer(
            HeapType::HostUpload,
            upload_size,
            UsageBits::COPY_SRC,
        ))?;

        let shadow = if footprint.row_pitch as u64 != row_bytes {
            log::debug!(
                "row pitch {} != {} bytes per row, staging through a shadow buffer",
                footprint.row_pitch,
                row_bytes
            );
            Some(vec![0u8; memory_size as usize])
        } else {
            None
        };

        Ok(Self {
            resource,
            footprint,
            memory_size: memory_size as usize,
            row_bytes: row_bytes as usize,
            shadow,
            mapped: None,
        })
    }

    pub fn footprint(&self) -> Footprint {
        self.footprint
    }

    pub fn resource(&self) -> &B::Resource {
        &self.resource
    }

    pub fn is_shadowed(&self) -> bool {
        self.shadow.is_some()
    }

    /// Tightly packed, host-writable view of the texture contents.
    ///
    /// The direct mapping is only valid until [`flush`](Self::flush); the
    /// shadow buffer needs no device synchronization at all.
    pub fn lock(&mut self, device: &B) -> Result<&mut [u8]> {
        if let Some(shadow) = self.shadow.as_mut() {
            return Ok(shadow.as_mut_slice());
        }

        let ptr = match self.mapped {
            Some(ptr) => ptr,
            None => {
                let ptr = device.map(&mut self.resource)?;
                self.mapped = Some(ptr);
                ptr
            }
        };

        // SAFETY: the upload allocation is at least `offset + memory_size`
        // bytes and stays mapped until `flush`, which needs `&mut self`.
        Ok(unsafe {
            std::slice::from_raw_parts_mut(
                ptr.as_ptr().add(self.footprint.offset as usize),
                self.memory_size,
            )
        })
    }

    /// Makes the upload allocation hold what was written through `lock` and
    /// unmaps it.
    pub fn flush(&mut self, device: &B) -> Result<()> {
        if let Some(shadow) = &self.shadow {
            let ptr = device.map(&mut self.resource)?;
            let pitch = self.footprint.row_pitch as usize;
            let rows = self.footprint.height as usize;
            let span = self.footprint.total_size as usize;

            // SAFETY: the upload allocation spans `offset + total_size` bytes.
            let dst = unsafe {
                std::slice::from_raw_parts_mut(
                    ptr.as_ptr().add(self.footprint.offset as usize),
                    span,
                )
            };
            copy_rows(shadow, self.row_bytes, dst, pitch, self.row_bytes, rows);
            device.unmap(&mut self.resource);
        } else if self.mapped.take().is_some() {
            device.unmap(&mut self.resource);
        }
        Ok(())
    }

    pub fn release(mut self, device: &B) {
        if self.mapped.take().is_some() {
            device.unmap(&mut self.resource);
        }
        device.release(self.resource);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::driver::types::{Format, Vec2I};
    use crate::gpu::null::{NullDevice, NullDeviceInfo};

    #[test]
    fn tight_rows_map_directly() {
        let device = NullDevice::default();
        let fp = Footprint::aligned(Format::R8G8B8A8Unorm, Vec2I::new(64, 4), 256);
        let mut staging = StagingBuffer::new(&device, fp, 64 * 4 * 4).unwrap();
        assert!(!staging.is_shadowed());

        let first = staging.lock(&device).unwrap().as_ptr();
        let again = staging.lock(&device).unwrap().as_ptr();
        assert_eq!(first, again);
        assert!(device.is_mapped(staging.resource()));

        staging.flush(&device).unwrap();
        assert!(!device.is_mapped(staging.resource()));
        staging.release(&device);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn padded_rows_go_through_the_shadow() {
        let device = NullDevice::new(NullDeviceInfo::default());
        let fp = Footprint::aligned(Format::R8Unorm, Vec2I::new(5, 3), 8);
        let mut staging = StagingBuffer::new(&device, fp, 15).unwrap();
        assert!(staging.is_shadowed());

        let view = staging.lock(&device).unwrap();
        assert_eq!(view.len(), 15);
        for (i, b) in view.iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
        assert!(!device.is_mapped(staging.resource()));

        staging.flush(&device).unwrap();
        let uploaded = device.contents(staging.resource());
        assert_eq!(&uploaded[0..5], &[1, 2, 3, 4, 5]);
        assert_eq!(&uploaded[5..8], &[0, 0, 0]);
        assert_eq!(&uploaded[8..13], &[6, 7, 8, 9, 10]);
        assert_eq!(&uploaded[16..21], &[11, 12, 13, 14, 15]);
        staging.release(&device);
    }
}
