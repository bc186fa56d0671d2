//! Host-memory implementation of [`Backend`].
//!
//! Textures are stored tightly packed and buffers byte for byte; copies
//! between them go through the same pitched [`Footprint`] layout a native
//! device would use. Submission is checked the way validation layers check
//! it: a barrier whose `before` disagrees with the device-side state, or a
//! copy touching a texture outside its copy state, fails the whole
//! submission before any of it executes.

use std::collections::{HashMap, VecDeque};
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "llgi-serde")]
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::driver::command::CopyCommand;
use super::driver::state::{Barrier, ResourceState};
use super::driver::types::{
    DeviceType, Format, HeapType, ResourceDesc, ResourceDimension, UsageBits, Vec2I,
};
use super::error::{AllocationError, StateError, TransferError, TransferObject};
use super::footprint::{copy_rows, Footprint, TEXTURE_DATA_PITCH_ALIGNMENT};
use super::{Backend, Result};
use crate::utils::{Handle, Pool};

#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy)]
pub struct NullDeviceInfo {
    /// Row pitch alignment of texture footprints. `1` gives tight rows.
    pub row_pitch_alignment: u32,
    /// Total bytes the device may hand out, unlimited when `None`.
    pub memory_budget: Option<u64>,
    /// Journal entries kept before the oldest are dropped. `0` turns the
    /// journal off.
    pub journal_capacity: usize,
}

pub const DEFAULT_JOURNAL_CAPACITY: usize = 4096;

impl Default for NullDeviceInfo {
    fn default() -> Self {
        Self {
            row_pitch_alignment: TEXTURE_DATA_PITCH_ALIGNMENT,
            memory_budget: None,
            journal_capacity: DEFAULT_JOURNAL_CAPACITY,
        }
    }
}

/// A single failure armed with [`NullDevice::inject_fault`]. Each one fires
/// once, on the next matching call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fault {
    Allocate,
    Create(TransferObject),
    Submit,
    Wait,
}

/// Everything the device did, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Allocate { heap: HeapType, bytes: u64 },
    Release { heap: HeapType, bytes: u64 },
    Create(TransferObject),
    Destroy(TransferObject),
    Submit,
    Barrier { before: ResourceState, after: ResourceState },
    CopyBufferToTexture { row_pitch: u32, rows: u32 },
    CopyTextureToBuffer { row_pitch: u32, rows: u32 },
    CopyBufferToBuffer { size: u64 },
    Wait,
    WaitIdle,
}

/// Order transfer objects are created in. Teardown walks it backwards.
const TRANSFER_OBJECTS: [TransferObject; 4] = [
    TransferObject::CommandAllocator,
    TransferObject::CommandBuffer,
    TransferObject::Fence,
    TransferObject::Event,
];

#[derive(Debug)]
struct Allocation {
    desc: ResourceDesc,
    memory: Box<[u8]>,
    state: ResourceState,
    map_count: u32,
}

#[derive(Debug)]
enum Op {
    Barrier {
        target: Handle<Allocation>,
        before: ResourceState,
        after: ResourceState,
    },
    BufferToTexture {
        src: Handle<Allocation>,
        dst: Handle<Allocation>,
        footprint: Footprint,
    },
    TextureToBuffer {
        src: Handle<Allocation>,
        dst: Handle<Allocation>,
        footprint: Footprint,
    },
    BufferToBuffer {
        src: Handle<Allocation>,
        src_offset: u64,
        dst: Handle<Allocation>,
        dst_offset: u64,
        size: u64,
    },
}

#[derive(Default)]
struct Shared {
    allocations: Pool<Allocation>,
    journal: VecDeque<JournalEntry>,
    journal_capacity: usize,
    faults: Vec<Fault>,
    used: u64,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn record(&mut self, entry: JournalEntry) {
        if self.journal_capacity == 0 {
            return;
        }
        if self.journal.len() == self.journal_capacity {
            self.journal.pop_front();
        }
        self.journal.push_back(entry);
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        match self.faults.iter().position(|f| *f == fault) {
            Some(i) => {
                self.faults.remove(i);
                true
            }
            None => false,
        }
    }

    fn get(&self, handle: Handle<Allocation>) -> Result<&Allocation, String> {
        self.allocations
            .get_ref(handle)
            .ok_or_else(|| "command references a released resource".to_string())
    }

    /// Dry run of `ops` against the device-side states.
    fn validate(&self, ops: &[Op]) -> Result<(), String> {
        let mut states: HashMap<Handle<Allocation>, ResourceState> = HashMap::new();
        let state_of = |states: &HashMap<Handle<Allocation>, ResourceState>,
                        handle: Handle<Allocation>|
         -> Result<ResourceState, String> {
            match states.get(&handle) {
                Some(state) => Ok(*state),
                None => self.get(handle).map(|a| a.state),
            }
        };

        for op in ops {
            match *op {
                Op::Barrier {
                    target,
                    before,
                    after,
                } => {
                    let current = state_of(&states, target)?;
                    if current != before {
                        return Err(format!(
                            "barrier {before:?} -> {after:?} recorded while the resource is in {current:?}"
                        ));
                    }
                    states.insert(target, after);
                }
                Op::BufferToTexture {
                    src,
                    dst,
                    footprint,
                } => {
                    let (buffer, texture) = (self.get(src)?, self.get(dst)?);
                    check_pair(buffer, texture, &footprint)?;
                    let state = state_of(&states, dst)?;
                    if state != ResourceState::CopyDestination {
                        return Err(format!("copy into a texture in {state:?}"));
                    }
                }
                Op::TextureToBuffer {
                    src,
                    dst,
                    footprint,
                } => {
                    let (texture, buffer) = (self.get(src)?, self.get(dst)?);
                    check_pair(buffer, texture, &footprint)?;
                    let state = state_of(&states, src)?;
                    if state != ResourceState::CopySource {
                        return Err(format!("copy out of a texture in {state:?}"));
                    }
                }
                Op::BufferToBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let (from, to) = (self.get(src)?, self.get(dst)?);
                    if from.desc.dimension != ResourceDimension::Buffer
                        || to.desc.dimension != ResourceDimension::Buffer
                    {
                        return Err("buffer copy between non-buffer resources".to_string());
                    }
                    if src_offset + size > from.memory.len() as u64
                        || dst_offset + size > to.memory.len() as u64
                    {
                        return Err(format!("buffer copy of {size} bytes is out of range"));
                    }
                }
            }
        }
        Ok(())
    }

    fn execute(&mut self, op: &Op) {
        match *op {
            Op::Barrier {
                target,
                before,
                after,
            } => {
                if let Some(allocation) = self.allocations.get_mut_ref(target) {
                    allocation.state = after;
                }
                self.record(JournalEntry::Barrier { before, after });
            }
            Op::BufferToTexture {
                src,
                dst,
                footprint,
            } => {
                let start = footprint.offset as usize;
                let end = start + footprint.total_size as usize;
                let staged = match self.allocations.get_ref(src) {
                    Some(buffer) => buffer.memory[start..end].to_vec(),
                    None => return,
                };
                if let Some(texture) = self.allocations.get_mut_ref(dst) {
                    let row = footprint.row_bytes() as usize;
                    copy_rows(
                        &staged,
                        footprint.row_pitch as usize,
                        &mut texture.memory,
                        row,
                        row,
                        footprint.height as usize,
                    );
                }
                self.record(JournalEntry::CopyBufferToTexture {
                    row_pitch: footprint.row_pitch,
                    rows: footprint.height,
                });
            }
            Op::TextureToBuffer {
                src,
                dst,
                footprint,
            } => {
                let texels = match self.allocations.get_ref(src) {
                    Some(texture) => texture.memory.to_vec(),
                    None => return,
                };
                if let Some(buffer) = self.allocations.get_mut_ref(dst) {
                    let row = footprint.row_bytes() as usize;
                    copy_rows(
                        &texels,
                        row,
                        &mut buffer.memory[footprint.offset as usize..],
                        footprint.row_pitch as usize,
                        row,
                        footprint.height as usize,
                    );
                }
                self.record(JournalEntry::CopyTextureToBuffer {
                    row_pitch: footprint.row_pitch,
                    rows: footprint.height,
                });
            }
            Op::BufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => {
                let (from, len) = (src_offset as usize, size as usize);
                let bytes = match self.allocations.get_ref(src) {
                    Some(buffer) => buffer.memory[from..from + len].to_vec(),
                    None => return,
                };
                if let Some(buffer) = self.allocations.get_mut_ref(dst) {
                    let to = dst_offset as usize;
                    buffer.memory[to..to + len].copy_from_slice(&bytes);
                }
                self.record(JournalEntry::CopyBufferToBuffer { size });
            }
        }
    }
}

fn check_pair(buffer: &Allocation, texture: &Allocation, footprint: &Footprint) -> Result<(), String> {
    if buffer.desc.dimension != ResourceDimension::Buffer
        || texture.desc.dimension != ResourceDimension::Texture2D
    {
        return Err("image copy needs one buffer and one texture".to_string());
    }
    if (buffer.memory.len() as u64) < footprint.offset + footprint.total_size {
        return Err(format!(
            "buffer of {} bytes cannot hold footprint of {} bytes",
            buffer.memory.len(),
            footprint.offset + footprint.total_size
        ));
    }
    if (texture.memory.len() as u64) < footprint.tight_size() {
        return Err("footprint is larger than the texture".to_string());
    }
    Ok(())
}

/// Software device. Cheap to create, deterministic, single queue.
pub struct NullDevice {
    info: NullDeviceInfo,
    shared: Arc<Mutex<Shared>>,
}

/// A host-memory allocation owned through [`NullDevice`].
#[derive(Debug)]
pub struct NullResource {
    handle: Handle<Allocation>,
    desc: ResourceDesc,
}

impl NullResource {
    pub fn desc(&self) -> &ResourceDesc {
        &self.desc
    }
}

pub struct NullTransfer {
    shared: Arc<Mutex<Shared>>,
    created: SmallVec<[TransferObject; 4]>,
    ops: Vec<Op>,
    submitted: bool,
}

impl Drop for NullTransfer {
    fn drop(&mut self) {
        let mut shared = lock(&self.shared);
        for object in self.created.iter().rev() {
            log::trace!("null: destroying {object}");
            shared.record(JournalEntry::Destroy(*object));
        }
    }
}

impl Default for NullDevice {
    fn default() -> Self {
        Self::new(NullDeviceInfo::default())
    }
}

impl NullDevice {
    pub fn new(info: NullDeviceInfo) -> Self {
        log::info!(
            "null device: row pitch alignment {}, budget {:?}",
            info.row_pitch_alignment,
            info.memory_budget
        );
        Self {
            info,
            shared: Arc::new(Mutex::new(Shared {
                journal_capacity: info.journal_capacity,
                ..Shared::default()
            })),
        }
    }

    pub fn info(&self) -> &NullDeviceInfo {
        &self.info
    }

    pub fn inject_fault(&self, fault: Fault) {
        lock(&self.shared).faults.push(fault);
    }

    pub fn journal(&self) -> Vec<JournalEntry> {
        lock(&self.shared).journal.iter().cloned().collect()
    }

    pub fn clear_journal(&self) {
        lock(&self.shared).journal.clear();
    }

    pub fn live_allocations(&self) -> usize {
        lock(&self.shared).allocations.len()
    }

    /// Bytes currently allocated.
    pub fn memory_in_use(&self) -> u64 {
        lock(&self.shared).used
    }

    /// State the device last executed a transition into.
    pub fn device_state(&self, resource: &NullResource) -> Option<ResourceState> {
        lock(&self.shared)
            .allocations
            .get_ref(resource.handle)
            .map(|a| a.state)
    }

    pub fn is_mapped(&self, resource: &NullResource) -> bool {
        lock(&self.shared)
            .allocations
            .get_ref(resource.handle)
            .map_or(false, |a| a.map_count > 0)
    }

    /// Raw bytes of `resource`, tightly packed for textures.
    pub fn contents(&self, resource: &NullResource) -> Vec<u8> {
        lock(&self.shared)
            .allocations
            .get_ref(resource.handle)
            .map(|a| a.memory.to_vec())
            .unwrap_or_default()
    }

    /// Replaces the contents of `resource` the way rendering or presentation
    /// would, without going through a transfer.
    pub fn overwrite(&self, resource: &NullResource, bytes: &[u8]) -> Result<()> {
        let mut shared = lock(&self.shared);
        let allocation = shared
            .allocations
            .get_mut_ref(resource.handle)
            .ok_or(StateError::NotAllocated)?;
        if bytes.len() != allocation.memory.len() {
            return Err(StateError::OutOfRange {
                offset: 0,
                size: bytes.len() as u64,
                capacity: allocation.memory.len() as u64,
            }
            .into());
        }
        allocation.memory.copy_from_slice(bytes);
        Ok(())
    }

    /// Stand-in for a swap-chain image owned by the platform.
    pub fn create_screen_image(&self, format: Format, size: Vec2I) -> Result<NullResource> {
        self.allocate(&ResourceDesc::texture_2d(
            format,
            size,
            UsageBits::RENDER_TARGET | UsageBits::COPY_SRC,
            ResourceState::PresentSource,
        ))
    }
}

impl Backend for NullDevice {
    type Resource = NullResource;
    type Transfer = NullTransfer;

    fn device_type(&self) -> DeviceType {
        DeviceType::Null
    }

    fn allocate(&self, desc: &ResourceDesc) -> Result<NullResource> {
        desc.validate()?;
        let bytes = desc.byte_size();

        let mut shared = lock(&self.shared);
        if shared.take_fault(Fault::Allocate) {
            return Err(AllocationError::Native("injected allocation failure".into()).into());
        }
        if let Some(budget) = self.info.memory_budget {
            if shared.used + bytes > budget {
                return Err(AllocationError::OutOfMemory { requested: bytes }.into());
            }
        }

        let handle = shared.allocations.insert(Allocation {
            desc: *desc,
            memory: vec![0u8; bytes as usize].into_boxed_slice(),
            state: desc.initial_state,
            map_count: 0,
        });
        shared.used += bytes;
        shared.record(JournalEntry::Allocate {
            heap: desc.heap,
            bytes,
        });
        log::debug!(
            "null: allocated {bytes} bytes ({:?}, {:?}) in {:?}",
            desc.dimension,
            desc.heap,
            desc.initial_state
        );

        Ok(NullResource {
            handle,
            desc: *desc,
        })
    }

    fn footprint(&self, resource: &NullResource) -> Footprint {
        let desc = &resource.desc;
        match desc.dimension {
            ResourceDimension::Buffer => Footprint::linear(desc.byte_size()),
            ResourceDimension::Texture2D => {
                Footprint::aligned(desc.format, desc.extent, self.info.row_pitch_alignment)
            }
        }
    }

    fn map(&self, resource: &mut NullResource) -> Result<NonNull<u8>> {
        if !resource.desc.heap.is_host_visible() {
            return Err(StateError::NotHostVisible.into());
        }
        let mut shared = lock(&self.shared);
        let allocation = shared
            .allocations
            .get_mut_ref(resource.handle)
            .ok_or(StateError::NotAllocated)?;
        allocation.map_count += 1;
        NonNull::new(allocation.memory.as_mut_ptr()).ok_or_else(|| StateError::NotAllocated.into())
    }

    fn unmap(&self, resource: &mut NullResource) {
        if let Some(allocation) = lock(&self.shared).allocations.get_mut_ref(resource.handle) {
            allocation.map_count = allocation.map_count.saturating_sub(1);
        }
    }

    fn release(&self, resource: NullResource) {
        let mut shared = lock(&self.shared);
        match shared.allocations.release(resource.handle) {
            Some(allocation) => {
                let bytes = allocation.memory.len() as u64;
                shared.used -= bytes;
                shared.record(JournalEntry::Release {
                    heap: allocation.desc.heap,
                    bytes,
                });
            }
            None => log::warn!("null: release of an unknown resource"),
        }
    }

    fn begin_transfer(&self) -> Result<NullTransfer> {
        let mut transfer = NullTransfer {
            shared: Arc::clone(&self.shared),
            created: SmallVec::new(),
            ops: Vec::new(),
            submitted: false,
        };

        for object in TRANSFER_OBJECTS {
            let mut shared = lock(&self.shared);
            if shared.take_fault(Fault::Create(object)) {
                return Err(TransferError::create(object, "injected fault").into());
            }
            shared.record(JournalEntry::Create(object));
            transfer.created.push(object);
        }

        Ok(transfer)
    }

    fn record_copy(&self, transfer: &mut NullTransfer, copy: CopyCommand<'_, NullResource>) {
        let op = match copy {
            CopyCommand::BufferToTexture {
                src,
                footprint,
                dst,
            } => Op::BufferToTexture {
                src: src.handle,
                dst: dst.handle,
                footprint,
            },
            CopyCommand::TextureToBuffer {
                src,
                dst,
                footprint,
            } => Op::TextureToBuffer {
                src: src.handle,
                dst: dst.handle,
                footprint,
            },
            CopyCommand::BufferToBuffer {
                src,
                src_offset,
                dst,
                dst_offset,
                size,
            } => Op::BufferToBuffer {
                src: src.handle,
                src_offset,
                dst: dst.handle,
                dst_offset,
                size,
            },
        };
        log::trace!("null: recorded {op:?}");
        transfer.ops.push(op);
    }

    fn record_barrier(&self, transfer: &mut NullTransfer, barrier: Barrier<'_, NullResource>) {
        transfer.ops.push(Op::Barrier {
            target: barrier.resource.handle,
            before: barrier.before,
            after: barrier.after,
        });
    }

    fn submit(&self, transfer: &mut NullTransfer) -> Result<()> {
        let mut shared = lock(&self.shared);
        if transfer.submitted {
            return Err(TransferError::Submit("command buffer was already submitted".into()).into());
        }
        if shared.take_fault(Fault::Submit) {
            return Err(TransferError::Submit("injected fault".into()).into());
        }
        shared
            .validate(&transfer.ops)
            .map_err(TransferError::Submit)?;

        shared.record(JournalEntry::Submit);
        for op in &transfer.ops {
            shared.execute(op);
        }
        transfer.submitted = true;
        Ok(())
    }

    fn wait(&self, transfer: &mut NullTransfer) -> Result<()> {
        if !transfer.submitted {
            return Err(TransferError::Wait("nothing was submitted".into()).into());
        }
        let mut shared = lock(&self.shared);
        if shared.take_fault(Fault::Wait) {
            return Err(TransferError::Wait("injected fault".into()).into());
        }
        shared.record(JournalEntry::Wait);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        lock(&self.shared).record(JournalEntry::WaitIdle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::error::GPUError;
    use crate::gpu::transfer::execute_one_shot;
    use crate::gpu::StateTracker;

    fn texture(device: &NullDevice, size: Vec2I) -> NullResource {
        device
            .allocate(&ResourceDesc::texture_2d(
                Format::R8G8B8A8Unorm,
                size,
                UsageBits::SAMPLED | UsageBits::COPY_DST | UsageBits::COPY_SRC,
                ResourceState::CopyDestination,
            ))
            .unwrap()
    }

    #[test]
    fn budget_is_enforced() {
        let device = NullDevice::new(NullDeviceInfo {
            memory_budget: Some(128),
            ..Default::default()
        });
        let a = device
            .allocate(&ResourceDesc::buffer(HeapType::HostUpload, 100, UsageBits::COPY_SRC))
            .unwrap();
        let err = device
            .allocate(&ResourceDesc::buffer(HeapType::HostUpload, 100, UsageBits::COPY_SRC))
            .unwrap_err();
        assert!(matches!(
            err,
            GPUError::Allocation(AllocationError::OutOfMemory { requested: 100 })
        ));

        device.release(a);
        assert_eq!(device.memory_in_use(), 0);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn device_local_memory_cannot_be_mapped() {
        let device = NullDevice::default();
        let mut tex = texture(&device, Vec2I::new(4, 4));
        assert!(matches!(
            device.map(&mut tex),
            Err(GPUError::State(StateError::NotHostVisible))
        ));
        device.release(tex);
    }

    #[test]
    fn stale_barrier_fails_the_whole_submission() {
        let device = NullDevice::default();
        let tex = texture(&device, Vec2I::new(4, 4));

        let result = execute_one_shot(&device, |ctx| {
            let mut tracker = StateTracker::new(ResourceState::GenericRead);
            tracker.transition(&tex, ResourceState::CopySource, ctx);
            Ok(())
        });

        assert!(matches!(
            result,
            Err(GPUError::Transfer(TransferError::Submit(_)))
        ));
        assert_eq!(device.device_state(&tex), Some(ResourceState::CopyDestination));
        assert!(!device.journal().contains(&JournalEntry::Submit));
        device.release(tex);
    }

    #[test]
    fn creation_fault_tears_down_in_reverse() {
        let device = NullDevice::default();
        device.inject_fault(Fault::Create(TransferObject::Fence));

        let err = execute_one_shot(&device, |_| Ok(())).unwrap_err();
        assert!(matches!(
            err,
            GPUError::Transfer(TransferError::Create {
                object: TransferObject::Fence,
                ..
            })
        ));
        assert_eq!(
            device.journal(),
            vec![
                JournalEntry::Create(TransferObject::CommandAllocator),
                JournalEntry::Create(TransferObject::CommandBuffer),
                JournalEntry::Destroy(TransferObject::CommandBuffer),
                JournalEntry::Destroy(TransferObject::CommandAllocator),
            ]
        );
    }

    #[test]
    fn journal_keeps_only_the_newest_entries() {
        let device = NullDevice::new(NullDeviceInfo {
            journal_capacity: 4,
            ..Default::default()
        });
        let buffers: Vec<_> = (1..=10u64)
            .map(|bytes| {
                device
                    .allocate(&ResourceDesc::buffer(HeapType::HostUpload, bytes, UsageBits::COPY_SRC))
                    .unwrap()
            })
            .collect();

        let journal = device.journal();
        assert_eq!(journal.len(), 4);
        assert_eq!(
            journal.first(),
            Some(&JournalEntry::Allocate { heap: HeapType::HostUpload, bytes: 7 })
        );
        assert_eq!(
            journal.last(),
            Some(&JournalEntry::Allocate { heap: HeapType::HostUpload, bytes: 10 })
        );

        for buffer in buffers {
            device.release(buffer);
        }
        assert_eq!(device.journal().len(), 4);
    }

    #[test]
    fn zero_capacity_turns_the_journal_off() {
        let device = NullDevice::new(NullDeviceInfo {
            journal_capacity: 0,
            ..Default::default()
        });
        execute_one_shot(&device, |_| Ok(())).unwrap();
        assert!(device.journal().is_empty());
    }

    #[test]
    fn padded_footprint_round_trips() {
        let device = NullDevice::default();
        let size = Vec2I::new(3, 2);
        let tex = texture(&device, size);
        let fp = device.footprint(&tex);
        assert_eq!(fp.row_pitch, 256);

        let upload = device
            .allocate(&ResourceDesc::buffer(
                HeapType::HostUpload,
                fp.total_size,
                UsageBits::COPY_SRC,
            ))
            .unwrap();
        let mut pitched = vec![0u8; fp.total_size as usize];
        for row in 0..2 {
            for b in 0..12 {
                pitched[row * 256 + b] = (row * 12 + b) as u8;
            }
        }
        device.overwrite(&upload, &pitched).unwrap();

        execute_one_shot(&device, |ctx| {
            ctx.copy(CopyCommand::BufferToTexture {
                src: &upload,
                footprint: fp,
                dst: &tex,
            });
            Ok(())
        })
        .unwrap();

        let expected: Vec<u8> = (0..24).collect();
        assert_eq!(device.contents(&tex), expected);

        device.release(upload);
        device.release(tex);
    }
}
