//! Synchronous readback of GPU-resident resources.

use super::driver::command::CopyCommand;
use super::driver::state::{ResourceState, StateTracker};
use super::driver::types::{HeapType, ResourceDesc, UsageBits};
use super::footprint::copy_rows;
use super::transfer::{execute_one_shot, ScopedResource};
use super::{Backend, Result};

/// Copies mip 0 of `texture` back to the host, dropping row padding.
///
/// The texture is moved to `CopySource` for the copy and back to whatever
/// state it was in before, inside the same submission. On failure the
/// tracker is rolled back and the readback buffer released.
pub fn try_capture<B: Backend>(
    device: &B,
    texture: &B::Resource,
    state: &mut StateTracker,
    memory_size: u64,
) -> Result<Vec<u8>> {
    device.wait_idle()?;

    let footprint = device.footprint(texture);
    let span = memory_size.max(footprint.offset + footprint.total_size);
    let mut readback = ScopedResource::allocate(
        device,
        &ResourceDesc::buffer(HeapType::HostReadback, span, UsageBits::COPY_DST),
    )?;

    let original = state.current();
    let snapshot = state.snapshot();
    let copied = execute_one_shot(device, |ctx| {
        state.transition(texture, ResourceState::CopySource, ctx);
        ctx.copy(CopyCommand::TextureToBuffer {
            src: texture,
            dst: readback.get(),
            footprint,
        });
        state.transition(texture, original, ctx);
        Ok(())
    });
    if let Err(err) = copied {
        state.restore(snapshot);
        return Err(err);
    }

    let ptr = device.map(readback.get_mut())?;
    // SAFETY: the readback buffer is `span` bytes and stays mapped until the
    // unmap below.
    let mapped = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), span as usize) };

    let rows = footprint.height.max(1) as usize;
    let row_bytes = memory_size as usize / rows;
    let mut pixels = vec![0u8; memory_size as usize];
    copy_rows(
        &mapped[footprint.offset as usize..],
        footprint.row_pitch as usize,
        &mut pixels,
        row_bytes,
        row_bytes,
        rows,
    );
    device.unmap(readback.get_mut());

    log::debug!("captured {} bytes", pixels.len());
    Ok(pixels)
}

/// [`try_capture`], returning an empty vector when anything fails.
pub fn capture<B: Backend>(
    device: &B,
    texture: &B::Resource,
    state: &mut StateTracker,
    memory_size: u64,
) -> Vec<u8> {
    try_capture(device, texture, state, memory_size).unwrap_or_else(|err| {
        log::error!("texture capture failed: {err}");
        Vec::new()
    })
}

/// Reads the first `size` bytes of a device-local buffer.
pub fn try_read_buffer<B: Backend>(
    device: &B,
    buffer: &B::Resource,
    state: &mut StateTracker,
    size: u64,
) -> Result<Vec<u8>> {
    device.wait_idle()?;

    let mut readback = ScopedResource::allocate(
        device,
        &ResourceDesc::buffer(HeapType::HostReadback, size, UsageBits::COPY_DST),
    )?;

    let original = state.current();
    let snapshot = state.snapshot();
    let copied = execute_one_shot(device, |ctx| {
        state.transition(buffer, ResourceState::CopySource, ctx);
        ctx.copy(CopyCommand::BufferToBuffer {
            src: buffer,
            src_offset: 0,
            dst: readback.get(),
            dst_offset: 0,
            size,
        });
        state.transition(buffer, original, ctx);
        Ok(())
    });
    if let Err(err) = copied {
        state.restore(snapshot);
        return Err(err);
    }

    let ptr = device.map(readback.get_mut())?;
    // SAFETY: mapped for `size` bytes until the unmap below.
    let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size as usize) }.to_vec();
    device.unmap(readback.get_mut());
    Ok(bytes)
}

pub fn read_buffer<B: Backend>(
    device: &B,
    buffer: &B::Resource,
    state: &mut StateTracker,
    size: u64,
) -> Vec<u8> {
    try_read_buffer(device, buffer, state, size).unwrap_or_else(|err| {
        log::error!("buffer readback failed: {err}");
        Vec::new()
    })
}
