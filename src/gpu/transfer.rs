use super::driver::command::CopyCommand;
use super::driver::state::{Barrier, BarrierSink};
use super::driver::types::ResourceDesc;
use super::{Backend, Result};

/// A one-shot command context being recorded.
///
/// Owns the backend's transfer bundle; whatever happens to the recording,
/// dropping the context tears the bundle down.
pub struct OneShot<'d, B: Backend> {
    device: &'d B,
    raw: B::Transfer,
    copies: usize,
    barriers: usize,
}

impl<'d, B: Backend> OneShot<'d, B> {
    /// Steps 1 and 2: allocator, command buffer, fence and wait handle.
    pub fn begin(device: &'d B) -> Result<Self> {
        let raw = device.begin_transfer()?;
        Ok(Self {
            device,
            raw,
            copies: 0,
            barriers: 0,
        })
    }

    pub fn copy(&mut self, copy: CopyCommand<'_, B::Resource>) {
        self.device.record_copy(&mut self.raw, copy);
        self.copies += 1;
    }

    /// Steps 4 and 5. The context is consumed, so teardown runs as soon as
    /// this returns, on success and failure alike.
    pub fn submit_and_wait(mut self) -> Result<()> {
        log::debug!(
            "submitting one-shot transfer ({} copies, {} barriers)",
            self.copies,
            self.barriers
        );
        self.device.submit(&mut self.raw)?;
        self.device.wait(&mut self.raw)
    }
}

impl<B: Backend> BarrierSink<B::Resource> for OneShot<'_, B> {
    fn barrier(&mut self, barrier: Barrier<'_, B::Resource>) {
        self.device.record_barrier(&mut self.raw, barrier);
        self.barriers += 1;
    }
}

/// Records `record` into a fresh one-shot context, submits it and blocks
/// until the device has executed it.
///
/// Nothing is submitted if creating the context or recording fails. The
/// context is never reused.
pub fn execute_one_shot<B, F>(device: &B, record: F) -> Result<()>
where
    B: Backend,
    F: FnOnce(&mut OneShot<'_, B>) -> Result<()>,
{
    let result = OneShot::begin(device).and_then(|mut ctx| {
        record(&mut ctx)?;
        ctx.submit_and_wait()
    });

    if let Err(err) = &result {
        log::warn!("one-shot transfer aborted: {err}");
    }
    result
}

/// A transient resource released when the scope ends, whichever way it ends.
pub struct ScopedResource<'d, B: Backend> {
    device: &'d B,
    resource: Option<B::Resource>,
}

impl<'d, B: Backend> ScopedResource<'d, B> {
    pub fn allocate(device: &'d B, desc: &ResourceDesc) -> Result<Self> {
        let resource = device.allocate(desc)?;
        Ok(Self {
            device,
            resource: Some(resource),
        })
    }

    pub fn get(&self) -> &B::Resource {
        self.resource
            .as_ref()
            .expect("scoped resource is only taken on drop")
    }

    pub fn get_mut(&mut self) -> &mut B::Resource {
        self.resource
            .as_mut()
            .expect("scoped resource is only taken on drop")
    }
}

impl<B: Backend> Drop for ScopedResource<'_, B> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            self.device.release(resource);
        }
    }
}
