#[cfg(feature = "llgi-serde")]
use serde::{Deserialize, Serialize};

use super::types::TextureType;

/// Backend-agnostic access state of a GPU resource.
///
/// `CopySource`/`CopyDestination` cover Vulkan's `TRANSFER_SRC_OPTIMAL` and
/// `TRANSFER_DST_OPTIMAL` layouts as well as the D3D12 copy states.
#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ResourceState {
    GenericRead,
    CopySource,
    CopyDestination,
    RenderTarget,
    DepthRead,
    DepthWrite,
    PresentSource,
}

impl ResourceState {
    /// State a texture of type `ty` is created in.
    pub fn initial_for(ty: TextureType) -> Self {
        match ty {
            TextureType::Screen => ResourceState::PresentSource,
            TextureType::Color => ResourceState::CopyDestination,
            TextureType::Render => ResourceState::GenericRead,
            TextureType::Depth => ResourceState::DepthRead,
        }
    }

    /// State a texture of type `ty` returns to once an upload completes.
    pub fn steady_for(ty: TextureType) -> Self {
        match ty {
            TextureType::Screen => ResourceState::PresentSource,
            TextureType::Color | TextureType::Render => ResourceState::GenericRead,
            TextureType::Depth => ResourceState::DepthRead,
        }
    }
}

/// A single `before -> after` transition of one resource.
#[derive(Debug)]
pub struct Barrier<'a, R> {
    pub resource: &'a R,
    pub before: ResourceState,
    pub after: ResourceState,
}

/// Anything a barrier can be recorded into.
pub trait BarrierSink<R> {
    fn barrier(&mut self, barrier: Barrier<'_, R>);
}

/// Collects `(before, after)` pairs. Handy when a transition has to be
/// inspected rather than recorded.
impl<R> BarrierSink<R> for Vec<(ResourceState, ResourceState)> {
    fn barrier(&mut self, barrier: Barrier<'_, R>) {
        self.push((barrier.before, barrier.after));
    }
}

/// Last-submitted state of a single resource.
///
/// The recorded state is updated as soon as the barrier is recorded. That is
/// only sound because every transition in this layer goes into the same
/// command stream as the work depending on it, on a single queue.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StateTracker {
    current: ResourceState,
}

impl StateTracker {
    pub fn new(initial: ResourceState) -> Self {
        Self { current: initial }
    }

    pub fn current(&self) -> ResourceState {
        self.current
    }

    /// Records `current -> target` into `sink` unless the resource is
    /// already in `target`. Returns whether a barrier was emitted.
    pub fn transition<R, S>(&mut self, resource: &R, target: ResourceState, sink: &mut S) -> bool
    where
        S: BarrierSink<R> + ?Sized,
    {
        if self.current == target {
            return false;
        }

        log::trace!("barrier {:?} -> {:?}", self.current, target);
        sink.barrier(Barrier {
            resource,
            before: self.current,
            after: target,
        });
        self.current = target;
        true
    }

    /// Copy of the tracker to roll back to if a transfer fails before the
    /// recorded barriers reach the device.
    pub fn snapshot(&self) -> StateTracker {
        *self
    }

    pub fn restore(&mut self, snapshot: StateTracker) {
        self.current = snapshot.current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_transition_emits_one_barrier() {
        let mut tracker = StateTracker::new(ResourceState::CopyDestination);
        let mut sink: Vec<(ResourceState, ResourceState)> = Vec::new();
        let resource = ();

        assert!(tracker.transition(&resource, ResourceState::GenericRead, &mut sink));
        assert!(!tracker.transition(&resource, ResourceState::GenericRead, &mut sink));

        assert_eq!(
            sink,
            vec![(ResourceState::CopyDestination, ResourceState::GenericRead)]
        );
        assert_eq!(tracker.current(), ResourceState::GenericRead);
    }

    #[test]
    fn same_state_is_a_noop() {
        let mut tracker = StateTracker::new(ResourceState::DepthRead);
        let mut sink: Vec<(ResourceState, ResourceState)> = Vec::new();
        assert!(!tracker.transition(&0u8, ResourceState::DepthRead, &mut sink));
        assert!(sink.is_empty());
    }

    #[test]
    fn restore_rolls_back_optimistic_update() {
        let mut tracker = StateTracker::new(ResourceState::PresentSource);
        let snapshot = tracker.snapshot();
        let mut sink: Vec<(ResourceState, ResourceState)> = Vec::new();
        tracker.transition(&(), ResourceState::CopySource, &mut sink);
        tracker.restore(snapshot);
        assert_eq!(tracker.current(), ResourceState::PresentSource);
    }

    #[test]
    fn initial_states_are_never_undefined() {
        assert_eq!(
            ResourceState::initial_for(TextureType::Color),
            ResourceState::CopyDestination
        );
        assert_eq!(
            ResourceState::initial_for(TextureType::Depth),
            ResourceState::DepthRead
        );
        assert_eq!(
            ResourceState::initial_for(TextureType::Render),
            ResourceState::GenericRead
        );
        assert_eq!(
            ResourceState::initial_for(TextureType::Screen),
            ResourceState::PresentSource
        );
    }
}
