//! Resource states and the per-frame state tracker.
//!
//! The tracker remembers the state every registered resource is in as of the
//! end of the commands recorded so far, plus the transitions that have been
//! requested but not yet emitted. Pending transitions are coalesced per
//! resource: `A -> B` followed by `B -> C` becomes `A -> C`, and a chain that
//! returns to its starting state disappears.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::types::GpuResourceId;

bitflags! {
    /// GPU resource states. Read states may be combined; write states are exclusive.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResourceState: u32 {
        const COMMON = 0;
        const VERTEX_AND_CONSTANT_BUFFER = 1 << 0;
        const INDEX_BUFFER = 1 << 1;
        const RENDER_TARGET = 1 << 2;
        const UNORDERED_ACCESS = 1 << 3;
        const DEPTH_WRITE = 1 << 4;
        const DEPTH_READ = 1 << 5;
        const SHADER_RESOURCE = 1 << 6;
        const INDIRECT_ARGUMENT = 1 << 7;
        const COPY_DEST = 1 << 8;
        const COPY_SOURCE = 1 << 9;
        const PRESENT = 1 << 10;
    }
}

impl ResourceState {
    /// States that allow the GPU to write the resource.
    pub const WRITE_STATES: ResourceState = ResourceState::RENDER_TARGET
        .union(ResourceState::UNORDERED_ACCESS)
        .union(ResourceState::DEPTH_WRITE)
        .union(ResourceState::COPY_DEST);

    pub fn is_write(self) -> bool {
        self.intersects(Self::WRITE_STATES)
    }

    /// Whether being in `self` satisfies a requirement for `required`.
    pub fn satisfies(self, required: ResourceState) -> bool {
        if required.is_empty() {
            return self.is_empty();
        }
        self.contains(required)
    }
}

/// One state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceBarrier {
    pub resource: GpuResourceId,
    pub before: ResourceState,
    pub after: ResourceState,
}

#[derive(Debug, Clone, Copy)]
struct TrackedResource {
    initial: ResourceState,
    /// State as of the last flushed barrier.
    flushed: ResourceState,
    /// State the resource will be in once pending barriers flush.
    current: ResourceState,
    keep_initial: bool,
    final_state: Option<ResourceState>,
}

/// Tracks resource states across the command lists recorded in one frame.
///
/// The tracker is moved from recorder to recorder, so passes recorded into
/// separate command lists still see each other's transitions.
#[derive(Debug, Default)]
pub struct ResourceStateTracker {
    resources: HashMap<GpuResourceId, TrackedResource>,
    /// Resources with a pending transition, in the order first requested.
    pending: Vec<GpuResourceId>,
}

impl ResourceStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource. Re-registering an already tracked resource is a no-op
    /// and returns `false`.
    pub fn begin_tracking(
        &mut self,
        resource: GpuResourceId,
        initial: ResourceState,
        keep_initial: bool,
    ) -> bool {
        if self.resources.contains_key(&resource) {
            return false;
        }
        self.resources.insert(
            resource,
            TrackedResource {
                initial,
                flushed: initial,
                current: initial,
                keep_initial,
                final_state: None,
            },
        );
        true
    }

    pub fn is_tracked(&self, resource: GpuResourceId) -> bool {
        self.resources.contains_key(&resource)
    }

    /// State the resource will be in after pending transitions.
    pub fn current_state(&self, resource: GpuResourceId) -> Option<ResourceState> {
        self.resources.get(&resource).map(|r| r.current)
    }

    /// Request a transition to `after`. Returns `false` if the resource is untracked.
    pub fn transition(&mut self, resource: GpuResourceId, after: ResourceState) -> bool {
        let Some(tracked) = self.resources.get_mut(&resource) else {
            return false;
        };
        if tracked.current == after {
            return true;
        }
        tracked.current = after;
        if !self.pending.contains(&resource) {
            self.pending.push(resource);
        }
        true
    }

    /// Overwrite the tracked state without emitting a barrier.
    pub(crate) fn assume_state(&mut self, resource: GpuResourceId, state: ResourceState) {
        if let Some(tracked) = self.resources.get_mut(&resource) {
            tracked.flushed = state;
            tracked.current = state;
        }
    }

    pub fn has_pending(&self) -> bool {
        self.pending
            .iter()
            .any(|id| self.resources.get(id).is_some_and(|r| r.flushed != r.current))
    }

    /// Drain pending transitions into barriers, dropping no-op chains.
    pub fn flush(&mut self) -> Vec<ResourceBarrier> {
        let mut barriers = Vec::with_capacity(self.pending.len());
        for id in self.pending.drain(..) {
            let Some(tracked) = self.resources.get_mut(&id) else {
                continue;
            };
            if tracked.flushed != tracked.current {
                barriers.push(ResourceBarrier {
                    resource: id,
                    before: tracked.flushed,
                    after: tracked.current,
                });
                tracked.flushed = tracked.current;
            }
        }
        barriers
    }

    /// Mark the state `resource` must be left in when recording ends.
    pub fn set_final_state(&mut self, resource: GpuResourceId, state: ResourceState) -> bool {
        match self.resources.get_mut(&resource) {
            Some(tracked) => {
                tracked.final_state = Some(state);
                true
            }
            None => false,
        }
    }

    /// Queue transitions back to the initial state for resources registered
    /// with `keep_initial`, and to the final state for resources that have one.
    pub fn restore_initial_states(&mut self) {
        let mut targets: Vec<_> = self
            .resources
            .iter()
            .filter_map(|(id, r)| {
                r.final_state
                    .or(r.keep_initial.then_some(r.initial))
                    .map(|state| (*id, state))
            })
            .collect();
        targets.sort_by_key(|(id, _)| *id);
        for (id, state) in targets {
            self.transition(id, state);
        }
    }

    /// Stop tracking a resource, returning its last state.
    pub fn end_tracking(&mut self, resource: GpuResourceId) -> Option<ResourceState> {
        self.pending.retain(|id| *id != resource);
        self.resources.remove(&resource).map(|r| r.flushed)
    }

    /// Flushed state of every tracked resource, sorted by id.
    pub fn states(&self) -> Vec<(GpuResourceId, ResourceState)> {
        let mut states: Vec<_> = self
            .resources
            .iter()
            .map(|(id, r)| (*id, r.flushed))
            .collect();
        states.sort_by_key(|(id, _)| *id);
        states
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
