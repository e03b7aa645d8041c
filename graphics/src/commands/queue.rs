//! Command queues with timeline fences and deferred reclamation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::CommandList;
use crate::backend::{GpuBackend, QueueRole};
use crate::error::GraphicsError;
use crate::types::FenceValue;

/// Work run once a fence value has been observed complete.
pub type Reclaimer = Box<dyn FnOnce() + Send>;

enum InFlight {
    List(CommandList),
    Reclaimer(Reclaimer),
}

/// One hardware queue and the work it has in flight.
pub struct CommandQueue {
    role: QueueRole,
    backend: Arc<dyn GpuBackend>,
    /// Lists submitted since the last signal.
    unsignaled: Vec<CommandList>,
    in_flight: VecDeque<(FenceValue, InFlight)>,
    last_signaled: FenceValue,
    submitted_lists: u64,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("role", &self.role)
            .field("in_flight", &self.in_flight.len())
            .field("last_signaled", &self.last_signaled)
            .finish_non_exhaustive()
    }
}

impl CommandQueue {
    pub fn new(role: QueueRole, backend: Arc<dyn GpuBackend>) -> Self {
        Self {
            role,
            backend,
            unsignaled: Vec::new(),
            in_flight: VecDeque::new(),
            last_signaled: FenceValue::ZERO,
            submitted_lists: 0,
        }
    }

    pub fn role(&self) -> QueueRole {
        self.role
    }

    /// Execute a closed list. The list is held until the next signaled fence completes.
    pub fn submit(&mut self, mut list: CommandList) -> Result<(), GraphicsError> {
        if list.queue() != self.role {
            log::warn!(
                "list '{}' recorded for {:?} submitted to {:?}",
                list.name(),
                list.queue(),
                self.role
            );
        }
        let commands = list.steal_commands()?;
        log::trace!(
            "{:?}: submitting '{}' ({} commands)",
            self.role,
            list.name(),
            commands.len()
        );
        self.backend.execute(self.role, &commands)?;
        list.on_submitted()?;
        self.unsignaled.push(list);
        self.submitted_lists += 1;
        Ok(())
    }

    /// Signal the queue's timeline and bind every unsignaled list to the value.
    pub fn signal(&mut self) -> FenceValue {
        let value = self.backend.signal(self.role);
        for list in self.unsignaled.drain(..) {
            self.in_flight.push_back((value, InFlight::List(list)));
        }
        self.last_signaled = value;
        value
    }

    /// Make this queue wait for `value` on `other` before later submissions.
    pub fn wait_for(&self, other: QueueRole, value: FenceValue) {
        self.backend.queue_wait(self.role, other, value);
    }

    pub fn last_signaled(&self) -> FenceValue {
        self.last_signaled
    }

    pub fn completed_value(&self) -> FenceValue {
        self.backend.completed_value(self.role)
    }

    pub fn is_complete(&self, value: FenceValue) -> bool {
        self.completed_value() >= value
    }

    /// Block until `value` completes. Returns `false` on time-out.
    pub fn wait(&self, value: FenceValue, timeout: Option<Duration>) -> bool {
        self.backend.wait_for_fence(self.role, value, timeout)
    }

    /// Run `reclaimer` once `value` has completed.
    pub fn defer_until(&mut self, value: FenceValue, reclaimer: Reclaimer) {
        self.in_flight.push_back((value, InFlight::Reclaimer(reclaimer)));
    }

    /// Run due reclaimers and return the lists whose fence completed, reset to Free.
    pub fn process_completed(&mut self) -> Vec<CommandList> {
        let completed = self.completed_value();
        let mut lists = Vec::new();
        let mut keep = VecDeque::with_capacity(self.in_flight.len());
        for (value, item) in self.in_flight.drain(..) {
            if value > completed {
                keep.push_back((value, item));
                continue;
            }
            match item {
                InFlight::List(mut list) => match list.on_executed() {
                    Ok(()) => lists.push(list),
                    Err(err) => log::error!("{err}"),
                },
                InFlight::Reclaimer(reclaim) => reclaim(),
            }
        }
        self.in_flight = keep;
        lists
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len() + self.unsignaled.len()
    }

    pub fn submitted_lists(&self) -> u64 {
        self.submitted_lists
    }

    /// Signal and block until everything submitted so far has completed.
    pub fn wait_idle(&mut self) -> Result<Vec<CommandList>, GraphicsError> {
        let value = if self.unsignaled.is_empty() {
            self.last_signaled
        } else {
            self.signal()
        };
        if !self.wait(value, None) {
            return Err(GraphicsError::Timeout(value.get()));
        }
        Ok(self.process_completed())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use kiln_core::pool::Poolable;

    use super::*;
    use crate::backend::DummyBackend;
    use crate::commands::{Command, CommandListState};
    use crate::config::FenceMode;

    fn closed_list(role: QueueRole) -> CommandList {
        let mut list = CommandList::new_empty();
        list.begin_recording("queue-test", role).unwrap();
        list.push(Command::BeginEvent("marker".into())).unwrap();
        list.push(Command::EndEvent).unwrap();
        list.end_recording().unwrap();
        list
    }

    #[test]
    fn lists_return_after_fence_completes() {
        let backend = Arc::new(DummyBackend::new(FenceMode::Manual));
        let mut queue = CommandQueue::new(QueueRole::Graphics, backend.clone());
        queue.submit(closed_list(QueueRole::Graphics)).unwrap();
        let fence = queue.signal();

        assert!(queue.process_completed().is_empty());
        backend.complete_fences(QueueRole::Graphics, fence);
        let lists = queue.process_completed();
        assert_eq!(lists.len(), 1);
        assert_eq!(lists[0].state(), CommandListState::Free);
    }

    #[test]
    fn reclaimers_run_once() {
        let backend = Arc::new(DummyBackend::new(FenceMode::Manual));
        let mut queue = CommandQueue::new(QueueRole::Transfer, backend.clone());
        let runs = Arc::new(AtomicUsize::new(0));
        let fence = queue.signal();
        let counter = runs.clone();
        queue.defer_until(
            fence,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        queue.process_completed();
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        backend.complete_fences(QueueRole::Transfer, fence);
        queue.process_completed();
        queue.process_completed();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_without_deadline_completes_manual_fences() {
        let backend = Arc::new(DummyBackend::new(FenceMode::Manual));
        let mut queue = CommandQueue::new(QueueRole::Graphics, backend);
        queue.submit(closed_list(QueueRole::Graphics)).unwrap();
        let fence = queue.signal();
        assert!(!queue.wait(fence, Some(Duration::from_millis(1))));
        assert!(queue.wait(fence, None));
        assert!(queue.is_complete(fence));
    }
}
