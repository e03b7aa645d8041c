//! Ticket bookkeeping for in-flight uploads.
//!
//! Every submission yields an [`UploadTicket`] bound to the transfer-queue
//! fence value that completes it. The tracker mirrors the queue's completed
//! value in an [`ObservableValue`], so blocking and async waiters share one
//! wake-once primitive.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use kiln_core::compute::ObservableValue;
use parking_lot::Mutex;

use super::request::{UploadError, UploadResult};
use crate::types::{FenceValue, TicketId};

/// Handle to a submitted upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UploadTicket {
    pub id: TicketId,
    /// Transfer fence value that completes the upload; zero for tickets that
    /// failed before reaching the GPU.
    pub fence: FenceValue,
}

/// Result of waiting on a ticket with a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwaitOutcome {
    Completed(UploadResult),
    TimedOut(UploadTicket),
}

impl AwaitOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Pending { fence: FenceValue, bytes: u64 },
    Failed(UploadError),
    Canceled,
}

/// Shared ticket table. Clones refer to the same table.
#[derive(Debug, Clone)]
pub struct UploadTracker {
    entries: Arc<Mutex<HashMap<TicketId, Entry>>>,
    next_id: Arc<AtomicU64>,
    completed: ObservableValue<FenceValue>,
}

impl Default for UploadTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadTracker {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
            completed: ObservableValue::new(FenceValue::ZERO),
        }
    }

    fn next_ticket(&self, fence: FenceValue) -> UploadTicket {
        UploadTicket {
            id: TicketId::new(self.next_id.fetch_add(1, Ordering::Relaxed)),
            fence,
        }
    }

    /// Track an upload that completes when `fence` does.
    pub fn register_pending(&self, fence: FenceValue, bytes: u64) -> UploadTicket {
        let ticket = self.next_ticket(fence);
        self.entries
            .lock()
            .insert(ticket.id, Entry::Pending { fence, bytes });
        ticket
    }

    /// Track an upload that failed before any GPU work was scheduled.
    /// The ticket is complete immediately.
    pub fn register_failed(&self, error: UploadError) -> UploadTicket {
        let ticket = self.next_ticket(FenceValue::ZERO);
        log::debug!("upload ticket {} failed: {error}", ticket.id);
        self.entries.lock().insert(ticket.id, Entry::Failed(error));
        ticket
    }

    /// Record that the transfer queue has completed `fence`. Returns whether
    /// the value advanced.
    pub fn observe_completed(&self, fence: FenceValue) -> bool {
        self.completed.advance_to(fence)
    }

    pub fn completed_fence(&self) -> FenceValue {
        self.completed.get()
    }

    /// The observable completed fence, for callers that await it directly.
    pub fn completed_observable(&self) -> ObservableValue<FenceValue> {
        self.completed.clone()
    }

    fn entry_complete(&self, entry: &Entry) -> bool {
        match entry {
            Entry::Pending { fence, .. } => self.completed.get() >= *fence,
            Entry::Failed(_) | Entry::Canceled => true,
        }
    }

    /// Forgotten tickets stay complete once the completed fence has
    /// reached them.
    pub fn is_complete(&self, ticket: UploadTicket) -> bool {
        match self.entries.lock().get(&ticket.id) {
            Some(entry) => self.entry_complete(entry),
            None => self.issued(ticket) && self.completed.get() >= ticket.fence,
        }
    }

    fn issued(&self, ticket: UploadTicket) -> bool {
        ticket.id.get() < self.next_id.load(Ordering::Relaxed)
    }

    /// The result, once the ticket is complete.
    pub fn try_get_result(&self, ticket: UploadTicket) -> Option<UploadResult> {
        let entries = self.entries.lock();
        let entry = entries.get(&ticket.id)?;
        if !self.entry_complete(entry) {
            return None;
        }
        Some(match entry {
            Entry::Pending { bytes, .. } => UploadResult {
                ticket: ticket.id,
                bytes_uploaded: *bytes,
                outcome: Ok(()),
            },
            Entry::Failed(error) => UploadResult {
                ticket: ticket.id,
                bytes_uploaded: 0,
                outcome: Err(error.clone()),
            },
            Entry::Canceled => UploadResult {
                ticket: ticket.id,
                bytes_uploaded: 0,
                outcome: Err(UploadError::Canceled),
            },
        })
    }

    /// Best-effort cancel: a submitted copy still runs, but the ticket
    /// reports [`UploadError::Canceled`]. Returns false for unknown or
    /// already complete tickets.
    pub fn cancel(&self, ticket: UploadTicket) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(&ticket.id) {
            Some(entry) if !self.entry_complete(entry) => {
                entries.insert(ticket.id, Entry::Canceled);
                true
            }
            _ => false,
        }
    }

    /// Drop bookkeeping for a consumed ticket.
    pub fn forget(&self, ticket: UploadTicket) {
        self.entries.lock().remove(&ticket.id);
    }

    pub fn pending_count(&self) -> usize {
        let entries = self.entries.lock();
        entries
            .values()
            .filter(|entry| !self.entry_complete(entry))
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Block on the completed-fence observable until `ticket` completes.
    ///
    /// Some other party must advance the observable (see
    /// [`UploadCoordinator::await_ticket`](super::UploadCoordinator::await_ticket)
    /// for a wait that also drives the transfer queue).
    pub fn await_ticket(&self, ticket: UploadTicket, timeout: Option<Duration>) -> AwaitOutcome {
        if let Some(result) = self.try_get_result(ticket) {
            return AwaitOutcome::Completed(result);
        }
        self.completed.wait_at_least(ticket.fence, timeout);
        match self.try_get_result(ticket) {
            Some(result) => AwaitOutcome::Completed(result),
            None => AwaitOutcome::TimedOut(ticket),
        }
    }

    /// Wait for every ticket against one shared deadline.
    pub fn await_all(&self, tickets: &[UploadTicket], timeout: Option<Duration>) -> Vec<AwaitOutcome> {
        let deadline = timeout.map(|t| Instant::now() + t);
        tickets
            .iter()
            .map(|ticket| {
                let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
                self.await_ticket(*ticket, remaining)
            })
            .collect()
    }

    /// Suspend until `ticket` completes. Resolves to `None` for unknown tickets.
    pub fn await_async(&self, ticket: UploadTicket) -> impl Future<Output = Option<UploadResult>> + Send + 'static {
        let tracker = self.clone();
        async move {
            if !tracker.entries.lock().contains_key(&ticket.id) {
                return None;
            }
            tracker.completed.at_least(ticket.fence).await;
            tracker.try_get_result(ticket)
        }
    }
}
