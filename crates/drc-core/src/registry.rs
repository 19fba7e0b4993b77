//! Outgoing-call registry: identifier allocation and pending bookkeeping.
//!
//! Identifier monotonicity plus single-consumption `take` give
//! at-most-one-resolution per call even though the transport may duplicate,
//! delay, or reorder replies. The registry itself is not synchronized; the
//! session wraps it in a mutex shared between the call façade and the
//! network event loop.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

/// Call identifier, unique among pending calls and never reused within a
/// session lifetime.
pub type CallId = u64;

/// An issued call awaiting its reply.
#[derive(Clone, Debug)]
pub struct PendingCall {
    /// Method name, kept for dispatch and logging.
    pub method: String,
    /// When the call was published, for round-trip timing and eviction.
    pub issued_at: Instant,
}

/// Pending-call table plus the next-identifier counter.
#[derive(Debug, Default)]
pub struct CallRegistry {
    next_id: u64,
    pending: HashMap<CallId, PendingCall>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next unused identifier. Strictly increasing, never reused.
    pub fn allocate_id(&mut self) -> CallId {
        self.next_id += 1;
        self.next_id
    }

    /// Insert a pending record for `id`.
    ///
    /// `allocate_id` monotonicity guarantees `id` is not already pending.
    pub fn register(&mut self, id: CallId, method: impl Into<String>, issued_at: Instant) {
        self.pending.insert(
            id,
            PendingCall {
                method: method.into(),
                issued_at,
            },
        );
    }

    /// Atomically remove and return the record for `id`.
    ///
    /// Exactly-once: a second `take` for the same id returns `None`, which is
    /// how duplicate or delayed replies are kept from double-resolving.
    pub fn take(&mut self, id: CallId) -> Option<PendingCall> {
        self.pending.remove(&id)
    }

    /// Remove and return every record older than `max_age`.
    pub fn sweep_expired(&mut self, now: Instant, max_age: Duration) -> Vec<(CallId, PendingCall)> {
        let expired: Vec<CallId> = self
            .pending
            .iter()
            .filter(|(_, call)| now.duration_since(call.issued_at) > max_age)
            .map(|(id, _)| *id)
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|call| (id, call)))
            .collect()
    }

    /// Number of calls currently awaiting a reply.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
