//! Correlation Table - pending-response slots for in-flight outbound calls.
//!
//! Flow:
//! 1. `send_call` calls `open()` to get a fresh correlation id and a waiter
//! 2. The call message is published with that id and the reply queue
//! 3. The response listener calls `settle()` with the decoded response
//! 4. The caller waits on the waiter, bounded by the call timeout
//! 5. On timeout the caller calls `timed_out()`, so a late response is dropped
//!
//! Every slot leaves the table exactly once, whichever of response, timeout
//! or engine stop comes first.

use crate::runtime::{deadline_after, Runtime};
use crate::types::{CorrelationId, Response};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A pending slot.
struct Slot<C> {
    /// Write half of the single-assignment cell
    cell: C,
    /// When the slot was opened
    created_at: Instant,
    /// When the caller stops waiting
    deadline: Instant,
    /// `service.method`, for logging
    label: String,
}

/// Statistics for the correlation table
#[derive(Debug, Default)]
pub struct CorrelationStats {
    /// Slots opened
    pub registered: AtomicU64,
    /// Slots settled with a response
    pub completed: AtomicU64,
    /// Slots removed because their caller timed out
    pub timeouts: AtomicU64,
    /// Responses that found no slot (or no waiter)
    pub late_responses: AtomicU64,
    /// Slots dropped at engine stop
    pub abandoned: AtomicU64,
    /// Slots removed because the caller dropped its pending call
    pub cancelled: AtomicU64,
}

/// Correlation id keyed table of pending slots.
pub struct CorrelationTable<R: Runtime> {
    slots: DashMap<CorrelationId, Slot<R::Cell>>,
    stats: CorrelationStats,
}

impl<R: Runtime> Default for CorrelationTable<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Runtime> CorrelationTable<R> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
            stats: CorrelationStats::default(),
        }
    }

    /// Create a slot under `id`.
    ///
    /// Returns `None` if `id` is already outstanding.
    pub fn create(
        &self,
        runtime: &R,
        id: CorrelationId,
        label: &str,
        timeout: Duration,
    ) -> Option<R::Waiter> {
        match self.slots.entry(id) {
            Entry::Occupied(occupied) => {
                warn!(
                    correlation_id = %occupied.key(),
                    "Refusing to reuse an outstanding correlation id"
                );
                None
            }
            Entry::Vacant(vacant) => {
                let (cell, waiter) = runtime.slot();
                let now = Instant::now();
                debug!(
                    correlation_id = %vacant.key(),
                    method = label,
                    timeout_ms = timeout.as_millis(),
                    "Registered pending call"
                );
                vacant.insert(Slot {
                    cell,
                    created_at: now,
                    deadline: deadline_after(now, timeout),
                    label: label.to_string(),
                });
                self.stats.registered.fetch_add(1, Ordering::Relaxed);
                Some(waiter)
            }
        }
    }

    /// Create a slot under a freshly generated id.
    pub fn open(&self, runtime: &R, label: &str, timeout: Duration) -> (CorrelationId, R::Waiter) {
        loop {
            let id = CorrelationId::new();
            if let Some(waiter) = self.create(runtime, id.clone(), label, timeout) {
                return (id, waiter);
            }
        }
    }

    /// Settle the slot for `id` with `response`.
    ///
    /// Returns false if no slot exists (timed out, or never opened) or its
    /// waiter has already gone; the response is dropped.
    pub fn settle(&self, runtime: &R, id: &CorrelationId, response: Response) -> bool {
        let Some((_, slot)) = self.slots.remove(id) else {
            self.stats.late_responses.fetch_add(1, Ordering::Relaxed);
            debug!(correlation_id = %id, "Response for unknown or expired correlation id");
            return false;
        };

        let elapsed = slot.created_at.elapsed();
        if runtime.settle(slot.cell, response) {
            self.stats.completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %id,
                method = slot.label,
                response_time_ms = elapsed.as_millis(),
                "Completed pending call"
            );
            true
        } else {
            self.stats.late_responses.fetch_add(1, Ordering::Relaxed);
            debug!(
                correlation_id = %id,
                method = slot.label,
                "Pending call waiter dropped"
            );
            false
        }
    }

    /// Remove a slot without settling it (publish failed).
    pub fn remove(&self, id: &CorrelationId) -> bool {
        self.slots.remove(id).is_some()
    }

    /// Remove a slot whose caller went away before settlement or timeout.
    ///
    /// Silent when the slot is already gone.
    pub fn cancel(&self, id: &CorrelationId) -> bool {
        match self.slots.remove(id) {
            Some((_, slot)) => {
                self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
                debug!(
                    correlation_id = %id,
                    method = slot.label,
                    "Pending call dropped by its caller"
                );
                true
            }
            None => false,
        }
    }

    /// Remove a slot whose caller stopped waiting.
    pub fn timed_out(&self, id: &CorrelationId) -> bool {
        match self.slots.remove(id) {
            Some((_, slot)) => {
                self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    correlation_id = %id,
                    method = slot.label,
                    elapsed_ms = slot.created_at.elapsed().as_millis(),
                    "Pending call timed out"
                );
                true
            }
            None => false,
        }
    }

    /// Remove slots whose deadline has passed.
    ///
    /// Returns the number of slots removed.
    pub fn expire(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;

        self.slots.retain(|id, slot| {
            if now > slot.deadline {
                warn!(
                    correlation_id = %id,
                    method = slot.label,
                    "Removing expired pending call"
                );
                removed += 1;
                false
            } else {
                true
            }
        });

        self.stats
            .timeouts
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Drop every slot. Waiters observe an abandoned settlement.
    pub fn abandon_all(&self) -> usize {
        let ids: Vec<CorrelationId> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut abandoned = 0;
        for id in ids {
            if self.slots.remove(&id).is_some() {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            self.stats
                .abandoned
                .fetch_add(abandoned as u64, Ordering::Relaxed);
            debug!(abandoned, "Abandoned pending calls");
        }
        abandoned
    }

    /// Number of outstanding slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check if a correlation id is outstanding
    pub fn is_pending(&self, id: &CorrelationId) -> bool {
        self.slots.contains_key(id)
    }

    /// Get statistics
    pub fn stats(&self) -> &CorrelationStats {
        &self.stats
    }
}
