//! Bounded FIFO of enriched events awaiting delivery.
//!
//! Semantics
//! - FIFO order of enqueued events is preserved through `drain` and through
//!   `requeue_front` on retry.
//! - Capacity is fixed at construction; overflow applies the configured
//!   [`OverflowPolicy`].
//! - A batch requeued at the front is always the part that survives an
//!   overflow, under either policy.
//!
//! All operations are total (they never fail) and atomic with respect to
//! each other: producers may enqueue while the dispatcher drains.

use crate::event::EnrichedEvent;
use std::collections::VecDeque;
use std::sync::Mutex;

/// What to do when an enqueue would exceed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the head (oldest event) to make room for the incoming one.
    #[default]
    DropOldest,
    /// Refuse the incoming event.
    DropNewest,
}

/// Thread-safe bounded FIFO of events waiting for a batch slot.
#[derive(Debug)]
pub struct EventQueue {
    inner: Mutex<VecDeque<EnrichedEvent>>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events (clamped to ≥ 1).
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            policy,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<EnrichedEvent>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append at the tail, applying the overflow policy when full.
    pub fn enqueue(&self, event: EnrichedEvent) {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    queue.pop_front();
                    tracing::warn!(capacity = self.capacity, "event queue full, dropping oldest event");
                }
                OverflowPolicy::DropNewest => {
                    tracing::warn!(capacity = self.capacity, "event queue full, refusing incoming event");
                    return;
                }
            }
        }
        queue.push_back(event);
    }

    /// Remove and return up to `max` events from the head, in order.
    pub fn drain(&self, max: usize) -> Vec<EnrichedEvent> {
        let mut queue = self.lock();
        let count = max.min(queue.len());
        queue.drain(..count).collect()
    }

    /// Reinsert a drained batch at the head, preserving its internal order.
    ///
    /// If the reinsertion overflows capacity, events other than the
    /// just-requeued ones are discarded: from the tail under
    /// [`OverflowPolicy::DropOldest`], from just behind the requeued block
    /// under [`OverflowPolicy::DropNewest`].
    pub fn requeue_front(&self, batch: Vec<EnrichedEvent>) {
        if batch.is_empty() {
            return;
        }
        let mut queue = self.lock();
        let requeued = batch.len();
        for event in batch.into_iter().rev() {
            queue.push_front(event);
        }
        let mut dropped = 0usize;
        while queue.len() > self.capacity {
            let removed = match self.policy {
                OverflowPolicy::DropOldest => queue.pop_back(),
                OverflowPolicy::DropNewest if requeued < queue.len() => queue.remove(requeued),
                OverflowPolicy::DropNewest => queue.pop_back(),
            };
            if removed.is_none() {
                break;
            }
            dropped += 1;
        }
        if dropped > 0 {
            tracing::warn!(dropped, capacity = self.capacity, "requeue overflowed queue capacity");
        }
    }

    /// Discard up to `n` head events without returning them.
    pub fn drop_front(&self, n: usize) {
        let mut queue = self.lock();
        let count = n.min(queue.len());
        queue.drain(..count);
    }

    /// Empty the queue.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Current number of queued events.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Configured capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
