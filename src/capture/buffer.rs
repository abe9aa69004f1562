//! Bounded in-memory event buffer.
//!
//! Appends never touch disk. When the buffer is full the oldest unflushed
//! event is evicted to admit the new one, so memory stays bounded at the cost
//! of completeness under sustained pressure.

use crate::collector::types::RawEvent;
use crate::transparency::{create_shared_stats, SharedCaptureStats};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Default maximum number of buffered events.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Lock-protected FIFO of events awaiting persistence.
#[derive(Debug)]
pub struct EventBuffer {
    events: Mutex<VecDeque<RawEvent>>,
    capacity: usize,
    stats: SharedCaptureStats,
}

impl EventBuffer {
    /// Create a buffer reporting into the given statistics.
    pub fn new(capacity: usize, stats: SharedCaptureStats) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY))),
            capacity,
            stats,
        }
    }

    /// Create a buffer with its own private statistics.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(capacity, create_shared_stats())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> &SharedCaptureStats {
        &self.stats
    }

    /// Admit an event, evicting the oldest one when full.
    pub fn append(&self, event: RawEvent) {
        let kind = event.kind();
        let evicted = {
            let mut events = self.lock();
            let evicted = if events.len() >= self.capacity {
                events.pop_front().is_some()
            } else {
                false
            };
            events.push_back(event);
            evicted
        };

        self.stats.record_event(kind);
        if evicted {
            self.stats.record_evicted(1);
        }
    }

    /// Swap the contents out for an empty buffer and return them.
    ///
    /// The lock is held only for the swap.
    pub fn drain(&self) -> VecDeque<RawEvent> {
        std::mem::take(&mut *self.lock())
    }

    /// Put a batch that failed to persist back in front of newer events.
    ///
    /// If the combined size exceeds capacity the oldest events are evicted.
    pub fn requeue(&self, batch: VecDeque<RawEvent>) {
        if batch.is_empty() {
            return;
        }

        let evicted = {
            let mut events = self.lock();
            let newer = std::mem::replace(&mut *events, batch);
            events.extend(newer);

            let overflow = events.len().saturating_sub(self.capacity);
            events.drain(..overflow);
            overflow
        };

        if evicted > 0 {
            tracing::warn!(evicted, "buffer overflow while re-enqueueing failed batch");
            self.stats.record_evicted(evicted as u64);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// A poisoned lock still guards a structurally valid queue, so keep using it.
    fn lock(&self) -> MutexGuard<'_, VecDeque<RawEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}
