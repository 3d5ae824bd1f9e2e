//! Pending remote candidate queue
//!
//! Remote candidates can arrive before the remote description they belong to
//! has been applied. They are held here and drained exactly once, in arrival
//! order, when the remote description becomes available. The queue never
//! evicts: a push beyond capacity is refused and the caller decides what to
//! do with the refused candidate.

use crate::types::IceCandidatePayload;
use std::collections::VecDeque;
use thiserror::Error;

/// Default capacity, comfortably above what a single gathering pass produces
pub const DEFAULT_QUEUE_CAPACITY: usize = 512;

/// Queue errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Capacity reached; the candidate was not stored
    #[error("Pending candidate queue is full ({capacity} entries)")]
    Full {
        /// Configured capacity
        capacity: usize,
    },
}

/// Bounded FIFO of candidates awaiting a remote description
#[derive(Debug, Clone)]
pub struct PendingCandidateQueue {
    items: VecDeque<IceCandidatePayload>,
    capacity: usize,
    total_queued: u64,
}

impl PendingCandidateQueue {
    /// Create a queue; a zero capacity is raised to one
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            total_queued: 0,
        }
    }

    /// Defer a candidate
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Full`] when the queue is at capacity.
    pub fn push(&mut self, candidate: IceCandidatePayload) -> Result<(), QueueError> {
        if self.items.len() >= self.capacity {
            return Err(QueueError::Full {
                capacity: self.capacity,
            });
        }
        self.items.push_back(candidate);
        self.total_queued += 1;
        Ok(())
    }

    /// Remove and return every queued candidate in arrival order
    pub fn drain(&mut self) -> Vec<IceCandidatePayload> {
        self.items.drain(..).collect()
    }

    /// Number of candidates waiting
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is waiting
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Configured capacity
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Candidates ever accepted by [`push`](Self::push)
    #[must_use]
    pub fn total_queued(&self) -> u64 {
        self.total_queued
    }
}

impl Default for PendingCandidateQueue {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}
