//! Sample Fan-out
//!
//! Each session publishes into one [`BroadcastPoint`]. Every subscriber
//! holds its own receiver with an isolated read position over a bounded
//! ring buffer.
//!
//! # Backpressure
//!
//! Publishing never waits. When a receiver falls more than `capacity`
//! samples behind, the oldest unread samples are overwritten and that
//! receiver observes a lag on its next read, then resumes from the oldest
//! retained sample. Other receivers are unaffected. This is acceptable for
//! a latest-value feed; it is not an event log.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::domain::feed::PriceSample;

/// Default number of samples retained per session.
pub const DEFAULT_CAPACITY: usize = 64;

/// Fan-out point for one session's samples.
#[derive(Debug)]
pub struct BroadcastPoint {
    tx: broadcast::Sender<PriceSample>,
    published: AtomicU64,
    unobserved: AtomicU64,
}

impl BroadcastPoint {
    /// Create a fan-out point retaining up to `capacity` samples.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity.max(1)).0,
            published: AtomicU64::new(0),
            unobserved: AtomicU64::new(0),
        }
    }

    /// Publish a sample to all current receivers.
    ///
    /// Returns the number of receivers the sample was queued for, or `None`
    /// if nobody is listening (the sample is then discarded).
    pub fn publish(&self, sample: PriceSample) -> Option<usize> {
        self.published.fetch_add(1, Ordering::Relaxed);
        let delivered = self.tx.send(sample).ok();
        if delivered.is_none() {
            self.unobserved.fetch_add(1, Ordering::Relaxed);
        }
        delivered
    }

    /// Get a new receiver positioned after the most recent sample.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PriceSample> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Counters since creation.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            receivers: self.receiver_count(),
            published: self.published.load(Ordering::Relaxed),
            unobserved: self.unobserved.load(Ordering::Relaxed),
        }
    }
}

impl Default for BroadcastPoint {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Counters for one fan-out point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Live receivers.
    pub receivers: usize,
    /// Samples handed to [`BroadcastPoint::publish`].
    pub published: u64,
    /// Samples published while no receiver existed.
    pub unobserved: u64,
}

// =============================================================================
// Tests
// =============================================================================
