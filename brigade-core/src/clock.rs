//! Lamport logical clock for causal ordering of fleet events.
//!
//! Every message on the bus carries a Lamport timestamp. The transport ticks
//! the clock on publish and merges the sender's timestamp on receive, so any
//! event an agent observes carries a value strictly greater than everything
//! it observed before.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonic logical clock.
///
/// All three operations are lock-free and safe under concurrent callers:
/// handler threads merge remote timestamps while periodic loops tick for
/// local events.
#[derive(Debug, Default)]
pub struct LamportClock {
    time: AtomicU64,
}

impl LamportClock {
    /// Create a new clock starting at 0.
    pub fn new() -> Self {
        Self {
            time: AtomicU64::new(0),
        }
    }

    /// Read the current value without advancing it.
    pub fn now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }

    /// Advance the clock for a local event and return the new value.
    pub fn tick(&self) -> u64 {
        self.time.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Merge a timestamp received from another process.
    ///
    /// Sets the clock to `max(local, other) + 1` atomically and returns the
    /// new value.
    pub fn receive(&self, other: u64) -> u64 {
        let mut current = self.time.load(Ordering::SeqCst);
        loop {
            let next = current.max(other) + 1;
            match self.time.compare_exchange_weak(
                current,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }
}
