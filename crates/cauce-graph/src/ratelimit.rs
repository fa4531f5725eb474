//! Burst limiter for log lines emitted from data threads.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Default window length.
pub const DEFAULT_INTERVAL_NSEC: u64 = 2_000_000_000;

/// Default number of lines allowed per window.
pub const DEFAULT_BURST: u32 = 1;

/// Allows `burst` events per `interval` and counts the rest.
///
/// Fields are atomics so the limiter can live in shared node state, but it
/// expects one writer at a time (the loop currently running the node).
#[derive(Debug)]
pub struct RateLimit {
    interval: u64,
    burst: u32,
    begin: AtomicU64,
    printed: AtomicU32,
    missed: AtomicU32,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_NSEC, DEFAULT_BURST)
    }
}

impl RateLimit {
    /// Creates a limiter with the given window and burst.
    pub fn new(interval: u64, burst: u32) -> Self {
        Self {
            interval,
            burst,
            begin: AtomicU64::new(0),
            printed: AtomicU32::new(0),
            missed: AtomicU32::new(0),
        }
    }

    /// Returns `true` when an event at `now` may be logged.
    ///
    /// Opening a new window reports how many events the previous one
    /// suppressed.
    pub fn test(&self, now: u64) -> bool {
        let begin = self.begin.load(Ordering::Relaxed);
        if begin.saturating_add(self.interval) < now {
            let missed = self.missed.swap(0, Ordering::Relaxed);
            if missed > 0 {
                tracing::warn!("{} events suppressed", missed);
            }
            self.begin.store(now, Ordering::Relaxed);
            self.printed.store(0, Ordering::Relaxed);
        } else if self.printed.load(Ordering::Relaxed) >= self.burst {
            self.missed.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.printed.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Events suppressed in the current window.
    pub fn missed(&self) -> u32 {
        self.missed.load(Ordering::Relaxed)
    }
}
