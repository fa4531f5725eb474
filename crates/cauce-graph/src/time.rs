//! Monotonic nanosecond clock shared by all data loops.

use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds since the first call in this process.
#[inline]
pub fn now_nsec() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
