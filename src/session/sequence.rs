//! Monotonic correlation counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
///
/// Used for the per-connection ack field and for per-session message IDs.
/// Wraps on overflow; IDs are unique only among in-flight uses.
#[derive(Debug)]
pub struct SequenceCounter {
    next: AtomicU64,
}

impl SequenceCounter {
    /// Create a counter starting at 1 (0 reads as "unset" in diagnostics).
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Take the next value.
    #[inline]
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Current value without advancing (diagnostics only).
    #[inline]
    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}
