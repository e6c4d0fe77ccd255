use std::sync::atomic::{AtomicU64, Ordering};

/// Process-local monotonic revision allocator.
///
/// Seeded from `MAX(revision)` of the log table at startup. A revision
/// handed out by [`Sequence::next`] is never reused, even when the
/// transaction that claimed it aborts; the follower tolerates the
/// resulting holes.
#[derive(Debug)]
pub struct Sequence {
    value: AtomicU64,
}

impl Sequence {
    /// Create a sequence whose next value is `start + 1`.
    pub fn new(start: u64) -> Self {
        Self {
            value: AtomicU64::new(start),
        }
    }

    /// Allocate the next revision.
    pub fn next(&self) -> u64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently allocated revision (or the seed if none).
    pub fn current(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}
