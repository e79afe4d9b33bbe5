//! Accounting for backend-instance and task-group memory.
//!
//! Every tracked allocation adds to process-wide counters and removes itself
//! when dropped, so leaks on error paths show up as counters that do not
//! return to their baseline.

use crate::HalError;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

static LIVE_ALLOCS: AtomicUsize = AtomicUsize::new(0);
static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);
// 0 disarmed, n > 0 fails the n-th next allocation
static FAIL_COUNTDOWN: AtomicUsize = AtomicUsize::new(0);

/// Snapshot of the tracked allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemStats {
    /// Allocations currently alive.
    pub live_allocs: usize,
    /// Bytes currently alive.
    pub live_bytes: usize,
}

/// Current counters.
#[must_use]
pub fn stats() -> MemStats {
    MemStats {
        live_allocs: LIVE_ALLOCS.load(Ordering::SeqCst),
        live_bytes: LIVE_BYTES.load(Ordering::SeqCst),
    }
}

/// Make the `n`-th next tracked allocation fail, once. Zero disarms.
pub fn fail_nth_alloc(n: usize) {
    FAIL_COUNTDOWN.store(n, Ordering::SeqCst);
}

fn should_fail() -> bool {
    FAIL_COUNTDOWN
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok_and(|prev| prev == 1)
}

/// One live tracked allocation.
pub(crate) struct Allocation {
    tag: &'static str,
    size: usize,
}

impl Allocation {
    pub(crate) fn new(tag: &'static str, size: usize) -> Result<Self, HalError> {
        if should_fail() {
            log::error!("{tag}: allocation of {size} bytes failed");
            return Err(HalError::AllocationFailure(tag.to_string()));
        }
        LIVE_ALLOCS.fetch_add(1, Ordering::SeqCst);
        LIVE_BYTES.fetch_add(size, Ordering::SeqCst);
        Ok(Self { tag, size })
    }
}

impl fmt::Debug for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Allocation({}, {} bytes)", self.tag, self.size)
    }
}

impl Drop for Allocation {
    fn drop(&mut self) {
        LIVE_ALLOCS.fetch_sub(1, Ordering::SeqCst);
        LIVE_BYTES.fetch_sub(self.size, Ordering::SeqCst);
    }
}

/// A boxed value whose memory is tracked.
#[derive(Debug)]
pub(crate) struct Tracked<T> {
    value: Box<T>,
    _alloc: Allocation,
}

impl<T> Tracked<T> {
    pub(crate) fn new(value: Box<T>, alloc: Allocation) -> Self {
        Self {
            value,
            _alloc: alloc,
        }
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
