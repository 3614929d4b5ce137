//! Rank-ordered mutexes enforcing the device-before-stream lock order.
//!
//! Whenever the device lock and a stream lock are both needed, the device
//! lock must be taken first. Instead of documenting that rule in comments,
//! every shared-state mutex carries a [`LockRank`] and acquisition asserts
//! against a thread-local stack of held ranks: acquiring a rank that is not
//! strictly greater than every rank already held panics immediately rather
//! than deadlocking at some later, less reproducible point.

use std::cell::RefCell;
use std::ops::{Deref, DerefMut};

use parking_lot::{Mutex, MutexGuard};

/// Acquisition rank. Lower ranks must be taken first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum LockRank {
    /// Device-wide state; always first.
    Device = 0,
    /// Per-stream state; only after the device lock (or alone).
    Stream = 1,
}

thread_local! {
    /// Ranks currently held by this thread, in acquisition order.
    static HELD_RANKS: RefCell<Vec<LockRank>> = const { RefCell::new(Vec::new()) };
}

/// A mutex that participates in the global acquisition order.
#[derive(Debug)]
pub(crate) struct OrderedMutex<T> {
    rank: LockRank,
    inner: Mutex<T>,
}

impl<T> OrderedMutex<T> {
    pub(crate) fn new(rank: LockRank, value: T) -> Self {
        Self {
            rank,
            inner: Mutex::new(value),
        }
    }

    /// Acquires the lock, asserting rank order against locks already held
    /// by the calling thread.
    pub(crate) fn lock(&self) -> OrderedGuard<'_, T> {
        HELD_RANKS.with(|held| {
            let held = held.borrow();
            if let Some(&highest) = held.iter().max() {
                assert!(
                    self.rank > highest,
                    "lock order violation: acquiring {:?} while holding {:?}",
                    self.rank,
                    highest
                );
            }
        });
        let guard = self.inner.lock();
        HELD_RANKS.with(|held| held.borrow_mut().push(self.rank));
        OrderedGuard {
            rank: self.rank,
            guard,
        }
    }
}

/// Guard returned by [`OrderedMutex::lock`]; unregisters its rank on drop.
pub(crate) struct OrderedGuard<'a, T> {
    rank: LockRank,
    guard: MutexGuard<'a, T>,
}

impl<T> Drop for OrderedGuard<'_, T> {
    fn drop(&mut self) {
        HELD_RANKS.with(|held| {
            let mut held = held.borrow_mut();
            if let Some(pos) = held.iter().rposition(|&r| r == self.rank) {
                held.remove(pos);
            }
        });
    }
}

impl<T> Deref for OrderedGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for OrderedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_then_stream_is_allowed() {
        let device = OrderedMutex::new(LockRank::Device, 1);
        let stream = OrderedMutex::new(LockRank::Stream, 2);

        let d = device.lock();
        let s = stream.lock();
        assert_eq!(*d + *s, 3);
    }

    #[test]
    fn test_stream_alone_is_allowed() {
        let stream = OrderedMutex::new(LockRank::Stream, 7);
        assert_eq!(*stream.lock(), 7);
    }

    #[test]
    fn test_device_reacquire_after_release_is_allowed() {
        let device = OrderedMutex::new(LockRank::Device, 0);
        let stream = OrderedMutex::new(LockRank::Stream, 0);

        // Mirrors the write path: device lock released early, stream kept.
        let d = device.lock();
        let _s = stream.lock();
        drop(d);
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn test_stream_then_device_panics() {
        let device = OrderedMutex::new(LockRank::Device, 1);
        let stream = OrderedMutex::new(LockRank::Stream, 2);

        let _s = stream.lock();
        let _d = device.lock();
    }

    #[test]
    #[should_panic(expected = "lock order violation")]
    fn test_two_stream_locks_panic() {
        let a = OrderedMutex::new(LockRank::Stream, 1);
        let b = OrderedMutex::new(LockRank::Stream, 2);

        let _a = a.lock();
        let _b = b.lock();
    }
}
