//! Quiescent-state RCU with one epoch per thread.
//!
//! Readers bump a private 64-bit counter on entering and leaving a read
//! section — no CAS, no shared-cacheline contention. A writer that has
//! unlinked data calls [`synchronize`](RcuLock::synchronize), which waits
//! until every thread that was inside a read section at the time of the call
//! has left it. After that, no reader can still hold a pointer observed
//! before the unlink, and the data may be freed.
//!
//! Parity carries the state: an even epoch means quiescent, odd means inside
//! a read section. Any change of an odd epoch witnesses that the reader has
//! left the section it was in when the snapshot was taken.

use std::marker::PhantomData;
use std::sync::atomic::fence;
use std::thread;

use portable_atomic::{AtomicU64, Ordering};

use crate::registry::Registry;

/// A quiescent-state RCU lock.
///
/// Read sections on one `RcuLock` must not nest on the same thread; debug
/// builds assert this.
pub struct RcuLock {
    epochs: Registry<AtomicU64>,
}

impl RcuLock {
    /// Creates a lock with no registered readers.
    pub fn new() -> Self {
        Self {
            epochs: Registry::new(|| AtomicU64::new(0)),
        }
    }

    /// Enters a read section.
    ///
    /// Pointers loaded while the returned guard is live stay valid until the
    /// guard is dropped, provided their unlinker synchronizes on this lock
    /// before freeing.
    #[inline]
    pub fn read(&self) -> RcuGuard<'_> {
        let epoch = self.epochs.get();
        let seen = epoch.load(Ordering::Relaxed);
        debug_assert!(seen & 1 == 0, "read sections do not nest on one RcuLock");
        // SeqCst orders the bump before every load inside the section, so a
        // writer whose synchronize misses this section cannot have its
        // unlink observed by us.
        epoch.store(seen.wrapping_add(1), Ordering::SeqCst);
        RcuGuard {
            epoch,
            _not_send: PhantomData,
        }
    }

    /// Waits for a grace period: every reader that was inside a read section
    /// when this call started has left it by the time it returns.
    ///
    /// Runs to completion; there is no timeout. The calling thread must not
    /// be inside a read section on this lock.
    pub fn synchronize(&self) {
        // Order the caller's unlink stores before the epoch scan.
        fence(Ordering::SeqCst);
        let snapshot: Vec<(&AtomicU64, u64)> = self
            .epochs
            .iter()
            .map(|epoch| (epoch, epoch.load(Ordering::Acquire)))
            .collect();
        for (epoch, seen) in snapshot {
            if seen & 1 == 1 {
                while epoch.load(Ordering::Acquire) == seen {
                    thread::yield_now();
                }
            }
        }
    }
}

impl Default for RcuLock {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a read section on an [`RcuLock`].
pub struct RcuGuard<'a> {
    epoch: &'a AtomicU64,
    /// The epoch cell belongs to the creating thread; moving the guard to
    /// another thread would let that thread re-enter while we look odd.
    _not_send: PhantomData<*mut ()>,
}

impl Drop for RcuGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        let seen = self.epoch.load(Ordering::Relaxed);
        debug_assert!(seen & 1 == 1, "read section already closed");
        self.epoch.store(seen.wrapping_add(1), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_toggles_parity() {
        let rcu = RcuLock::new();
        {
            let _guard = rcu.read();
            let epoch = rcu.epochs.iter().next().unwrap();
            assert_eq!(epoch.load(Ordering::Relaxed) & 1, 1);
        }
        let epoch = rcu.epochs.iter().next().unwrap();
        assert_eq!(epoch.load(Ordering::Relaxed) & 1, 0);
    }

    #[test]
    fn synchronize_with_no_readers_returns() {
        let rcu = RcuLock::new();
        rcu.synchronize();
        let _guard = rcu.read();
        drop(_guard);
        rcu.synchronize();
    }
}
