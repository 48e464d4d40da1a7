//! TTAS (Test-Test-And-Set) spin mutex.
//!
//! The test phase spins on a relaxed load so the line stays shared in cache;
//! only when the lock looks free does the swap go out. Waiters back off
//! exponentially and fall back to yielding, since a holder may sit in a
//! grace-period wait for a while.

use std::cell::UnsafeCell;
use std::hint::spin_loop;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

const SPIN_LIMIT: u32 = 6;

/// A TTAS spin lock around `data`.
pub struct SpinMutex<T: ?Sized> {
    acquired: AtomicBool,
    data: UnsafeCell<T>,
}

// SAFETY: the lock hands out at most one `&mut T` at a time.
unsafe impl<T: ?Sized + Send> Send for SpinMutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinMutex<T> {}

impl<T> SpinMutex<T> {
    /// Creates an unlocked mutex wrapping `data`.
    pub const fn new(data: T) -> Self {
        Self {
            acquired: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SpinMutex<T> {
    /// Acquires the lock, spinning (and eventually yielding) until it is
    /// available.
    #[inline]
    pub fn lock(&self) -> SpinMutexGuard<'_, T> {
        let mut step = 0u32;
        loop {
            // Test phase: wait on a relaxed load.
            while self.acquired.load(Ordering::Relaxed) {
                if step <= SPIN_LIMIT {
                    for _ in 0..(1 << step) {
                        spin_loop();
                    }
                    step += 1;
                } else {
                    thread::yield_now();
                }
            }
            // Test-and-set phase.
            if !self.acquired.swap(true, Ordering::Acquire) {
                return SpinMutexGuard { mutex: self };
            }
        }
    }

    /// Acquires the lock only if it is free right now.
    #[inline]
    pub fn try_lock(&self) -> Option<SpinMutexGuard<'_, T>> {
        if self.acquired.load(Ordering::Relaxed) {
            return None;
        }
        if self.acquired.swap(true, Ordering::Acquire) {
            return None;
        }
        Some(SpinMutexGuard { mutex: self })
    }
}

/// RAII guard for a [`SpinMutex`]. Releases the lock on drop.
pub struct SpinMutexGuard<'a, T: ?Sized> {
    mutex: &'a SpinMutex<T>,
}

impl<T: ?Sized> Deref for SpinMutexGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means holding the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinMutexGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard means holding the lock.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for SpinMutexGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.mutex.acquired.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = SpinMutex::new(1);
        let guard = mutex.lock();
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn contended_increments_are_not_lost() {
        let mutex = Arc::new(SpinMutex::new(0usize));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*mutex.lock(), 8000);
    }
}
