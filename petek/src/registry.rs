//! Per-thread cell registry.
//!
//! A [`Registry<T>`] hands every thread that touches it one private cell and
//! lets any thread enumerate all cells ever created. Cells live in an
//! intrusive singly-linked list owned by the registry — not by the threads —
//! so enumeration stays valid after the owning threads exit.
//!
//! Each thread finds its cell again through a thread-local table keyed by the
//! registry's id. Ids come from a process-wide monotonic counter and are
//! never reused, so a stale entry left behind by a dropped registry can never
//! resolve into a different registry's cell. The stale entries themselves are
//! retained until the thread exits; their footprint is bounded by the number
//! of registries the thread has touched.

use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Cell cache of the calling thread: registry id → slot pointer.
    static LOCAL_SLOTS: RefCell<HashMap<u64, *mut ()>> = RefCell::new(HashMap::new());
}

struct Slot<T> {
    next: AtomicPtr<Slot<T>>,
    data: T,
}

/// A registry of per-thread cells with writer-side enumeration.
///
/// Cells are never relocated and individual cells cannot be removed; the
/// whole list is torn down by [`clear`](Registry::clear) or on drop, both of
/// which require exclusive access.
pub struct Registry<T> {
    /// Sentinel slot; its `data` is never handed out.
    head: *mut Slot<T>,
    tail: AtomicPtr<Slot<T>>,
    id: u64,
    init: Box<dyn Fn() -> T + Send + Sync>,
}

// SAFETY: cells are only reached through `&self`; shared access hands out
// `&T` across threads (T: Sync) and the list is freed wherever the registry
// is dropped (T: Send). The raw head/tail pointers always point into the
// registry-owned list.
unsafe impl<T: Send + Sync> Send for Registry<T> {}
unsafe impl<T: Send + Sync> Sync for Registry<T> {}

impl<T> Registry<T> {
    /// Creates an empty registry. `init` constructs each thread's cell on
    /// that thread's first access.
    pub fn new(init: impl Fn() -> T + Send + Sync + 'static) -> Self {
        let sentinel = Box::into_raw(Box::new(Slot {
            next: AtomicPtr::new(ptr::null_mut()),
            data: init(),
        }));
        Self {
            head: sentinel,
            tail: AtomicPtr::new(sentinel),
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            init: Box::new(init),
        }
    }

    /// Returns the calling thread's cell, creating and linking it on first
    /// access. Creation is lock-free with respect to concurrent creators.
    pub fn get(&self) -> &T {
        let slot = LOCAL_SLOTS.with(|slots| {
            let mut slots = slots.borrow_mut();
            match slots.get(&self.id) {
                Some(&p) => p as *mut Slot<T>,
                None => {
                    let p = self.link_new_slot();
                    slots.insert(self.id, p as *mut ());
                    p
                }
            }
        });
        // SAFETY: slots are never relocated and are freed only by `clear`
        // or drop, both of which take `&mut self` and so cannot overlap
        // with this borrow.
        unsafe { &(*slot).data }
    }

    /// Appends a freshly allocated slot at the list tail.
    fn link_new_slot(&self) -> *mut Slot<T> {
        let slot = Box::into_raw(Box::new(Slot {
            next: AtomicPtr::new(ptr::null_mut()),
            data: (self.init)(),
        }));
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: `tail` always points at a live slot of this registry.
            let next = unsafe { &(*tail).next };
            match next.compare_exchange(
                ptr::null_mut(),
                slot,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let _ = self.tail.compare_exchange(
                        tail,
                        slot,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                    return slot;
                }
                Err(appended) => {
                    // Another creator got in first; swing the tail forward
                    // for it and retry.
                    let _ = self.tail.compare_exchange(
                        tail,
                        appended,
                        Ordering::AcqRel,
                        Ordering::Relaxed,
                    );
                }
            }
        }
    }

    /// Iterates over all cells in insertion order.
    ///
    /// Cells created concurrently with the iteration may or may not appear.
    pub fn iter(&self) -> Iter<'_, T> {
        // SAFETY: the sentinel outlives `&self`.
        let first = unsafe { (*self.head).next.load(Ordering::Acquire) };
        Iter {
            next: first,
            _registry: PhantomData,
        }
    }

    /// Destroys every cell and re-keys the registry under a fresh id.
    ///
    /// Exclusive access guarantees no thread still holds a reference into
    /// the list; the id change guarantees no thread's cached slot pointer
    /// for the old incarnation is ever consulted again.
    pub fn clear(&mut self) {
        self.free_list();
        let sentinel = Box::into_raw(Box::new(Slot {
            next: AtomicPtr::new(ptr::null_mut()),
            data: (self.init)(),
        }));
        self.head = sentinel;
        self.tail = AtomicPtr::new(sentinel);
        self.id = NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed);
    }

    fn free_list(&mut self) {
        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: exclusive access; every slot in the list was produced
            // by `Box::into_raw` and is freed exactly once.
            let next = unsafe { (*cur).next.load(Ordering::Relaxed) };
            unsafe { drop(Box::from_raw(cur)) };
            cur = next;
        }
        self.head = ptr::null_mut();
    }
}

impl<T> Drop for Registry<T> {
    fn drop(&mut self) {
        self.free_list();
    }
}

/// Iterator over the cells of a [`Registry`].
pub struct Iter<'a, T> {
    next: *mut Slot<T>,
    _registry: PhantomData<&'a Registry<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.next.is_null() {
            return None;
        }
        // SAFETY: slots reachable from the list live as long as the
        // registry borrow `'a`.
        let slot = unsafe { &*self.next };
        self.next = slot.next.load(Ordering::Acquire);
        Some(&slot.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    #[test]
    fn one_cell_per_thread() {
        let registry = Registry::new(|| AtomicUsize::new(0));
        registry.get().store(7, Ordering::Relaxed);
        registry.get().store(8, Ordering::Relaxed);
        assert_eq!(registry.iter().count(), 1);
        assert_eq!(registry.iter().next().unwrap().load(Ordering::Relaxed), 8);
    }

    #[test]
    fn enumerates_cells_of_exited_threads() {
        let registry = Arc::new(Registry::new(|| AtomicUsize::new(0)));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get().store(i, Ordering::Relaxed))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut seen: Vec<usize> = registry
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed))
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn clear_rebuilds_an_empty_list() {
        let mut registry = Registry::new(|| AtomicUsize::new(0));
        registry.get();
        assert_eq!(registry.iter().count(), 1);

        registry.clear();
        assert_eq!(registry.iter().count(), 0);

        // The same thread gets a fresh cell under the new incarnation.
        registry.get().store(3, Ordering::Relaxed);
        assert_eq!(registry.iter().count(), 1);
    }

    #[test]
    fn distinct_registries_do_not_share_cells() {
        let a = Registry::new(|| AtomicUsize::new(0));
        let b = Registry::new(|| AtomicUsize::new(0));
        a.get().store(1, Ordering::Relaxed);
        b.get().store(2, Ordering::Relaxed);
        assert_eq!(a.get().load(Ordering::Relaxed), 1);
        assert_eq!(b.get().load(Ordering::Relaxed), 2);
    }
}
