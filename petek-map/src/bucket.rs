//! Bucket: a sentinel-headed singly-linked list with two next slots per node.
//!
//! Each node carries a *pair* of next pointers indexed by a 0/1 snapshot
//! index, so the same allocation can be chained into two tables at once
//! while a resize is in flight: the outgoing table links through one slot,
//! its successor through the other. The slots never alias, so readers of
//! either chain see untouched links.
//!
//! Writers serialize on the bucket's mutex. Readers never take it — they
//! traverse inside an RCU read section of the shard that covers this bucket,
//! and every unlink waits a grace period on that shard before freeing.

use std::borrow::Borrow;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use petek::{ShardedRcu, SpinMutex};

/// Scan length in a single bucket at which a writer proposes growing the
/// table. Shrinking is proposed when occupancy falls below half this ratio.
pub(crate) const GROW_SCAN_THRESHOLD: u32 = 5;

pub(crate) struct Node<K, V> {
    pub(crate) hash: u64,
    pub(crate) key: K,
    pub(crate) value: V,
    /// One link per snapshot index. After publication a slot changes at most
    /// once: either the node is spliced out of that chain, or a migration
    /// threads the *other* slot into a successor bucket.
    pub(crate) next: [AtomicPtr<Node<K, V>>; 2],
}

/// One hash slot: the sentinel head links plus the writer mutex.
pub(crate) struct Bucket<K, V> {
    head: [AtomicPtr<Node<K, V>>; 2],
    pub(crate) mutex: SpinMutex<()>,
}

impl<K, V> Bucket<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            head: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
            mutex: SpinMutex::new(()),
        }
    }

    /// First node of the chain on snapshot `s`.
    #[inline]
    pub(crate) fn head_ptr(&self, s: usize) -> *mut Node<K, V> {
        self.head[s].load(Ordering::Acquire)
    }

    /// Threads an existing node into the front of this bucket's chain on
    /// snapshot `s` without reallocating it. Caller holds the bucket mutex.
    pub(crate) fn relink(&self, node: *mut Node<K, V>, s: usize) {
        // SAFETY: the node is live (it is still reachable from the chain it
        // is migrating out of) and slot `s` belongs to this chain alone.
        unsafe {
            (*node).next[s].store(self.head[s].load(Ordering::Relaxed), Ordering::Relaxed);
        }
        self.head[s].store(node, Ordering::Release);
    }

    /// Cuts the whole chain on snapshot `s` in one step.
    pub(crate) fn cut(&self, s: usize) {
        self.head[s].store(ptr::null_mut(), Ordering::Release);
    }

    /// Frees every node reachable on snapshot `s`.
    ///
    /// # Safety
    ///
    /// Caller must have exclusive access to every node on the chain: no
    /// reader may be inside a covering read section and no other chain may
    /// still link these nodes.
    pub(crate) unsafe fn free_chain(&mut self, s: usize) {
        let mut cur = self.head[s].load(Ordering::Relaxed);
        while !cur.is_null() {
            // SAFETY: per the contract above; nodes are freed exactly once.
            let next = unsafe { (*cur).next[s].load(Ordering::Relaxed) };
            unsafe { drop(Box::from_raw(cur)) };
            cur = next;
        }
        self.head[s].store(ptr::null_mut(), Ordering::Relaxed);
    }
}

impl<K: Eq, V> Bucket<K, V> {
    /// Writer-side scan on snapshot `s`. Returns whether `key` is present
    /// and how many nodes were examined — the scan count is the table's
    /// only growth signal. Caller holds the bucket mutex.
    fn find<Q>(&self, hash: u64, key: &Q, s: usize) -> (bool, u32)
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut scanned = 0u32;
        let mut cur = self.head[s].load(Ordering::Acquire);
        while !cur.is_null() {
            scanned += 1;
            // SAFETY: the mutex excludes unlinks from this chain, so every
            // reachable node stays live for the scan.
            let node = unsafe { &*cur };
            if node.hash == hash && node.key.borrow() == key {
                return (true, scanned);
            }
            cur = node.next[s].load(Ordering::Acquire);
        }
        (false, scanned)
    }

    /// Inserts on snapshot `s` unless `key` is already present. Returns
    /// whether a node was published plus the scan count. Caller holds the
    /// bucket mutex.
    pub(crate) fn insert(&self, hash: u64, key: K, value: V, s: usize) -> (bool, u32) {
        let (found, scanned) = self.find(hash, &key, s);
        if found {
            return (false, scanned);
        }
        let node = Box::into_raw(Box::new(Node {
            hash,
            key,
            value,
            next: [
                AtomicPtr::new(ptr::null_mut()),
                AtomicPtr::new(ptr::null_mut()),
            ],
        }));
        // Chain the node in before publishing it; the release store to the
        // head is the publication point, after which key and value are
        // immutable.
        // SAFETY: the node is ours until published.
        unsafe {
            (*node).next[s].store(self.head[s].load(Ordering::Relaxed), Ordering::Relaxed);
        }
        self.head[s].store(node, Ordering::Release);
        (true, scanned)
    }

    /// Unlinks `key` on snapshot `s`, waits a grace period on `shard`, then
    /// frees the node. Caller holds the bucket mutex.
    pub(crate) fn remove<Q>(
        &self,
        hash: u64,
        key: &Q,
        s: usize,
        rcu: &ShardedRcu,
        shard: usize,
    ) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
    {
        let mut prev: &AtomicPtr<Node<K, V>> = &self.head[s];
        let mut cur = prev.load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: the mutex excludes other unlinks from this chain.
            let node = unsafe { &*cur };
            if node.hash == hash && node.key.borrow() == key {
                let next = node.next[s].load(Ordering::Acquire);
                prev.store(next, Ordering::Release);
                // Readers may still be walking through the victim; wait
                // them out before freeing it. Unlinked nodes are never
                // re-linked.
                rcu.synchronize(shard);
                // SAFETY: unreachable since the unlink above, and the grace
                // period flushed every section that could still see it.
                unsafe { drop(Box::from_raw(cur)) };
                return true;
            }
            prev = &node.next[s];
            cur = prev.load(Ordering::Acquire);
        }
        false
    }

    /// Reader-side search on snapshot `s`, copying the value out.
    ///
    /// Caller must be inside the read section of the shard covering this
    /// bucket; the clone happens under that protection.
    pub(crate) fn lookup<Q>(&self, hash: u64, key: &Q, s: usize) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + ?Sized,
        V: Clone,
    {
        let mut cur = self.head[s].load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: unlinked nodes are freed only after a grace period on
            // our shard, which cannot elapse while we are in section.
            let node = unsafe { &*cur };
            if node.hash == hash && node.key.borrow() == key {
                return Some(node.value.clone());
            }
            cur = node.next[s].load(Ordering::Acquire);
        }
        None
    }

    /// Clones every entry on snapshot `s` into `out`. Same protection
    /// contract as [`lookup`](Bucket::lookup).
    pub(crate) fn collect_into(&self, s: usize, out: &mut Vec<(K, V)>)
    where
        K: Clone,
        V: Clone,
    {
        let mut cur = self.head[s].load(Ordering::Acquire);
        while !cur.is_null() {
            // SAFETY: as in `lookup`.
            let node = unsafe { &*cur };
            out.push((node.key.clone(), node.value.clone()));
            cur = node.next[s].load(Ordering::Acquire);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_find_remove_on_one_snapshot() {
        let rcu = ShardedRcu::new(1);
        let bucket: Bucket<u32, u32> = Bucket::new();
        let _writer = bucket.mutex.lock();

        assert_eq!(bucket.insert(9, 1, 10, 0), (true, 0));
        assert_eq!(bucket.insert(9, 1, 11, 0), (false, 1));
        assert_eq!(bucket.lookup(9, &1, 0), Some(10));
        assert_eq!(bucket.lookup(9, &1, 1), None);

        assert!(bucket.remove(9, &1, 0, &rcu, 0));
        assert!(!bucket.remove(9, &1, 0, &rcu, 0));
        assert_eq!(bucket.lookup(9, &1, 0), None);
    }

    #[test]
    fn scan_count_reports_chain_length() {
        let mut bucket: Bucket<u32, u32> = Bucket::new();
        {
            let _writer = bucket.mutex.lock();
            for i in 0..6 {
                bucket.insert(u64::from(i), i, i, 0);
            }
            let (inserted, scanned) = bucket.insert(100, 100, 100, 0);
            assert!(inserted);
            assert_eq!(scanned, 6);
        }
        // SAFETY: single-threaded test, no concurrent readers.
        unsafe { bucket.free_chain(0) };
    }
}
