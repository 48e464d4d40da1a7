//! RcuMap: the user-facing handle.
//!
//! Wraps every public operation in an outer RCU read section so the live
//! table pointer can never be reclaimed mid-call, routes operations across
//! the migration frontier while a resize is in flight, and coordinates the
//! cooperative resize itself.

use std::borrow::Borrow;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use foldhash::fast::FixedState;
use petek::{RcuLock, SpinMutex, SpinMutexGuard};

use crate::bucket::GROW_SCAN_THRESHOLD;
use crate::table::Table;

/// A concurrent hash table with wait-free readers and online resize.
///
/// Readers pay two uncontended atomic increments per lookup (the outer and
/// the per-bucket read section) and never block, spin, or CAS. Writers
/// serialize per bucket. When a bucket's chain grows past a threshold the
/// table grows in the background of ordinary writer calls, without ever
/// stopping readers; when occupancy falls far enough it shrinks the same
/// way.
///
/// `insert` rejects duplicate keys rather than updating them — a present
/// key keeps its value and `insert` returns `false`. Model an update as
/// `remove` followed by `insert`.
pub struct RcuMap<K, V, S = FixedState> {
    current: AtomicPtr<Table<K, V>>,
    /// Protects the `current` pointer itself: tables are freed only after a
    /// grace period on this lock.
    rcu: RcuLock,
    /// Serializes migrations and `clear`. Resize winners `try_lock`, so
    /// writers that lose simply carry on.
    resize_lock: SpinMutex<()>,
    /// Requested successor width; −1 means no resize is wanted.
    pending_resize: AtomicIsize,
    /// Signed so that operations racing a `clear` against the outgoing
    /// table can transiently undershoot without wrapping.
    len: AtomicIsize,
    bucket_limit: Option<usize>,
    hasher: S,
}

// SAFETY: nodes migrate between threads (K: Send, V: Send) and are borrowed
// from reader threads for hashing and cloning (K: Sync, V: Sync). The raw
// table pointer is guarded by the outer RCU protocol.
unsafe impl<K: Send + Sync, V: Send + Sync, S: Send> Send for RcuMap<K, V, S> {}
unsafe impl<K: Send + Sync, V: Send + Sync, S: Sync> Sync for RcuMap<K, V, S> {}

impl<K, V> RcuMap<K, V, FixedState>
where
    K: Hash + Eq,
    V: Clone,
{
    /// Creates a map with `bucket_count` initial buckets.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_count` is zero.
    pub fn new(bucket_count: usize) -> Self {
        Self::with_hasher(bucket_count, FixedState::default())
    }

    /// Creates a map whose bucket count never exceeds `limit`.
    ///
    /// Growth stops at the limit; the chains simply get longer. Mostly
    /// useful for debugging pathological hashers.
    pub fn with_bucket_limit(bucket_count: usize, limit: usize) -> Self {
        assert!(limit >= bucket_count, "limit below initial bucket count");
        let mut map = Self::new(bucket_count);
        map.bucket_limit = Some(limit);
        map
    }
}

impl<K, V, S> RcuMap<K, V, S>
where
    K: Hash + Eq,
    V: Clone,
    S: BuildHasher,
{
    /// Creates a map with `bucket_count` initial buckets and a custom
    /// hasher.
    ///
    /// # Panics
    ///
    /// Panics if `bucket_count` is zero.
    pub fn with_hasher(bucket_count: usize, hasher: S) -> Self {
        assert!(bucket_count >= 1, "bucket count must be at least 1");
        Self {
            current: AtomicPtr::new(Box::into_raw(Table::new(bucket_count, 0))),
            rcu: RcuLock::new(),
            resize_lock: SpinMutex::new(()),
            pending_resize: AtomicIsize::new(-1),
            len: AtomicIsize::new(0),
            bucket_limit: None,
            hasher,
        }
    }

    /// Inserts `key → value`. Returns `true` if inserted, `false` if the
    /// key was already present (the stored value is left untouched).
    pub fn insert(&self, key: K, value: V) -> bool {
        let hash = self.hasher.hash_one(&key);
        let (inserted, scanned, buckets) = {
            let _outer = self.rcu.read();
            let (table, index, _writer) = self.writer_bucket(hash);
            let (inserted, scanned) =
                table.buckets[index].insert(hash, key, value, table.snapshot);
            (inserted, scanned, table.bucket_count())
        };
        if scanned >= GROW_SCAN_THRESHOLD {
            self.propose_grow(buckets);
        }
        if inserted {
            self.len.fetch_add(1, Ordering::Relaxed);
            self.maybe_resize();
        }
        inserted
    }

    /// Removes `key`. Returns `true` if it was present.
    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        let (removed, buckets) = {
            let _outer = self.rcu.read();
            let (table, index, _writer) = self.writer_bucket(hash);
            let removed =
                table.buckets[index].remove(hash, key, table.snapshot, &table.rcu, index);
            (removed, table.bucket_count())
        };
        if removed {
            let len = self.len.fetch_sub(1, Ordering::Relaxed) - 1;
            self.propose_shrink(buckets, len.max(0) as usize);
            self.maybe_resize();
        }
        removed
    }

    /// Returns a copy of the value stored under `key`.
    ///
    /// Never blocks and never triggers a resize. During a migration the key
    /// is found on whichever side currently links it — a reader can never
    /// observe a present key as absent.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = self.hasher.hash_one(key);
        let _outer = self.rcu.read();
        let table = self.current_table();
        let index = table.bucket_of(hash);

        // Old chain first: it keeps every node of this bucket until the
        // drain's atomic cut, and after the cut the successor chain is
        // complete. Scanning in this order leaves no window where a present
        // key misses on both sides.
        {
            let _shard = table.rcu.read(index);
            if let Some(value) = table.buckets[index].lookup(hash, key, table.snapshot) {
                return Some(value);
            }
        }
        if table.is_migrated(index) {
            let successor = self.successor_table(table);
            let new_index = successor.bucket_of(hash);
            let _shard = successor.rcu.read(new_index);
            return successor.buckets[new_index].lookup(hash, key, successor.snapshot);
        }
        None
    }

    /// Alias for [`get`](RcuMap::get), under the name RCU literature uses.
    pub fn lookup<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key)
    }

    /// Whether `key` is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Discards every entry, keeping the current bucket count.
    ///
    /// Waits out a grace period, so the memory of all discarded entries is
    /// actually released on return. Insertions racing with a `clear` may
    /// land in the discarded table.
    pub fn clear(&self) {
        let _coordinator = self.resize_lock.lock();
        self.pending_resize.store(-1, Ordering::Release);
        // SAFETY: tables are freed only by resize/clear, both serialized by
        // the resize lock we hold, so the pointer is stable without an
        // outer read section.
        let bucket_count = unsafe { &*self.current.load(Ordering::Acquire) }.bucket_count();
        let fresh = Box::into_raw(Table::new(bucket_count, 0));
        let old = self.current.swap(fresh, Ordering::AcqRel);
        self.rcu.synchronize();
        self.len.store(0, Ordering::Relaxed);
        // SAFETY: replaced, and the grace period flushed every section that
        // could still reach it.
        unsafe { drop(Box::from_raw(old)) };
    }

    /// Number of entries. O(1); approximate while writers are active.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bucket count.
    pub fn bucket_count(&self) -> usize {
        let _outer = self.rcu.read();
        self.current_table().bucket_count()
    }

    /// The map's hasher.
    pub fn hasher(&self) -> &S {
        &self.hasher
    }

    /// Clones every entry into a vector, one bucket at a time under that
    /// bucket's read protection, and iterates the result.
    ///
    /// Weakly consistent: entries moved by a concurrent resize may be
    /// missed or reported twice, and entries inserted or removed during
    /// the scan may or may not appear.
    pub fn iter(&self) -> Iter<K, V>
    where
        K: Clone,
    {
        let mut entries = Vec::new();
        {
            let _outer = self.rcu.read();
            let table = self.current_table();
            for index in 0..table.bucket_count() {
                if table.is_migrated(index) {
                    continue; // drained; picked up from the successor below
                }
                let _shard = table.rcu.read(index);
                table.buckets[index].collect_into(table.snapshot, &mut entries);
            }
            if table.is_migrated(0) {
                let successor = self.successor_table(table);
                for index in 0..successor.bucket_count() {
                    let _shard = successor.rcu.read(index);
                    successor.buckets[index].collect_into(successor.snapshot, &mut entries);
                }
            }
        }
        Iter {
            entries: entries.into_iter(),
        }
    }

    /// Iterates over cloned keys. Same consistency as [`iter`](RcuMap::iter).
    pub fn keys(&self) -> Keys<K, V>
    where
        K: Clone,
    {
        Keys { iter: self.iter() }
    }

    /// The live table. Caller must be inside an outer read section, or hold
    /// the resize lock.
    #[inline]
    fn current_table(&self) -> &Table<K, V> {
        // SAFETY: per the caller contract, the table cannot be freed — the
        // free paths either wait an outer grace period or hold the resize
        // lock.
        unsafe { &*self.current.load(Ordering::Acquire) }
    }

    /// The successor of `table`. Caller must have observed one of the
    /// migration signals (frontier or pending kickoff), which are ordered
    /// after the successor store.
    #[inline]
    fn successor_table<'a>(&self, table: &'a Table<K, V>) -> &'a Table<K, V> {
        let successor = table.successor.load(Ordering::Acquire);
        debug_assert!(!successor.is_null());
        // SAFETY: non-null per the ordering argument above; lives at least
        // as long as `table` stays observable (it is freed strictly later).
        unsafe { &*successor }
    }

    /// Picks the bucket a writer for `hash` must lock, following the
    /// migration frontier across tables. Caller must be inside an outer
    /// read section.
    ///
    /// When the bucket has been handed to the successor, a lock/unlock of
    /// the *old* bucket's mutex serves as a barrier: the migrator holds
    /// that mutex for the whole drain, so once we get it the bucket is
    /// fully cut over and the successor is the sole owner of its keys.
    fn writer_bucket(&self, hash: u64) -> (&Table<K, V>, usize, SpinMutexGuard<'_, ()>) {
        let mut table = self.current_table();
        loop {
            let index = table.bucket_of(hash);
            if table.is_migrated(index) {
                drop(table.buckets[index].mutex.lock());
                table = self.successor_table(table);
                continue;
            }
            let writer = table.buckets[index].mutex.lock();
            if table.is_migrated(index) {
                // Drained while we waited for the lock; re-route.
                drop(writer);
                continue;
            }
            return (table, index, writer);
        }
    }

    /// Requests growth to `2n + 1` buckets. The request is a CAS from the
    /// idle state, so at most one resize is ever pending.
    fn propose_grow(&self, buckets: usize) {
        let mut target = buckets * 2 + 1;
        if let Some(limit) = self.bucket_limit {
            if buckets >= limit {
                return;
            }
            target = target.min(limit);
        }
        let _ = self.pending_resize.compare_exchange(
            -1,
            target as isize,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Requests shrink to `n/2 + 1` buckets when the table has become
    /// sparse.
    fn propose_shrink(&self, buckets: usize, len: usize) {
        if (GROW_SCAN_THRESHOLD as usize) * buckets < 2 * len {
            return;
        }
        let target = buckets / 2 + 1;
        if target >= buckets {
            return;
        }
        let _ = self.pending_resize.compare_exchange(
            -1,
            target as isize,
            Ordering::AcqRel,
            Ordering::Relaxed,
        );
    }

    /// Cooperative resize kickoff, run by writers after a successful
    /// insert/remove, outside their outer read section. Whoever wins the
    /// try-lock performs the whole migration; everyone else skips.
    fn maybe_resize(&self) {
        if self.pending_resize.load(Ordering::Acquire) < 0 {
            return;
        }
        let Some(_coordinator) = self.resize_lock.try_lock() else {
            return;
        };
        let target = self.pending_resize.load(Ordering::Acquire);
        if target >= 0 {
            self.resize(target as usize);
            self.pending_resize.store(-1, Ordering::Release);
        }
    }

    /// Runs the full migration to a `target`-bucket successor.
    ///
    /// Caller holds the resize lock and is *not* inside an outer read
    /// section (the grace periods below would wait on it forever).
    fn resize(&self, target: usize) {
        // SAFETY: stable under the resize lock, as in `clear`.
        let table = unsafe { &*self.current.load(Ordering::Acquire) };
        if target == table.bucket_count() {
            return;
        }

        let successor = Box::into_raw(Table::new(target, table.snapshot ^ 1));
        table.successor.store(successor, Ordering::Release);
        // After this grace period every operation that consults the
        // frontier can also see the successor pointer.
        self.rcu.synchronize();

        // SAFETY: just allocated, published only through `table`.
        table.drain_into(unsafe { &*successor });

        let old = self.current.swap(successor, Ordering::AcqRel);
        self.rcu.synchronize();
        // SAFETY: replaced, grace period elapsed, and every chain was cut
        // during the drain — dropping frees no migrated node.
        unsafe { drop(Box::from_raw(old)) };
    }
}

impl<K, V, S> Drop for RcuMap<K, V, S> {
    fn drop(&mut self) {
        // Exclusive access: no caller can be mid-flight and no resize is
        // running, so the current table (and its nodes) go down with us.
        let table = self.current.load(Ordering::Acquire);
        // SAFETY: `current` always holds a live table allocated by
        // `Table::new`.
        unsafe { drop(Box::from_raw(table)) };
    }
}

/// Iterator over cloned `(key, value)` pairs. See [`RcuMap::iter`].
pub struct Iter<K, V> {
    entries: std::vec::IntoIter<(K, V)>,
}

impl<K, V> Iterator for Iter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<(K, V)> {
        self.entries.next()
    }
}

/// Iterator over cloned keys. See [`RcuMap::keys`].
pub struct Keys<K, V> {
    iter: Iter<K, V>,
}

impl<K, V> Iterator for Keys<K, V> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.iter.next().map(|(key, _)| key)
    }
}

impl<'a, K, V, S> IntoIterator for &'a RcuMap<K, V, S>
where
    K: Hash + Eq + Clone,
    V: Clone,
    S: BuildHasher,
{
    type Item = (K, V);
    type IntoIter = Iter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_get() {
        let map = RcuMap::new(4);
        assert!(map.insert(1, 100));
        assert_eq!(map.get(&1), Some(100));
        assert_eq!(map.get(&2), None);
    }

    #[test]
    fn duplicate_insert_keeps_first_value() {
        let map = RcuMap::new(4);
        assert!(map.insert(7, 1));
        assert!(!map.insert(7, 2));
        assert_eq!(map.get(&7), Some(1));
    }

    #[test]
    fn remove_then_reinsert() {
        let map = RcuMap::new(4);
        assert!(map.insert(2, 20));
        assert!(map.remove(&2));
        assert!(!map.remove(&2));
        assert_eq!(map.get(&2), None);
        assert!(map.insert(2, 21));
        assert_eq!(map.get(&2), Some(21));
    }

    #[test]
    fn borrowed_key_lookup() {
        let map: RcuMap<String, u32> = RcuMap::new(4);
        assert!(map.insert("petek".to_string(), 1));
        assert_eq!(map.get("petek"), Some(1));
        assert!(map.contains_key("petek"));
        assert!(map.remove("petek"));
    }

    #[test]
    #[should_panic(expected = "bucket count")]
    fn zero_buckets_rejected() {
        let _: RcuMap<u32, u32> = RcuMap::new(0);
    }
}
