//! Table: one snapshot of the hash table, plus the online migration that
//! drains it into a successor.
//!
//! A table never changes width. Growth and shrink allocate a *successor*
//! table with the opposite snapshot index and move every node over, one
//! bucket at a time, without stopping readers. The migration frontier
//! (`resize_index`) tells operations which side owns a given bucket:
//! buckets above the frontier are still served here, buckets at or below it
//! are served by the successor.

use std::ptr;
use std::sync::atomic::{AtomicIsize, AtomicPtr, Ordering};

use petek::ShardedRcu;

use crate::bucket::Bucket;

pub(crate) struct Table<K, V> {
    pub(crate) buckets: Box<[Bucket<K, V>]>,
    /// Which of each node's two next slots belongs to this table's chains.
    pub(crate) snapshot: usize,
    /// Set exactly once, under the resize lock, before the drain starts.
    pub(crate) successor: AtomicPtr<Table<K, V>>,
    /// Highest bucket index already handed to the successor; −1 before the
    /// drain starts, `buckets.len()` once it is complete.
    pub(crate) resize_index: AtomicIsize,
    /// Per-bucket reader epochs; shard i covers bucket i.
    pub(crate) rcu: ShardedRcu,
}

impl<K, V> Table<K, V> {
    pub(crate) fn new(bucket_count: usize, snapshot: usize) -> Box<Self> {
        let buckets: Box<[Bucket<K, V>]> = (0..bucket_count).map(|_| Bucket::new()).collect();
        Box::new(Self {
            buckets,
            snapshot,
            successor: AtomicPtr::new(ptr::null_mut()),
            resize_index: AtomicIsize::new(-1),
            rcu: ShardedRcu::new(bucket_count),
        })
    }

    #[inline]
    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    pub(crate) fn bucket_of(&self, hash: u64) -> usize {
        (hash % self.buckets.len() as u64) as usize
    }

    /// Whether bucket `index` has been (or is being) drained into the
    /// successor. Once this returns true the successor pointer is non-null:
    /// the frontier store is ordered after the successor store.
    #[inline]
    pub(crate) fn is_migrated(&self, index: usize) -> bool {
        self.resize_index.load(Ordering::Acquire) >= index as isize
    }

    /// Moves every node into `successor`, bucket by bucket.
    ///
    /// Caller holds the resize lock and has already published the successor
    /// pointer followed by an outer grace period, so every operation in
    /// flight sees it. For each bucket the drain:
    ///
    /// 1. takes the bucket mutex (writers re-routing to the successor use a
    ///    lock/unlock of this same mutex as a barrier, so none of them can
    ///    act on the successor while the bucket is mid-drain),
    /// 2. publishes the frontier,
    /// 3. threads each node into its successor bucket through the *other*
    ///    next slot, under that bucket's mutex,
    /// 4. cuts the old chain in one store,
    /// 5. waits a grace period for this bucket's readers, so nodes the
    ///    successor may later free are no longer traversed here.
    pub(crate) fn drain_into(&self, successor: &Table<K, V>) {
        let s_old = self.snapshot;
        let s_new = successor.snapshot;
        for index in 0..self.buckets.len() {
            let bucket = &self.buckets[index];
            let _writer = bucket.mutex.lock();
            self.resize_index.store(index as isize, Ordering::Release);

            let mut cur = bucket.head_ptr(s_old);
            while !cur.is_null() {
                // SAFETY: we hold the bucket mutex, so the chain is stable
                // and every reachable node is live.
                let node = unsafe { &*cur };
                let next = node.next[s_old].load(Ordering::Acquire);
                let dest = &successor.buckets[successor.bucket_of(node.hash)];
                {
                    let _dest_writer = dest.mutex.lock();
                    dest.relink(cur, s_new);
                }
                cur = next;
            }

            bucket.cut(s_old);
            self.rcu.synchronize(index);
        }
        self.resize_index
            .store(self.buckets.len() as isize, Ordering::Release);
    }
}

impl<K, V> Drop for Table<K, V> {
    fn drop(&mut self) {
        let s = self.snapshot;
        for bucket in self.buckets.iter_mut() {
            // SAFETY: tables are dropped either with `&mut` ownership of the
            // whole map or after an outer grace period; drained buckets were
            // cut, so no node here is shared with a live successor.
            unsafe { bucket.free_chain(s) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_table_has_no_frontier() {
        let table: Box<Table<u64, u64>> = Table::new(4, 0);
        assert_eq!(table.bucket_count(), 4);
        assert!(!table.is_migrated(0));
        assert!(table.successor.load(Ordering::Acquire).is_null());
    }

    #[test]
    fn drain_moves_every_node() {
        let old: Box<Table<u64, u64>> = Table::new(2, 0);
        {
            for key in 0u64..20 {
                let b = old.bucket_of(key);
                let bucket = &old.buckets[b];
                let _writer = bucket.mutex.lock();
                bucket.insert(key, key, key * 10, 0);
            }
        }

        let new: Box<Table<u64, u64>> = Table::new(7, 1);
        old.drain_into(&new);

        assert!(old.is_migrated(1));
        for key in 0u64..20 {
            let b = new.bucket_of(key);
            assert_eq!(new.buckets[b].lookup(key, &key, 1), Some(key * 10));
        }
        // Old chains are fully cut; dropping the old table frees nothing.
        for b in 0..2 {
            assert!(old.buckets[b].head_ptr(0).is_null());
        }
    }
}
