//! Petek-map: a concurrent hash table with RCU readers and online resize.
//!
//! # Design
//!
//! - **Readers never block.** A lookup enters two quiescent-state read
//!   sections (the table pointer's and the bucket's) — each a single
//!   uncontended atomic increment — walks the chain, and copies the value
//!   out. No lock, no CAS, no shared-cacheline write.
//! - **Writers stripe on bucket mutexes.** Inserts publish at the chain
//!   head with a release store; removes unlink and free only after a grace
//!   period for that bucket's readers.
//! - **Resize never stops the world.** Every node carries two next slots,
//!   so during a migration the same allocation is chained into both the
//!   outgoing table and its successor. Buckets drain one at a time behind a
//!   moving frontier; operations on either side of the frontier route
//!   themselves, and a reader can never observe a present key as absent.
//!
//! Growth is proposed when a writer scans past a small threshold of nodes
//! in one bucket, shrink when occupancy falls below half that ratio; the
//! migration itself runs piggybacked on ordinary writer calls.
//!
//! # Example
//!
//! ```rust
//! use petek_map::RcuMap;
//!
//! let map = RcuMap::new(16);
//! assert!(map.insert("wax", 1));
//! assert!(!map.insert("wax", 2)); // present keys are not updated
//! assert_eq!(map.get("wax"), Some(1));
//! assert!(map.remove("wax"));
//! assert_eq!(map.get("wax"), None);
//! ```

#![warn(missing_docs)]

mod bucket;
mod map;
mod table;

pub use map::{Iter, Keys, RcuMap};
