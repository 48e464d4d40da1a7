//! Petek: quiescent-state RCU primitives for read-mostly data structures.
//!
//! Readers pay a single uncontended atomic increment on entering and leaving
//! a read section; writers that have unlinked data wait out a *grace period*
//! before freeing it. No reader ever takes a lock, spins, or performs a CAS.
//!
//! # Building blocks
//!
//! - [`Registry`]: a per-thread cell registry with writer-side enumeration.
//!   Cells outlive their threads, so a grace-period scan is always safe.
//! - [`RcuLock`]: one 64-bit epoch per thread. Odd means "inside a read
//!   section"; [`RcuLock::synchronize`] waits until every in-section epoch
//!   has moved.
//! - [`ShardedRcu`]: a vector of epochs per thread, so synchronizing one
//!   shard only waits for that shard's readers.
//! - [`SpinMutex`]: a TTAS lock with yielding backoff, for the short writer
//!   critical sections RCU pairs with.
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicPtr, Ordering};
//! use petek::RcuLock;
//!
//! let rcu = RcuLock::new();
//! let slot = AtomicPtr::new(Box::into_raw(Box::new(42)));
//!
//! // Reader: pointers loaded inside the section stay valid for its whole
//! // lifetime.
//! {
//!     let _section = rcu.read();
//!     let value = unsafe { &*slot.load(Ordering::Acquire) };
//!     assert_eq!(*value, 42);
//! }
//!
//! // Writer: unlink, wait a grace period, then free.
//! let old = slot.swap(Box::into_raw(Box::new(43)), Ordering::AcqRel);
//! rcu.synchronize();
//! unsafe { drop(Box::from_raw(old)) };
//! # let last = slot.load(Ordering::Acquire);
//! # unsafe { drop(Box::from_raw(last)) };
//! ```
//!
//! The protocol assumes an identifiable OS thread per reader — each thread
//! owns its epoch cell. Do not hold read guards across `.await` points; the
//! design has no notion of task migration.

#![warn(missing_docs)]

mod mutex;
mod rcu;
mod registry;
mod sharded;

pub use mutex::{SpinMutex, SpinMutexGuard};
pub use rcu::{RcuGuard, RcuLock};
pub use registry::{Iter, Registry};
pub use sharded::{ShardGuard, ShardedRcu};
