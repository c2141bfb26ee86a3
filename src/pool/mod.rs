//! Fixed-capacity mutex and condition-variable pools.
//!
//! Callers only ever see a [`crate::MutexId`] or [`crate::CondId`]; the
//! pools own the lock objects. Capacity is fixed at construction and running
//! out is reported as [`crate::ThreadError::Exhausted`].
mod cond;
mod mutex;
mod slab;

pub use cond::{CondPool, PoolCond};
pub use mutex::{MutexPool, PoolMutex};
pub use slab::SlotPool;
