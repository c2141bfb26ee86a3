//! Basic synchronization primitives.
//!
//! Single import point for the lock types and atomics used across the crate,
//! so the lock implementation can be swapped in one place.
pub use parking_lot::{Condvar, Mutex, MutexGuard, WaitTimeoutResult};
pub use std::sync::{
    atomic::{fence, AtomicBool, AtomicI32, AtomicU64, AtomicU8, AtomicUsize, Ordering},
    Arc, OnceLock, Weak,
};

/// Full memory barrier paired with every write to a suspension flag.
#[inline]
pub fn full_barrier() {
    fence(Ordering::SeqCst);
}

/// Rough address of the current stack pointer.
///
/// Good enough for the conservative-scanner bookkeeping in the control record;
/// never dereferenced.
#[inline(never)]
pub fn approximate_stack_pointer() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}
