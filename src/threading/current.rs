//! Binding between a native thread and its control record.
//!
//! Each native thread holds at most one binding. The owning `Arc` keeps the
//! record alive; the raw pointer mirror is the only thing the stop signal
//! handler reads, since it may not touch locks or reference counts.
use crate::{
    handle::ThreadHandle,
    sync::{Arc, Ordering},
    threading::ControlRecord,
};
use std::{
    cell::{Cell, RefCell},
    ptr,
    sync::atomic::compiler_fence,
};

thread_local! {
    static CURRENT: RefCell<Option<Arc<ControlRecord>>> = const { RefCell::new(None) };
    static CURRENT_PTR: Cell<*const ControlRecord> = const { Cell::new(ptr::null()) };
}

/// Binds `record` to the calling thread, returning the binding it replaced.
pub(crate) fn bind_current(record: Arc<ControlRecord>) -> Option<Arc<ControlRecord>> {
    let raw = Arc::as_ptr(&record);
    let previous = CURRENT.with(|current| current.borrow_mut().replace(record));
    compiler_fence(Ordering::SeqCst);
    CURRENT_PTR.with(|p| p.set(raw));
    previous
}

/// Drops the calling thread's binding if it belongs to `handle`.
pub(crate) fn unbind_current(handle: ThreadHandle) {
    let matches = CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|record| record.handle() == handle)
    });
    if !matches {
        return;
    }
    CURRENT_PTR.with(|p| p.set(ptr::null()));
    compiler_fence(Ordering::SeqCst);
    let _ = CURRENT.try_with(|current| current.borrow_mut().take());
}

/// The calling thread's record, whichever runtime it belongs to.
pub(crate) fn current() -> Option<Arc<ControlRecord>> {
    CURRENT
        .try_with(|current| current.borrow().clone())
        .ok()
        .flatten()
}

/// The calling thread's record, if it belongs to runtime `runtime_id`.
pub(crate) fn current_for(runtime_id: u64) -> Option<Arc<ControlRecord>> {
    current().filter(|record| record.runtime_id() == runtime_id)
}

/// Raw view for the signal handler. Null when the thread is unbound or its
/// thread-local storage is already being torn down.
#[inline]
pub(crate) fn current_ptr() -> *const ControlRecord {
    CURRENT_PTR.try_with(|p| p.get()).unwrap_or(ptr::null())
}
