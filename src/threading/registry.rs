use crate::{
    error::{Result, ThreadError},
    handle::ThreadHandle,
    sync::{Arc, Condvar, Mutex, MutexGuard},
    threading::ControlRecord,
};
use serde::Serialize;
use std::{collections::HashMap, time::Duration};

/// Process-wide thread counters, guarded by the registry lock.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ThreadsInfo {
    /// Registered threads, the main thread included.
    pub live: usize,
    pub peak: usize,
    pub total_started: u64,
    pub non_daemon: usize,
    /// Threads parked at the start gate by a suspend-all.
    pub waiting_to_start: usize,
    pub all_suspended: bool,
}

/// Everything the registry lock protects.
#[derive(Debug, Default)]
pub struct RegistryState {
    threads: HashMap<ThreadHandle, Arc<ControlRecord>>,
    pub info: ThreadsInfo,
}

impl RegistryState {
    pub fn get(&self, handle: ThreadHandle) -> Option<&Arc<ControlRecord>> {
        self.threads.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Arc<ControlRecord>> {
        self.threads.values()
    }

    pub(crate) fn insert(&mut self, record: Arc<ControlRecord>) -> Option<Arc<ControlRecord>> {
        self.threads.insert(record.handle(), record)
    }

    /// Removes `handle` on behalf of the calling thread.
    ///
    /// Only the owner may remove a bound record; a record that was published
    /// but never bound may be withdrawn by anyone.
    pub(crate) fn remove_owned(&mut self, handle: ThreadHandle) -> Result<Arc<ControlRecord>> {
        let record = self.threads.get(&handle).ok_or(ThreadError::InvalidHandle)?;
        if record.os_thread().is_some() && !record.is_owned_by_caller() {
            return Err(ThreadError::PermissionDenied);
        }
        self.threads
            .remove(&handle)
            .ok_or(ThreadError::InvalidHandle)
    }
}

/// Thread-safe `handle -> ControlRecord` map.
///
/// One lock orders every insert, removal and iteration. The paired condvar is
/// broadcast whenever a thread finishes starting, exits, or a resume-all opens
/// the start gate.
#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
    changed: Condvar,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the record stored under its handle.
    pub fn register(&self, record: Arc<ControlRecord>) -> Option<Arc<ControlRecord>> {
        self.state.lock().insert(record)
    }

    pub fn lookup(&self, handle: ThreadHandle) -> Option<Arc<ControlRecord>> {
        self.state.lock().get(handle).cloned()
    }

    /// Deletes `handle`. Must be issued by the thread that owns it.
    pub fn remove(&self, handle: ThreadHandle) -> Result<Arc<ControlRecord>> {
        let removed = self.state.lock().remove_owned(handle)?;
        self.changed.notify_all();
        Ok(removed)
    }

    /// Visits every live record with the registry lock held.
    ///
    /// `visit` must not block or call back into the registry; the lock is not
    /// reentrant.
    pub fn for_each(&self, mut visit: impl FnMut(&ControlRecord)) {
        let state = self.state.lock();
        for record in state.records() {
            visit(record);
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().is_empty()
    }

    pub fn info(&self) -> ThreadsInfo {
        self.state.lock().info
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock()
    }

    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, RegistryState>) {
        self.changed.wait(guard);
    }

    /// Returns `true` if the wait timed out.
    pub(crate) fn wait_for(
        &self,
        guard: &mut MutexGuard<'_, RegistryState>,
        timeout: Duration,
    ) -> bool {
        self.changed.wait_for(guard, timeout).timed_out()
    }

    pub(crate) fn notify_all(&self) {
        self.changed.notify_all();
    }
}
