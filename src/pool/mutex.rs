use crate::{
    config::MUTEX_POOL_CAPACITY,
    error::{Result, ThreadError},
    handle::MutexId,
    metrics::RuntimeMetrics,
    pool::slab::SlotPool,
    sync::{Arc, Condvar, Mutex},
};
use std::{
    thread::{self, ThreadId},
    time::Instant,
};

#[derive(Debug, Default)]
struct MutexState {
    /// Native thread holding the lock, `None` when unlocked.
    owner: Option<ThreadId>,
}

/// Non-recursive, owner-tracked lock handed out by the [`MutexPool`].
#[derive(Debug, Default)]
pub struct PoolMutex {
    state: Mutex<MutexState>,
    condvar: Condvar,
}

impl PoolMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.owner.is_some() {
            return Err(ThreadError::Busy);
        }
        state.owner = Some(thread::current().id());
        Ok(())
    }

    pub fn lock(&self, metrics: &RuntimeMetrics) -> Result<()> {
        let me = thread::current().id();
        let mut state = self.state.lock();

        if state.owner == Some(me) {
            return Err(ThreadError::WouldDeadlock);
        }

        if state.owner.is_some() {
            let start_wait = Instant::now();
            while state.owner.is_some() {
                self.condvar.wait(&mut state);
            }
            metrics.record_lock_contention(start_wait.elapsed());
        }

        state.owner = Some(me);
        Ok(())
    }

    pub fn unlock(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.owner != Some(thread::current().id()) {
            return Err(ThreadError::PermissionDenied);
        }
        state.owner = None;
        drop(state);
        self.condvar.notify_one();
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().owner.is_some()
    }

    pub fn is_owned_by_caller(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }
}

/// Fixed-capacity pool of [`PoolMutex`]es.
#[derive(Debug)]
pub struct MutexPool {
    slots: SlotPool<PoolMutex>,
}

impl Default for MutexPool {
    fn default() -> Self {
        Self::new(MUTEX_POOL_CAPACITY)
    }
}

impl MutexPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SlotPool::new("mutex", capacity),
        }
    }

    pub fn create(&self, name: &str) -> Result<MutexId> {
        self.slots.allocate(name, PoolMutex::new()).map(MutexId)
    }

    pub(crate) fn get(&self, id: MutexId) -> Result<Arc<PoolMutex>> {
        self.slots.get(id.as_usize())
    }

    pub fn lock(&self, id: MutexId, metrics: &RuntimeMetrics) -> Result<()> {
        self.get(id)?.lock(metrics)
    }

    pub fn try_lock(&self, id: MutexId) -> Result<()> {
        self.get(id)?.try_lock()
    }

    pub fn unlock(&self, id: MutexId) -> Result<()> {
        self.get(id)?.unlock()
    }

    /// Fails with `Busy` while anyone holds the mutex.
    pub fn destroy(&self, id: MutexId) -> Result<()> {
        self.slots.release_if(id.as_usize(), |mutex| {
            if mutex.is_locked() {
                Err(ThreadError::Busy)
            } else {
                Ok(())
            }
        })
    }

    pub fn name_of(&self, id: MutexId) -> Result<String> {
        self.slots.name_of(id.as_usize())
    }

    pub fn in_use(&self) -> usize {
        self.slots.in_use()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}
