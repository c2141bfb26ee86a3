use crate::{
    config::COND_POOL_CAPACITY,
    error::{Result, ThreadError},
    handle::CondId,
    metrics::RuntimeMetrics,
    pool::{mutex::PoolMutex, slab::SlotPool},
    sync::{Arc, Condvar, Mutex},
};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct CondState {
    waiters: usize,
    /// Wake-ups issued but not yet consumed.
    wakeups: usize,
    /// Bumped by every signal and broadcast. A waiter may only consume a
    /// wake-up issued after it started waiting.
    generation: u64,
}

/// Condition variable handed out by the [`CondPool`], paired with a
/// [`PoolMutex`] at wait time.
#[derive(Debug, Default)]
pub struct PoolCond {
    state: Mutex<CondState>,
    condvar: Condvar,
}

impl PoolCond {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases `mutex`, waits for a signal (or the timeout) and re-acquires
    /// `mutex` before returning, even on `Timeout`.
    pub fn wait(
        &self,
        mutex: &PoolMutex,
        timeout: Option<Duration>,
        metrics: &RuntimeMetrics,
    ) -> Result<()> {
        if !mutex.is_owned_by_caller() {
            return Err(ThreadError::PermissionDenied);
        }
        let deadline = timeout.map(|t| Instant::now() + t);

        let mut state = self.state.lock();
        let ticket = state.generation;
        state.waiters += 1;
        // Signalers need `state`, which stays locked until we are parked.
        mutex.unlock()?;

        let outcome = loop {
            if state.wakeups > 0 && state.generation != ticket {
                state.wakeups -= 1;
                break Ok(());
            }
            match deadline {
                None => self.condvar.wait(&mut state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break Err(ThreadError::Timeout);
                    }
                    self.condvar.wait_for(&mut state, deadline - now);
                }
            }
        };

        state.waiters -= 1;
        state.wakeups = state.wakeups.min(state.waiters);
        drop(state);

        mutex.lock(metrics)?;
        outcome
    }

    /// Wakes at most one thread that was already waiting.
    pub fn signal(&self) {
        let mut state = self.state.lock();
        if state.waiters > state.wakeups {
            state.wakeups += 1;
            state.generation += 1;
            // Waiters that arrived after earlier signals may be ineligible, so
            // every sleeper re-checks.
            self.condvar.notify_all();
        }
    }

    /// Wakes every thread currently waiting.
    pub fn broadcast(&self) {
        let mut state = self.state.lock();
        if state.waiters > 0 {
            state.wakeups = state.waiters;
            state.generation += 1;
            self.condvar.notify_all();
        }
    }

    pub fn waiters(&self) -> usize {
        self.state.lock().waiters
    }
}

/// Fixed-capacity pool of [`PoolCond`]s.
#[derive(Debug)]
pub struct CondPool {
    slots: SlotPool<PoolCond>,
}

impl Default for CondPool {
    fn default() -> Self {
        Self::new(COND_POOL_CAPACITY)
    }
}

impl CondPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: SlotPool::new("cond", capacity),
        }
    }

    pub fn create(&self, name: &str) -> Result<CondId> {
        self.slots.allocate(name, PoolCond::new()).map(CondId)
    }

    pub(crate) fn get(&self, id: CondId) -> Result<Arc<PoolCond>> {
        self.slots.get(id.as_usize())
    }

    pub fn signal(&self, id: CondId) -> Result<()> {
        self.get(id)?.signal();
        Ok(())
    }

    pub fn broadcast(&self, id: CondId) -> Result<()> {
        self.get(id)?.broadcast();
        Ok(())
    }

    /// Fails with `Busy` while threads are waiting.
    pub fn destroy(&self, id: CondId) -> Result<()> {
        self.slots.release_if(id.as_usize(), |cond| {
            if cond.waiters() > 0 {
                Err(ThreadError::Busy)
            } else {
                Ok(())
            }
        })
    }

    pub fn name_of(&self, id: CondId) -> Result<String> {
        self.slots.name_of(id.as_usize())
    }

    pub fn in_use(&self) -> usize {
        self.slots.in_use()
    }

    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::{AtomicUsize, Ordering};
    use std::thread;

    fn wait_for_waiters(cond: &PoolCond, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while cond.waiters() < n {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_wait_requires_owned_mutex() {
        let metrics = RuntimeMetrics::new();
        let (cond, mutex) = (PoolCond::new(), PoolMutex::new());
        assert_eq!(
            cond.wait(&mutex, None, &metrics).unwrap_err(),
            ThreadError::PermissionDenied
        );
    }

    #[test]
    fn test_signal_before_wait_is_not_remembered() {
        let metrics = RuntimeMetrics::new();
        let (cond, mutex) = (PoolCond::new(), PoolMutex::new());
        cond.signal();
        mutex.lock(&metrics).unwrap();
        let err = cond
            .wait(&mutex, Some(Duration::from_millis(50)), &metrics)
            .unwrap_err();
        assert_eq!(err, ThreadError::Timeout);
        // Re-acquired even on timeout
        assert!(mutex.is_owned_by_caller());
        mutex.unlock().unwrap();
    }

    #[test]
    fn test_signal_wakes_exactly_one() {
        let metrics = Arc::new(RuntimeMetrics::new());
        let cond = Arc::new(PoolCond::new());
        let mutex = Arc::new(PoolMutex::new());
        let woken = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let (c, m, w, met) = (cond.clone(), mutex.clone(), woken.clone(), metrics.clone());
                thread::spawn(move || {
                    m.lock(&met).unwrap();
                    if c.wait(&m, Some(Duration::from_millis(500)), &met).is_ok() {
                        w.fetch_add(1, Ordering::SeqCst);
                    }
                    m.unlock().unwrap();
                })
            })
            .collect();

        wait_for_waiters(&cond, 3);
        cond.signal();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_broadcast_wakes_all() {
        let metrics = Arc::new(RuntimeMetrics::new());
        let cond = Arc::new(PoolCond::new());
        let mutex = Arc::new(PoolMutex::new());
        let woken = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let (c, m, w, met) = (cond.clone(), mutex.clone(), woken.clone(), metrics.clone());
                thread::spawn(move || {
                    m.lock(&met).unwrap();
                    c.wait(&m, None, &met).unwrap();
                    w.fetch_add(1, Ordering::SeqCst);
                    m.unlock().unwrap();
                })
            })
            .collect();

        wait_for_waiters(&cond, 4);
        cond.broadcast();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(woken.load(Ordering::SeqCst), 4);
        assert_eq!(cond.waiters(), 0);
    }

    #[test]
    fn test_destroy_with_waiter_is_busy() {
        let metrics = Arc::new(RuntimeMetrics::new());
        let pool = Arc::new(CondPool::new(2));
        let id = pool.create("busy").unwrap();
        let mutex = Arc::new(PoolMutex::new());

        let (p, m, met) = (pool.clone(), mutex.clone(), metrics.clone());
        let waiter = thread::spawn(move || {
            let cond = p.get(id).unwrap();
            m.lock(&met).unwrap();
            cond.wait(&m, Some(Duration::from_secs(5)), &met).unwrap();
            m.unlock().unwrap();
        });

        let cond = pool.get(id).unwrap();
        wait_for_waiters(&cond, 1);
        assert_eq!(pool.destroy(id).unwrap_err(), ThreadError::Busy);
        pool.signal(id).unwrap();
        waiter.join().unwrap();
        pool.destroy(id).unwrap();
        assert_eq!(pool.in_use(), 0);
    }
}
