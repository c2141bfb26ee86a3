use crate::{
    config::{RuntimeConfig, PRIORITY_NORM},
    error::{ConfigError, Result},
    handle::{CondId, MutexId, ThreadHandle},
    metrics::{RuntimeMetrics, RuntimeStats},
    pool::{CondPool, MutexPool},
    sync::{Arc, AtomicU64, OnceLock, Ordering, Weak},
    threading::{
        bind_current, unbind_current, ControlRecord, Registry, StopMechanism, Stopper,
        ThreadState, ThreadsInfo,
    },
};
use std::time::Duration;
use tracing::debug;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

/// Process-scoped thread service: registry, suspension protocol and the two
/// synchronization pools.
///
/// Construct one per process (tests may run several side by side) and share
/// it by `Arc`. The constructing thread is registered as `main`; its record is
/// never removed.
pub struct Runtime {
    pub(crate) id: u64,
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: Registry,
    pub(crate) stopper: Stopper,
    pub(crate) mutexes: MutexPool,
    pub(crate) conds: CondPool,
    pub(crate) metrics: RuntimeMetrics,
    pub(crate) main: ThreadHandle,
    /// Weak reference to self, handed to the threads we spawn
    pub(crate) self_weak: OnceLock<Weak<Runtime>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("id", &self.id)
            .field("mechanism", &self.stopper.kind())
            .field("main", &self.main)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> std::result::Result<Arc<Self>, ConfigError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    pub fn with_defaults() -> Arc<Self> {
        Self::build(RuntimeConfig::default())
    }

    fn build(config: RuntimeConfig) -> Arc<Self> {
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        let main = crate::threading::next_handle();
        let runtime = Arc::new(Self {
            id,
            registry: Registry::new(),
            stopper: Stopper::for_kind(config.stop_mechanism),
            mutexes: MutexPool::new(config.mutex_capacity),
            conds: CondPool::new(config.cond_capacity),
            metrics: RuntimeMetrics::new(),
            main,
            self_weak: OnceLock::new(),
            config,
        });
        let _ = runtime.self_weak.set(Arc::downgrade(&runtime));

        let record = Arc::new(ControlRecord::new(
            main,
            id,
            "main",
            PRIORITY_NORM,
            0,
            false,
            None,
        ));
        let marker = 0u8;
        record.bind_os_thread();
        record.capture_stack(&marker as *const u8 as usize, 0);
        record.set_state(ThreadState::Running);
        record.mark_started();
        runtime.publish_attached(record.clone());
        bind_current(record);

        debug!(runtime = id, main = %main, mechanism = ?runtime.stopper.kind(), "runtime started");
        runtime
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Thread counters, start-gate state included.
    pub fn threads_info(&self) -> ThreadsInfo {
        let _guard = self.fast_guard();
        self.registry.info()
    }

    pub fn metrics(&self) -> &RuntimeMetrics {
        &self.metrics
    }

    pub fn stop_mechanism(&self) -> crate::config::StopKind {
        self.stopper.kind()
    }

    pub fn stats(&self) -> RuntimeStats {
        let _guard = self.fast_guard();
        let info = self.registry.info();
        RuntimeStats {
            threads_count: info.live,
            peak_count: info.peak,
            total_starts: info.total_started,
            non_daemon_count: info.non_daemon,
            mutexes_in_use: self.mutexes.in_use(),
            conds_in_use: self.conds.in_use(),
            suspend_requests: self.metrics.suspend_requests.load(Ordering::Relaxed),
            resume_requests: self.metrics.resume_requests.load(Ordering::Relaxed),
            suspend_all_count: self.metrics.suspend_all_count.load(Ordering::Relaxed),
            suspend_wait_total_us: self.metrics.suspend_wait_total_us.load(Ordering::Relaxed),
            lock_contention_count: self.metrics.lock_contention_count.load(Ordering::Relaxed),
            lock_contention_total_us: self
                .metrics
                .lock_contention_total_us
                .load(Ordering::Relaxed),
        }
    }

    /// Raw pool access. Calls made through it skip the suspension guards.
    pub fn mutexes(&self) -> &MutexPool {
        &self.mutexes
    }

    pub fn conds(&self) -> &CondPool {
        &self.conds
    }

    pub fn mutex_create(&self, name: &str) -> Result<MutexId> {
        let _guard = self.fast_guard();
        self.mutexes.create(name)
    }

    /// Blocks until the mutex is ours. Suspension is deferred while waiting.
    pub fn mutex_lock(&self, id: MutexId) -> Result<()> {
        let mutex = {
            let _guard = self.fast_guard();
            self.mutexes.get(id)?
        };
        self.in_state(ThreadState::Blocked, || {
            let _guard = self.slow_guard();
            mutex.lock(&self.metrics)
        })
    }

    pub fn mutex_trylock(&self, id: MutexId) -> Result<()> {
        let _guard = self.fast_guard();
        self.mutexes.try_lock(id)
    }

    pub fn mutex_unlock(&self, id: MutexId) -> Result<()> {
        let _guard = self.fast_guard();
        self.mutexes.unlock(id)
    }

    pub fn mutex_destroy(&self, id: MutexId) -> Result<()> {
        let _guard = self.fast_guard();
        self.mutexes.destroy(id)
    }

    pub fn cond_create(&self, name: &str) -> Result<CondId> {
        let _guard = self.fast_guard();
        self.conds.create(name)
    }

    /// Atomically releases `mutex` and waits on `cond`; `mutex` is held again
    /// on return. Wake-ups may be spurious.
    pub fn cond_wait(&self, cond: CondId, mutex: MutexId) -> Result<()> {
        self.cond_wait_inner(cond, mutex, None)
    }

    /// As [`Runtime::cond_wait`], failing with `Timeout` once `timeout` expires.
    pub fn cond_timedwait(&self, cond: CondId, mutex: MutexId, timeout: Duration) -> Result<()> {
        self.cond_wait_inner(cond, mutex, Some(timeout))
    }

    fn cond_wait_inner(
        &self,
        cond: CondId,
        mutex: MutexId,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let (cond, mutex) = {
            let _guard = self.fast_guard();
            (self.conds.get(cond)?, self.mutexes.get(mutex)?)
        };
        let state = match timeout {
            Some(_) => ThreadState::TimedWaiting,
            None => ThreadState::Waiting,
        };
        self.in_state(state, || {
            let _guard = self.slow_guard();
            cond.wait(&mutex, timeout, &self.metrics)
        })
    }

    pub fn cond_signal(&self, cond: CondId) -> Result<()> {
        let _guard = self.fast_guard();
        self.conds.signal(cond)
    }

    pub fn cond_broadcast(&self, cond: CondId) -> Result<()> {
        let _guard = self.fast_guard();
        self.conds.broadcast(cond)
    }

    pub fn cond_destroy(&self, cond: CondId) -> Result<()> {
        let _guard = self.fast_guard();
        self.conds.destroy(cond)
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        // Only affects the dropping thread, and only if it is our main thread.
        unbind_current(self.main);
    }
}
