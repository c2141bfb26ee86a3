use crate::{
    config::{clamp_name, MIN_STACK_SIZE, PRIORITY_MAX, PRIORITY_MIN, PRIORITY_NORM},
    error::{Result, ThreadError},
    handle::ThreadHandle,
    runtime::Runtime,
    sync::{Arc, AtomicU64, Ordering, Weak},
    threading::{
        bind_current, current_for,
        stop::StopMechanism,
        unbind_current, BlockingLevel, ControlRecord, ThreadSnapshot, ThreadState,
    },
};
use std::{
    io,
    panic::{self, AssertUnwindSafe},
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, error, trace, warn};

/// Global counter for thread handles across all runtimes, so handles are never
/// reused while tests run several runtimes side by side.
static NEXT_THREAD_HANDLE: AtomicU64 = AtomicU64::new(1); // Handle 0 is INVALID

pub(crate) fn next_handle() -> ThreadHandle {
    ThreadHandle::new(NEXT_THREAD_HANDLE.fetch_add(1, Ordering::Relaxed))
}

/// Parameters for [`Runtime::spawn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadOptions {
    pub name: String,
    /// `0` selects the runtime's configured default.
    pub stack_size: usize,
    pub priority: i32,
    /// Daemon threads are not waited for by [`Runtime::await_non_daemon_exit`].
    pub daemon: bool,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self {
            name: "thread".to_owned(),
            stack_size: 0,
            priority: PRIORITY_NORM,
            daemon: false,
        }
    }
}

impl ThreadOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }
}

fn check_priority(priority: i32) -> Result<()> {
    if (PRIORITY_MIN..=PRIORITY_MAX).contains(&priority) {
        Ok(())
    } else {
        Err(ThreadError::InvalidArgs("priority outside 1..=10"))
    }
}

/// Maps a logical priority onto a Linux nice value: NORM is 0, MAX is -20.
#[cfg(target_os = "linux")]
fn nice_value(priority: i32) -> libc::c_int {
    ((PRIORITY_NORM - priority) * 4).clamp(-20, 19)
}

#[cfg(target_os = "linux")]
fn apply_native_priority(record: &ControlRecord, priority: i32) -> Result<()> {
    let tid = record.kernel_tid();
    if tid == 0 {
        return Err(ThreadError::InvalidHandle);
    }
    // SAFETY: plain syscall on a thread id we recorded ourselves.
    let rc = unsafe {
        libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, nice_value(priority))
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(ThreadError::Unsupported("OS refused the priority change"))
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_native_priority(_record: &ControlRecord, _priority: i32) -> Result<()> {
    Ok(())
}

impl Runtime {
    /// Creates a thread running `entry` and waits until it is `RUNNING`.
    ///
    /// `stack_size == 0` selects the configured default.
    pub fn create<F>(
        &self,
        name: &str,
        entry: F,
        stack_size: usize,
        priority: i32,
    ) -> Result<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        let options = ThreadOptions::named(name)
            .stack_size(stack_size)
            .priority(priority);
        self.spawn(options, entry)
    }

    pub fn spawn<F>(&self, options: ThreadOptions, entry: F) -> Result<ThreadHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        check_priority(options.priority)?;
        let stack_size = match options.stack_size {
            0 => self.config.default_stack_size,
            n if n < MIN_STACK_SIZE => {
                return Err(ThreadError::InvalidArgs("stack size below MIN_STACK_SIZE"))
            }
            n => n,
        };
        let runtime = self
            .self_weak
            .get()
            .and_then(Weak::upgrade)
            .ok_or(ThreadError::InvalidArgs("runtime is shutting down"))?;

        let handle = next_handle();
        let record = Arc::new(ControlRecord::new(
            handle,
            self.id,
            &options.name,
            options.priority,
            stack_size,
            options.daemon,
            Some(Box::new(entry)),
        ));

        let child = record.clone();
        thread::Builder::new()
            .name(clamp_name(&options.name))
            .stack_size(stack_size)
            .spawn(move || runtime.run_thread(child))
            .map_err(|e| {
                error!(thread = %handle, "failed to spawn thread: {e}");
                match e.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::OutOfMemory => {
                        ThreadError::Exhausted {
                            capacity: self.threads_count(),
                        }
                    }
                    _ => ThreadError::InvalidArgs("native thread creation failed"),
                }
            })?;

        let _guard = self.slow_guard();
        let mut registry = self.registry.lock();
        while !record.is_started() {
            self.registry.wait(&mut registry);
        }
        Ok(handle)
    }

    /// Body of every thread created by [`Runtime::spawn`].
    fn run_thread(self: Arc<Self>, record: Arc<ControlRecord>) {
        let marker = 0u8;
        let handle = record.handle();

        record.bind_os_thread();
        bind_current(record.clone());
        record.capture_stack(&marker as *const u8 as usize, record.stack_size());
        record.set_state(ThreadState::Started);

        // Guarded until past the start gate so suspend-all cannot park a
        // half-started thread.
        let gate = self.slow_guard();
        {
            let mut registry = self.registry.lock();
            registry.insert(record.clone());
            registry.info.waiting_to_start += 1;
            while registry.info.all_suspended {
                self.registry.wait(&mut registry);
            }
            registry.info.waiting_to_start -= 1;

            let info = &mut registry.info;
            info.live += 1;
            info.peak = info.peak.max(info.live);
            info.total_started += 1;
            if !record.is_daemon() {
                info.non_daemon += 1;
            }
            record.set_state(ThreadState::Running);
            record.mark_started();
        }
        self.registry.notify_all();

        if record.priority() != PRIORITY_NORM {
            if let Err(e) = apply_native_priority(&record, record.priority()) {
                debug!(thread = %handle, priority = record.priority(), "priority not applied: {e}");
            }
        }
        trace!(thread = %handle, name = %record.name(), "thread started");
        drop(gate);

        if let Some(entry) = record.take_entry() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
                let name = {
                    let _guard = self.fast_guard();
                    record.name()
                };
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_owned());
                error!(thread = %handle, name = %name, "thread panicked: {message}");
            }
        }

        // The guard is never lowered again: a request that lands after removal
        // has nobody left to resume it.
        if record.swap_blocking(BlockingLevel::Blocking) != BlockingLevel::Blocking {
            self.stopper.mask();
        }
        let (removed, last_non_daemon) = {
            let mut registry = self.registry.lock();
            let removed = registry.remove_owned(handle);
            registry.info.live = registry.info.live.saturating_sub(1);
            let mut last = false;
            if !record.is_daemon() {
                registry.info.non_daemon = registry.info.non_daemon.saturating_sub(1);
                last = registry.info.non_daemon == 0;
            }
            (removed, last)
        };
        self.registry.notify_all();
        if let Err(e) = removed {
            warn!(thread = %handle, "exiting thread was not registered: {e}");
        }
        if last_non_daemon {
            debug!("last non-daemon thread exited");
        }
        trace!(thread = %handle, "thread exited");
        unbind_current(handle);
    }

    /// Registers the calling native thread, which this runtime did not create.
    ///
    /// Attached threads count as live but never as non-daemon. Attaching an
    /// already attached thread returns its existing handle.
    pub fn attach_current_thread(&self, name: &str) -> Result<ThreadHandle> {
        if let Some(record) = current_for(self.id) {
            return Ok(record.handle());
        }

        let record = Arc::new(ControlRecord::new(
            next_handle(),
            self.id,
            name,
            PRIORITY_NORM,
            0,
            true,
            None,
        ));
        let marker = 0u8;
        record.bind_os_thread();
        record.capture_stack(&marker as *const u8 as usize, 0);
        record.set_state(ThreadState::Running);
        record.mark_started();
        self.publish_attached(record.clone());
        bind_current(record.clone());
        debug!(thread = %record.handle(), name, "thread attached");
        Ok(record.handle())
    }

    pub(crate) fn publish_attached(&self, record: Arc<ControlRecord>) {
        let mut registry = self.registry.lock();
        registry.insert(record);
        let info = &mut registry.info;
        info.live += 1;
        info.peak = info.peak.max(info.live);
        info.total_started += 1;
    }

    /// Reverses [`Runtime::attach_current_thread`]. The main thread cannot be
    /// detached.
    pub fn detach_current_thread(&self) -> Result<()> {
        let record = current_for(self.id).ok_or(ThreadError::InvalidHandle)?;
        let handle = record.handle();
        if handle == self.main {
            return Err(ThreadError::PermissionDenied);
        }

        let previous = record.swap_blocking(BlockingLevel::Critical);
        {
            let mut registry = self.registry.lock();
            registry.remove_owned(handle)?;
            registry.info.live = registry.info.live.saturating_sub(1);
        }
        self.registry.notify_all();
        unbind_current(handle);
        record.clear_suspend();
        record.swap_blocking(previous);
        debug!(thread = %handle, "thread detached");
        Ok(())
    }

    /// Handle of the calling thread, if it is attached to this runtime.
    pub fn current_handle(&self) -> Option<ThreadHandle> {
        current_for(self.id).map(|record| record.handle())
    }

    pub fn main_handle(&self) -> ThreadHandle {
        self.main
    }

    /// Runs `f` with the caller's state set to `state`.
    pub(crate) fn in_state<T>(&self, state: ThreadState, f: impl FnOnce() -> T) -> T {
        let record = current_for(self.id);
        let previous = record.as_ref().map(|record| {
            let previous = record.state();
            record.set_state(state);
            previous
        });
        let result = f();
        if let (Some(record), Some(previous)) = (record, previous) {
            record.set_state(previous);
        }
        result
    }

    /// Sleeps with suspension deferred; a suspend that arrives meanwhile
    /// parks the caller as soon as it wakes.
    pub fn sleep(&self, duration: Duration) {
        self.in_state(ThreadState::TimedWaiting, || {
            let _guard = self.slow_guard();
            thread::sleep(duration);
        });
    }

    /// Microsecond sleep; `usec` must be in `1..1_000_000`.
    pub fn usleep(&self, usec: u32) -> Result<()> {
        if usec == 0 || usec >= 1_000_000 {
            return Err(ThreadError::InvalidArgs("usleep takes 1..1_000_000 microseconds"));
        }
        self.sleep(Duration::from_micros(u64::from(usec)));
        Ok(())
    }

    pub fn yield_now(&self) {
        thread::yield_now();
    }

    pub fn lookup(&self, handle: ThreadHandle) -> Option<Arc<ControlRecord>> {
        let _guard = self.fast_guard();
        self.registry.lookup(handle)
    }

    fn record(&self, handle: ThreadHandle) -> Result<Arc<ControlRecord>> {
        self.lookup(handle).ok_or(ThreadError::InvalidHandle)
    }

    /// Visits every live record under the registry lock. `visit` must not
    /// block or call back into the runtime.
    pub fn for_each(&self, visit: impl FnMut(&ControlRecord)) {
        let _guard = self.fast_guard();
        self.registry.for_each(visit);
    }

    /// Serializable view of every registered thread, ordered by handle.
    pub fn snapshot(&self) -> Vec<ThreadSnapshot> {
        let mut threads = Vec::new();
        self.for_each(|record| threads.push(record.snapshot()));
        threads.sort_by_key(|snapshot| snapshot.handle);
        threads
    }

    pub fn thread_state(&self, handle: ThreadHandle) -> Result<ThreadState> {
        Ok(self.record(handle)?.state())
    }

    pub fn thread_name(&self, handle: ThreadHandle) -> Result<String> {
        let record = self.record(handle)?;
        let _guard = self.fast_guard();
        Ok(record.name())
    }

    pub fn set_name(&self, handle: ThreadHandle, name: &str) -> Result<()> {
        let record = self.record(handle)?;
        let _guard = self.fast_guard();
        record.set_name(name);
        Ok(())
    }

    /// Changes the scheduling priority. The stored value only changes when the
    /// OS accepted the new one.
    pub fn set_priority(&self, handle: ThreadHandle, priority: i32) -> Result<()> {
        check_priority(priority)?;
        let record = self.record(handle)?;
        apply_native_priority(&record, priority)?;
        record.set_priority(priority);
        Ok(())
    }

    pub fn get_priority(&self, handle: ThreadHandle) -> Result<i32> {
        Ok(self.record(handle)?.priority())
    }

    pub fn stack_base(&self, handle: ThreadHandle) -> Result<usize> {
        Ok(self.record(handle)?.stack_base())
    }

    /// Only meaningful while the thread is suspended.
    pub fn stack_top(&self, handle: ThreadHandle) -> Result<usize> {
        Ok(self.record(handle)?.stack_top())
    }

    pub fn stack_size(&self, handle: ThreadHandle) -> Result<usize> {
        Ok(self.record(handle)?.stack_size())
    }

    pub fn threads_count(&self) -> usize {
        let _guard = self.fast_guard();
        self.registry.info().live
    }

    pub fn peak_count(&self) -> usize {
        let _guard = self.fast_guard();
        self.registry.info().peak
    }

    pub fn total_starts(&self) -> u64 {
        let _guard = self.fast_guard();
        self.registry.info().total_started
    }

    pub fn non_daemon_count(&self) -> usize {
        let _guard = self.fast_guard();
        self.registry.info().non_daemon
    }

    /// Blocks until every non-daemon thread created by this runtime exited.
    pub fn await_non_daemon_exit(&self, timeout: Option<Duration>) -> Result<()> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let _guard = self.slow_guard();
        let mut registry = self.registry.lock();
        while registry.info.non_daemon > 0 {
            match deadline {
                None => self.registry.wait(&mut registry),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(ThreadError::Timeout);
                    }
                    self.registry.wait_for(&mut registry, deadline - now);
                }
            }
        }
        Ok(())
    }
}
