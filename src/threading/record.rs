use crate::{
    config::clamp_name,
    handle::ThreadHandle,
    sync::{
        approximate_stack_pointer, full_barrier, AtomicBool, AtomicI32, AtomicU64, AtomicU8,
        AtomicUsize, Condvar, Mutex, OnceLock, Ordering,
    },
    threading::{BlockingLevel, ThreadSnapshot, ThreadState},
};
use std::thread::ThreadId;

pub(crate) type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Per-thread control block shared between the owning thread, the registry
/// and any suspender.
///
/// `state` and `name` are written by the owner (and by the park loop, which
/// runs on the owner). `blocking` and `suspend_requested` have two writers and
/// are only touched through the barrier-paired setters below.
pub struct ControlRecord {
    handle: ThreadHandle,
    runtime_id: u64,
    state: AtomicU8,
    blocking: AtomicU8,
    suspend_requested: AtomicBool,
    /// Bumped every time the owner enters its park loop.
    park_epoch: AtomicU64,
    stack_top: AtomicUsize,
    stack_base: AtomicUsize,
    stack_size: AtomicUsize,
    priority: AtomicI32,
    daemon: bool,
    started: AtomicBool,
    name: Mutex<String>,
    entry: Mutex<Option<ThreadEntry>>,
    os_thread: OnceLock<ThreadId>,
    /// Native `pthread_t` of the owner, stored as an integer. Zero until bound.
    native: AtomicUsize,
    /// Kernel thread id, used for per-thread priority. Zero until bound.
    kernel_tid: AtomicUsize,
    pub(crate) park_lock: Mutex<()>,
    pub(crate) park_cv: Condvar,
}

impl std::fmt::Debug for ControlRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlRecord")
            .field("handle", &self.handle)
            .field("name", &self.name.try_lock().map(|name| name.clone()))
            .field("state", &self.state())
            .field("blocking", &self.blocking())
            .field("suspend_requested", &self.suspend_requested())
            .finish_non_exhaustive()
    }
}

impl ControlRecord {
    pub(crate) fn new(
        handle: ThreadHandle,
        runtime_id: u64,
        name: &str,
        priority: i32,
        stack_size: usize,
        daemon: bool,
        entry: Option<ThreadEntry>,
    ) -> Self {
        Self {
            handle,
            runtime_id,
            state: AtomicU8::new(ThreadState::Creating as u8),
            blocking: AtomicU8::new(BlockingLevel::NoBlock as u8),
            suspend_requested: AtomicBool::new(false),
            park_epoch: AtomicU64::new(0),
            stack_top: AtomicUsize::new(0),
            stack_base: AtomicUsize::new(0),
            stack_size: AtomicUsize::new(stack_size),
            priority: AtomicI32::new(priority),
            daemon,
            started: AtomicBool::new(false),
            name: Mutex::new(clamp_name(name)),
            entry: Mutex::new(entry),
            os_thread: OnceLock::new(),
            native: AtomicUsize::new(0),
            kernel_tid: AtomicUsize::new(0),
            park_lock: Mutex::new(()),
            park_cv: Condvar::new(),
        }
    }

    pub fn handle(&self) -> ThreadHandle {
        self.handle
    }

    pub(crate) fn runtime_id(&self) -> u64 {
        self.runtime_id
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    pub fn blocking(&self) -> BlockingLevel {
        BlockingLevel::from_u8(self.blocking.load(Ordering::SeqCst))
    }

    /// Stores the new level and returns the previous one.
    pub(crate) fn swap_blocking(&self, level: BlockingLevel) -> BlockingLevel {
        let previous = self.blocking.swap(level as u8, Ordering::SeqCst);
        full_barrier();
        BlockingLevel::from_u8(previous)
    }

    pub fn suspend_requested(&self) -> bool {
        self.suspend_requested.load(Ordering::SeqCst)
    }

    /// Raises the request; returns whether it was already raised.
    pub(crate) fn request_suspend(&self) -> bool {
        let previous = self.suspend_requested.swap(true, Ordering::SeqCst);
        full_barrier();
        previous
    }

    pub(crate) fn clear_suspend(&self) {
        self.suspend_requested.store(false, Ordering::SeqCst);
        full_barrier();
    }

    pub(crate) fn park_epoch(&self) -> u64 {
        self.park_epoch.load(Ordering::SeqCst)
    }

    /// True when a pending request should park the owner right now.
    #[inline]
    pub(crate) fn must_park(&self) -> bool {
        self.suspend_requested() && self.blocking() == BlockingLevel::NoBlock
    }

    /// Parks the owning thread until the suspend request is withdrawn or the
    /// owner raises its blocking level.
    ///
    /// Runs inside the stop signal handler, so everything here is plain atomics
    /// plus whatever `wait` does. `wait` must return at least whenever the
    /// request is cleared.
    pub(crate) fn park_while_requested(&self, mut wait: impl FnMut()) {
        let previous = self.state.load(Ordering::SeqCst);
        self.stack_top
            .store(approximate_stack_pointer(), Ordering::Relaxed);
        self.state
            .store(ThreadState::Suspended as u8, Ordering::SeqCst);
        self.park_epoch.fetch_add(1, Ordering::SeqCst);
        full_barrier();

        while self.must_park() {
            wait();
        }

        self.state.store(previous, Ordering::SeqCst);
        full_barrier();
    }

    pub fn stack_top(&self) -> usize {
        self.stack_top.load(Ordering::Relaxed)
    }

    pub fn stack_base(&self) -> usize {
        self.stack_base.load(Ordering::Relaxed)
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size.load(Ordering::Relaxed)
    }

    /// Records the stack extent as seen from the owner, `base` being an address
    /// near the outermost frame.
    pub(crate) fn capture_stack(&self, base: usize, size: usize) {
        self.stack_base.store(base, Ordering::Relaxed);
        self.stack_top.store(base, Ordering::Relaxed);
        if size != 0 {
            self.stack_size.store(size, Ordering::Relaxed);
        }
    }

    pub fn priority(&self) -> i32 {
        self.priority.load(Ordering::Relaxed)
    }

    pub(crate) fn set_priority(&self, priority: i32) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    pub fn is_daemon(&self) -> bool {
        self.daemon
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    /// Callers must hold a suspension guard: a thread parked while holding
    /// the name lock would stall every reader under the registry lock.
    pub(crate) fn name(&self) -> String {
        self.name.lock().clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.lock() = clamp_name(name);
    }

    pub(crate) fn take_entry(&self) -> Option<ThreadEntry> {
        self.entry.lock().take()
    }

    pub fn os_thread(&self) -> Option<ThreadId> {
        self.os_thread.get().copied()
    }

    /// Binds the record to the calling native thread.
    pub(crate) fn bind_os_thread(&self) {
        let _ = self.os_thread.set(std::thread::current().id());
        #[cfg(unix)]
        {
            // SAFETY: pthread_self has no preconditions.
            let native = unsafe { libc::pthread_self() };
            self.native.store(native as usize, Ordering::SeqCst);
        }
        #[cfg(target_os = "linux")]
        {
            // SAFETY: gettid has no preconditions.
            let tid = unsafe { libc::syscall(libc::SYS_gettid) };
            self.kernel_tid.store(tid as usize, Ordering::Relaxed);
        }
    }

    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    pub(crate) fn kernel_tid(&self) -> usize {
        self.kernel_tid.load(Ordering::Relaxed)
    }

    #[cfg_attr(not(unix), allow(dead_code))]
    pub(crate) fn native(&self) -> usize {
        self.native.load(Ordering::SeqCst)
    }

    pub(crate) fn is_owned_by_caller(&self) -> bool {
        self.os_thread() == Some(std::thread::current().id())
    }

    /// Reads the name lock; same guard requirement as [`ControlRecord::name`].
    pub(crate) fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            handle: self.handle,
            name: self.name(),
            state: self.state(),
            blocking: self.blocking(),
            suspend_requested: self.suspend_requested(),
            priority: self.priority(),
            daemon: self.daemon,
            stack_size: self.stack_size(),
        }
    }
}
