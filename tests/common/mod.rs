#![allow(dead_code)]

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};
use vmthreads::{Runtime, RuntimeConfig, StopKind, ThreadHandle, ThreadOptions, ThreadState};

/// A runtime plus the bookkeeping every scenario needs.
pub struct TestHarness {
    pub runtime: Arc<Runtime>,
    stop: Arc<AtomicBool>,
}

impl TestHarness {
    pub fn new(mechanism: StopKind) -> Self {
        Self::with_config(RuntimeConfig::default().with_stop_mechanism(mechanism))
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let runtime = Runtime::new(config).unwrap();
        Self {
            runtime,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts a thread that counts as fast as it can, polling safe points
    /// between increments, until [`TestHarness::finish`].
    pub fn counting_worker(&self, name: &str) -> (ThreadHandle, Arc<AtomicU64>) {
        let counter = Arc::new(AtomicU64::new(0));
        let (rt, stop, c) = (self.runtime.clone(), self.stop.clone(), counter.clone());
        let handle = self
            .runtime
            .spawn(ThreadOptions::named(name), move || {
                while !stop.load(Ordering::Relaxed) {
                    c.fetch_add(1, Ordering::Relaxed);
                    rt.safe_point();
                }
            })
            .unwrap();
        (handle, counter)
    }

    /// Stops every counting worker and waits for all non-daemon threads.
    pub fn finish(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.runtime
            .await_non_daemon_exit(Some(Duration::from_secs(10)))
            .unwrap();
    }
}

pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    done()
}

pub fn wait_for_state(runtime: &Runtime, handle: ThreadHandle, state: ThreadState) -> bool {
    wait_until(Duration::from_secs(5), || {
        runtime.thread_state(handle).map(|s| s == state).unwrap_or(false)
    })
}

/// True if `counter` did not move over `window`.
pub fn is_frozen(counter: &AtomicU64, window: Duration) -> bool {
    let before = counter.load(Ordering::SeqCst);
    thread::sleep(window);
    counter.load(Ordering::SeqCst) == before
}

/// True if `counter` moved over `window`.
pub fn advances(counter: &AtomicU64, window: Duration) -> bool {
    let before = counter.load(Ordering::SeqCst);
    thread::sleep(window);
    counter.load(Ordering::SeqCst) > before
}

/// Both mechanisms where signals exist, safepoints elsewhere.
pub fn mechanisms() -> Vec<StopKind> {
    if cfg!(unix) {
        vec![StopKind::Signal, StopKind::Safepoint]
    } else {
        vec![StopKind::Safepoint]
    }
}
