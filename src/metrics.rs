use crate::sync::{AtomicU64, Ordering};
use serde::Serialize;
use std::time::Duration;

/// Point-in-time view of the thread counters and protocol metrics.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeStats {
    pub threads_count: usize,
    pub peak_count: usize,
    pub total_starts: u64,
    pub non_daemon_count: usize,
    pub mutexes_in_use: usize,
    pub conds_in_use: usize,
    pub suspend_requests: u64,
    pub resume_requests: u64,
    pub suspend_all_count: u64,
    pub suspend_wait_total_us: u64,
    pub lock_contention_count: u64,
    pub lock_contention_total_us: u64,
}

impl std::fmt::Display for RuntimeStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Runtime Statistics:")?;
        writeln!(
            f,
            "  Threads:            live {:>6}, peak {:>6}, started {:>8}",
            self.threads_count, self.peak_count, self.total_starts
        )?;
        writeln!(f, "  Non-daemon threads: {:>6}", self.non_daemon_count)?;
        writeln!(
            f,
            "  Pools:              mutexes {:>6}, conds {:>6}",
            self.mutexes_in_use, self.conds_in_use
        )?;
        writeln!(
            f,
            "  Suspension:         suspend {:>6}, resume {:>6}, suspend-all {:>6}, wait {:>10} us",
            self.suspend_requests,
            self.resume_requests,
            self.suspend_all_count,
            self.suspend_wait_total_us
        )?;
        writeln!(
            f,
            "  Lock contention:    {:>6} waits, {:>10} us",
            self.lock_contention_count, self.lock_contention_total_us
        )?;
        Ok(())
    }
}

/// Metrics counters.
///
/// All counters use `Ordering::Relaxed`: they are independent and never used to
/// synchronize other memory, we only need the updates themselves to be atomic.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    pub suspend_requests: AtomicU64,
    pub resume_requests: AtomicU64,
    pub suspend_all_count: AtomicU64,
    /// Total time suspenders spent waiting for targets to park (in microseconds)
    pub suspend_wait_total_us: AtomicU64,
    /// Number of times a thread had to block waiting for a pool mutex
    pub lock_contention_count: AtomicU64,
    /// Total time spent waiting for pool mutexes (in microseconds)
    pub lock_contention_total_us: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_suspend_request(&self) {
        self.suspend_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_resume_request(&self) {
        self.resume_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_suspend_all(&self) {
        self.suspend_all_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_suspend_wait(&self, duration: Duration) {
        self.suspend_wait_total_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_lock_contention(&self, duration: Duration) {
        self.lock_contention_count.fetch_add(1, Ordering::Relaxed);
        self.lock_contention_total_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }
}
