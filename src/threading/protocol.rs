use crate::{
    error::{Result, ThreadError},
    handle::ThreadHandle,
    runtime::Runtime,
    sync::Arc,
    threading::{
        current_for,
        stop::{StopMechanism, Stopper},
        BlockingLevel, ControlRecord, ThreadState,
    },
};
use std::{
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, trace, warn};

/// Scoped blocking level for the calling thread.
///
/// Restores the previous level on drop, self-suspending if that lowers the
/// thread back to `NOBLOCK` while a request is pending. Guards nest.
pub(crate) struct BlockingGuard<'a> {
    stopper: &'a Stopper,
    record: Option<Arc<ControlRecord>>,
    level: BlockingLevel,
    previous: BlockingLevel,
}

impl<'a> BlockingGuard<'a> {
    /// A guard around an unattached caller (`record == None`) does nothing.
    pub(crate) fn raise(
        stopper: &'a Stopper,
        record: Option<Arc<ControlRecord>>,
        level: BlockingLevel,
    ) -> Self {
        let previous = match &record {
            Some(record) => {
                let previous = record.swap_blocking(level);
                if level == BlockingLevel::Blocking && previous != BlockingLevel::Blocking {
                    stopper.mask();
                }
                previous
            }
            None => BlockingLevel::NoBlock,
        };
        Self {
            stopper,
            record,
            level,
            previous,
        }
    }
}

impl Drop for BlockingGuard<'_> {
    fn drop(&mut self) {
        let Some(record) = &self.record else {
            return;
        };
        record.swap_blocking(self.previous);
        if record.must_park() {
            self.stopper.park_current(record);
        }
        if self.level == BlockingLevel::Blocking && self.previous != BlockingLevel::Blocking {
            self.stopper.unmask();
        }
    }
}

/// Resumes every thread when dropped.
pub struct StopTheWorldGuard<'a> {
    runtime: &'a Runtime,
    start_time: Instant,
}

impl StopTheWorldGuard<'_> {
    pub fn elapsed_micros(&self) -> u64 {
        self.start_time.elapsed().as_micros() as u64
    }
}

impl Drop for StopTheWorldGuard<'_> {
    fn drop(&mut self) {
        self.runtime.resume_all();
        debug!(pause_us = self.elapsed_micros(), "world resumed");
    }
}

impl Runtime {
    /// Suspends `handle`.
    ///
    /// A target at `NOBLOCK` is interrupted and this call waits until it has
    /// parked. A target holding either guard only has the request recorded; it
    /// parks itself once the guard is lifted. Suspending the calling thread
    /// parks it until another thread resumes it.
    pub fn suspend(&self, handle: ThreadHandle) -> Result<()> {
        self.metrics.record_suspend_request();

        let (record, epoch) = {
            // A caller suspending itself sees its own level as CRITICAL here
            // and parks when this guard drops.
            let _guard = self.fast_guard();
            let registry = self.registry.lock();
            let record = registry.get(handle).cloned().ok_or(ThreadError::InvalidHandle)?;
            let epoch = record.park_epoch();
            let already_requested = record.request_suspend();

            if record.blocking() != BlockingLevel::NoBlock {
                drop(registry);
                trace!(thread = %handle, "suspend deferred by guard");
                return Ok(());
            }
            if let Err(e) = self.stopper.deliver(&record) {
                // Leave a request raised by someone else (e.g. suspend-all) alone.
                if !already_requested {
                    record.clear_suspend();
                }
                return Err(e);
            }
            (record, epoch)
        };

        trace!(thread = %handle, "suspend delivered");
        self.await_parked(&record, epoch);
        Ok(())
    }

    /// Spins until `record` parked, raised a guard, or lost its request.
    fn await_parked(&self, record: &ControlRecord, epoch: u64) {
        let start = Instant::now();
        let warn_after = self.config.suspend_warn_after();
        let mut warned = false;

        while record.park_epoch() == epoch
            && record.state() != ThreadState::Suspended
            && record.must_park()
        {
            if !warned && start.elapsed() > warn_after {
                let name = {
                    let _guard = self.fast_guard();
                    record.name()
                };
                warn!(
                    thread = %record.handle(),
                    name = %name,
                    mechanism = ?self.stopper.kind(),
                    "still waiting for thread to park after {:?}",
                    start.elapsed()
                );
                warned = true;
            }
            thread::yield_now();
        }
        self.metrics.record_suspend_wait(start.elapsed());
    }

    /// Withdraws the suspend request on `handle` and, if it is parked, waits
    /// until it runs again.
    pub fn resume(&self, handle: ThreadHandle) -> Result<()> {
        self.metrics.record_resume_request();

        let record = {
            let _guard = self.fast_guard();
            let registry = self.registry.lock();
            let record = registry.get(handle).cloned().ok_or(ThreadError::InvalidHandle)?;
            record.clear_suspend();

            if record.blocking() != BlockingLevel::NoBlock {
                return Ok(());
            }
            self.stopper.wake(&record)?;
            record
        };
        trace!(thread = %handle, "resume delivered");

        while record.state() == ThreadState::Suspended && !record.suspend_requested() {
            thread::yield_now();
        }
        Ok(())
    }

    /// Requests suspension of every registered thread except the caller and
    /// closes the start gate. Does not wait for the targets to park; see
    /// [`Runtime::await_suspended`].
    pub fn suspend_all(&self) {
        self.metrics.record_suspend_all();
        let me = current_for(self.id).map(|record| record.handle());

        let _guard = self.fast_guard();
        let mut failed = Vec::new();
        let threads = {
            let mut registry = self.registry.lock();
            for record in registry.records() {
                if Some(record.handle()) == me {
                    continue;
                }
                record.request_suspend();
                if record.blocking() == BlockingLevel::NoBlock {
                    if let Err(e) = self.stopper.deliver(record) {
                        failed.push((record.handle(), e));
                    }
                }
            }
            registry.info.all_suspended = true;
            registry.len()
        };
        // Never log under the registry lock: a parked thread may own the sink.
        for (handle, e) in failed {
            debug!(thread = %handle, "stop delivery failed: {e}");
        }
        debug!(threads, "suspend-all issued");
    }

    /// Withdraws every suspend request (the caller's excepted), reopens the
    /// start gate and wakes threads parked there.
    pub fn resume_all(&self) {
        let me = current_for(self.id).map(|record| record.handle());

        let _guard = self.fast_guard();
        let mut failed = Vec::new();
        let (threads, waiting_to_start) = {
            let mut registry = self.registry.lock();
            for record in registry.records() {
                if Some(record.handle()) == me {
                    continue;
                }
                record.clear_suspend();
                if record.blocking() == BlockingLevel::NoBlock {
                    if let Err(e) = self.stopper.wake(record) {
                        failed.push((record.handle(), e));
                    }
                }
            }
            registry.info.all_suspended = false;
            (registry.len(), registry.info.waiting_to_start)
        };
        self.registry.notify_all();

        for (handle, e) in failed {
            debug!(thread = %handle, "wake delivery failed: {e}");
        }
        debug!(threads, waiting_to_start, "resume-all issued");
    }

    /// Suspends everything but the caller and waits for the world to settle.
    /// Dropping the guard resumes all threads.
    pub fn stop_the_world(&self, timeout: Duration) -> Result<StopTheWorldGuard<'_>> {
        let start_time = Instant::now();
        self.suspend_all();
        let guard = StopTheWorldGuard {
            runtime: self,
            start_time,
        };
        self.await_suspended(timeout)?;
        Ok(guard)
    }

    /// Waits until every thread with a pending request is either parked or
    /// holding a guard (and so cannot run user code until it parks).
    pub fn await_suspended(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut settled = true;
            let _guard = self.fast_guard();
            self.registry.for_each(|record| {
                if record.must_park() && record.state() != ThreadState::Suspended {
                    settled = false;
                }
            });
            if settled {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(ThreadError::Timeout);
            }
            thread::yield_now();
        }
    }

    /// Parks the calling thread if a suspend request is pending.
    ///
    /// The only way a thread responds to suspension under the safepoint
    /// mechanism; harmless under signals.
    pub fn safe_point(&self) {
        if let Some(record) = current_for(self.id) {
            if record.must_park() && record.state() != ThreadState::Suspended {
                self.stopper.park_current(&record);
            }
        }
    }

    fn caller_record(&self) -> Result<Arc<ControlRecord>> {
        current_for(self.id).ok_or(ThreadError::InvalidHandle)
    }

    /// Slow guard: defers suspension of the caller and masks the stop signal.
    pub fn disable_suspend(&self) -> Result<()> {
        let record = self.caller_record()?;
        if record.swap_blocking(BlockingLevel::Blocking) != BlockingLevel::Blocking {
            self.stopper.mask();
        }
        Ok(())
    }

    /// Lifts the slow guard, parking first if a suspend arrived meanwhile.
    pub fn enable_suspend(&self) -> Result<()> {
        let record = self.caller_record()?;
        let previous = record.swap_blocking(BlockingLevel::NoBlock);
        if record.must_park() {
            self.stopper.park_current(&record);
        }
        if previous == BlockingLevel::Blocking {
            self.stopper.unmask();
        }
        Ok(())
    }

    /// Fast guard: defers suspension without touching the signal mask.
    pub fn disable_suspend_fast(&self) -> Result<()> {
        let record = self.caller_record()?;
        record.swap_blocking(BlockingLevel::Critical);
        Ok(())
    }

    pub fn enable_suspend_fast(&self) -> Result<()> {
        let record = self.caller_record()?;
        record.swap_blocking(BlockingLevel::NoBlock);
        if record.suspend_requested() {
            self.stopper.park_current(&record);
        }
        Ok(())
    }

    pub(crate) fn slow_guard(&self) -> BlockingGuard<'_> {
        BlockingGuard::raise(&self.stopper, current_for(self.id), BlockingLevel::Blocking)
    }

    pub(crate) fn fast_guard(&self) -> BlockingGuard<'_> {
        BlockingGuard::raise(&self.stopper, current_for(self.id), BlockingLevel::Critical)
    }

    /// True when `handle` could be stopped right now.
    pub fn is_suspendable(&self, handle: ThreadHandle) -> Result<bool> {
        let record = self.lookup(handle).ok_or(ThreadError::InvalidHandle)?;
        Ok(record.blocking() == BlockingLevel::NoBlock)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        config::{RuntimeConfig, StopKind, PRIORITY_NORM},
        threading::next_handle,
    };
    use std::{mem, ptr};

    fn signal_runtime() -> Arc<Runtime> {
        Runtime::new(RuntimeConfig::default().with_stop_mechanism(StopKind::Signal)).unwrap()
    }

    /// Registers a record no native thread is bound to, so signal delivery fails.
    fn publish_unbound(runtime: &Runtime) -> Arc<ControlRecord> {
        let record = Arc::new(ControlRecord::new(
            next_handle(),
            runtime.id,
            "unbound",
            PRIORITY_NORM,
            0,
            true,
            None,
        ));
        runtime.registry.lock().insert(record.clone());
        record
    }

    fn stop_signal_blocked() -> bool {
        unsafe {
            let mut current: libc::sigset_t = mem::zeroed();
            libc::pthread_sigmask(libc::SIG_BLOCK, ptr::null(), &mut current);
            libc::sigismember(&current, libc::SIGUSR1) == 1
        }
    }

    #[test]
    fn test_failed_delivery_withdraws_own_request() {
        let runtime = signal_runtime();
        let record = publish_unbound(&runtime);

        assert_eq!(
            runtime.suspend(record.handle()).unwrap_err(),
            ThreadError::InvalidHandle
        );
        assert!(!record.suspend_requested());
        runtime.registry.lock().remove_owned(record.handle()).unwrap();
    }

    #[test]
    fn test_failed_delivery_keeps_suspend_all_request() {
        let runtime = signal_runtime();
        let record = publish_unbound(&runtime);

        runtime.suspend_all();
        assert!(record.suspend_requested());
        assert_eq!(
            runtime.suspend(record.handle()).unwrap_err(),
            ThreadError::InvalidHandle
        );
        assert!(record.suspend_requested());

        runtime.resume_all();
        assert!(!record.suspend_requested());
        runtime.registry.lock().remove_owned(record.handle()).unwrap();
    }

    #[test]
    fn test_enable_suspend_keeps_outer_mask() {
        let runtime = signal_runtime();
        assert!(!stop_signal_blocked());

        let outer = runtime.slow_guard();
        assert!(stop_signal_blocked());
        runtime.disable_suspend_fast().unwrap();
        runtime.enable_suspend().unwrap();
        assert!(stop_signal_blocked());
        drop(outer);

        runtime.disable_suspend().unwrap();
        assert!(stop_signal_blocked());
        runtime.enable_suspend().unwrap();
        assert!(!stop_signal_blocked());
    }
}
