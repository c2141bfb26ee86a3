use crate::{
    config::StopKind,
    error::Result,
    threading::{stop::StopMechanism, ControlRecord},
};

/// `SIGUSR1`-driven stop for Unix targets.
///
/// The handler looks up the interrupted thread's record through its
/// thread-local pointer, re-checks `suspend_requested && blocking == NOBLOCK`
/// and parks in `sigsuspend` until a resumer clears the request and sends the
/// signal again. With any guard raised it returns at once, which is what keeps
/// the unmasked fast guard sound.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalStop;

#[cfg(unix)]
mod imp {
    use crate::{
        error::{Result, ThreadError},
        threading::{current::current_ptr, ControlRecord, ThreadState},
    };
    use libc::c_int;
    use std::{io, mem, ptr, sync::OnceLock};

    pub(super) const STOP_SIGNAL: c_int = libc::SIGUSR1;

    static INSTALLED: OnceLock<std::result::Result<(), i32>> = OnceLock::new();

    #[cfg(any(target_os = "linux", target_os = "emscripten"))]
    unsafe fn errno_location() -> *mut c_int {
        libc::__errno_location()
    }

    #[cfg(any(target_os = "android", target_os = "netbsd", target_os = "openbsd"))]
    unsafe fn errno_location() -> *mut c_int {
        libc::__errno()
    }

    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    ))]
    unsafe fn errno_location() -> *mut c_int {
        libc::__error()
    }

    #[cfg(not(any(
        target_os = "linux",
        target_os = "emscripten",
        target_os = "android",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly"
    )))]
    unsafe fn errno_location() -> *mut c_int {
        ptr::null_mut()
    }

    /// Waits for the next stop signal with everything else but `SIGTERM` blocked.
    unsafe fn wait_for_signal() {
        let mut mask: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut mask);
        libc::sigdelset(&mut mask, STOP_SIGNAL);
        libc::sigdelset(&mut mask, libc::SIGTERM);
        libc::sigsuspend(&mask);
    }

    extern "C" fn on_stop_signal(_signo: c_int) {
        // SAFETY: errno_location returns this thread's errno slot or null.
        let errno = unsafe { errno_location() };
        let saved = if errno.is_null() { 0 } else { unsafe { *errno } };

        let raw = current_ptr();
        if !raw.is_null() {
            // SAFETY: the pointer is only published while this thread's binding
            // holds a strong reference to the record.
            let record = unsafe { &*raw };
            if record.must_park() && record.state() != ThreadState::Suspended {
                // SIGUSR1 stays blocked inside the handler, so a wake sent before
                // sigsuspend is left pending rather than lost.
                record.park_while_requested(|| unsafe { wait_for_signal() });
            }
        }

        if !errno.is_null() {
            unsafe { *errno = saved };
        }
    }

    pub(super) fn install() -> Result<()> {
        let outcome = INSTALLED.get_or_init(|| unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = on_stop_signal as extern "C" fn(c_int) as libc::sighandler_t;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);
            if libc::sigaction(STOP_SIGNAL, &action, ptr::null_mut()) == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error().raw_os_error().unwrap_or(0))
            }
        });
        match outcome {
            Ok(()) => Ok(()),
            Err(_) => Err(ThreadError::Unsupported("cannot install the SIGUSR1 handler")),
        }
    }

    pub(super) fn send(target: &ControlRecord) -> Result<()> {
        let native = target.native();
        if native == 0 {
            return Err(ThreadError::InvalidHandle);
        }
        // SAFETY: callers hold the registry lock, and a thread only unregisters
        // itself under that lock before exiting, so the pthread_t is live.
        let rc = unsafe { libc::pthread_kill(native as libc::pthread_t, STOP_SIGNAL) };
        match rc {
            0 => Ok(()),
            libc::ESRCH => Err(ThreadError::InvalidHandle),
            _ => Err(ThreadError::InvalidArgs("pthread_kill rejected the stop signal")),
        }
    }

    fn stop_set() -> libc::sigset_t {
        unsafe {
            let mut set: libc::sigset_t = mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, STOP_SIGNAL);
            set
        }
    }

    pub(super) fn change_mask(how: c_int) {
        let set = stop_set();
        unsafe {
            libc::pthread_sigmask(how, &set, ptr::null_mut());
        }
    }

    pub(super) fn park_current(record: &ControlRecord) {
        let set = stop_set();
        unsafe {
            let mut previous: libc::sigset_t = mem::zeroed();
            // Blocked between the flag check and sigsuspend, see on_stop_signal.
            libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous);
            record.park_while_requested(|| wait_for_signal());
            libc::pthread_sigmask(libc::SIG_SETMASK, &previous, ptr::null_mut());
        }
    }
}

#[cfg(unix)]
impl StopMechanism for SignalStop {
    fn kind(&self) -> StopKind {
        StopKind::Signal
    }

    fn install(&self) -> Result<()> {
        imp::install()
    }

    fn deliver(&self, target: &ControlRecord) -> Result<()> {
        imp::send(target)
    }

    fn wake(&self, target: &ControlRecord) -> Result<()> {
        imp::send(target)
    }

    fn mask(&self) {
        imp::change_mask(libc::SIG_BLOCK);
    }

    fn unmask(&self) {
        imp::change_mask(libc::SIG_UNBLOCK);
    }

    fn park_current(&self, record: &ControlRecord) {
        imp::park_current(record);
    }
}

#[cfg(not(unix))]
impl StopMechanism for SignalStop {
    fn kind(&self) -> StopKind {
        StopKind::Signal
    }

    fn install(&self) -> Result<()> {
        Err(crate::error::ThreadError::Unsupported(
            "signal delivery needs a unix target",
        ))
    }

    fn deliver(&self, _target: &ControlRecord) -> Result<()> {
        self.install()
    }

    fn wake(&self, _target: &ControlRecord) -> Result<()> {
        self.install()
    }

    fn mask(&self) {}

    fn unmask(&self) {}

    fn park_current(&self, record: &ControlRecord) {
        super::SafepointStop.park_current(record);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::{
        handle::ThreadHandle,
        sync::{Arc, AtomicBool, Ordering},
        threading::{bind_current, unbind_current, ThreadState},
    };
    use std::{
        thread,
        time::{Duration, Instant},
    };

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_signal_parks_and_wakes() {
        let stop = SignalStop;
        stop.install().unwrap();

        let record = Arc::new(ControlRecord::new(
            ThreadHandle::new(u64::MAX - 1),
            0,
            "sig",
            5,
            0,
            false,
            None,
        ));
        let done = Arc::new(AtomicBool::new(false));

        let (rec, flag) = (record.clone(), done.clone());
        let worker = thread::spawn(move || {
            rec.bind_os_thread();
            bind_current(rec.clone());
            rec.set_state(ThreadState::Running);
            while !flag.load(Ordering::SeqCst) {
                std::hint::spin_loop();
            }
            unbind_current(rec.handle());
        });

        wait_until(|| record.native() != 0 && record.state() == ThreadState::Running);
        record.request_suspend();
        stop.deliver(&record).unwrap();
        wait_until(|| record.state() == ThreadState::Suspended);

        record.clear_suspend();
        stop.wake(&record).unwrap();
        wait_until(|| record.state() == ThreadState::Running);

        done.store(true, Ordering::SeqCst);
        worker.join().unwrap();
    }

    #[test]
    fn test_unbound_thread_ignores_signal() {
        SignalStop.install().unwrap();
        let record = ControlRecord::new(ThreadHandle::new(u64::MAX - 2), 0, "x", 5, 0, false, None);
        // Bound to this thread's pthread but not to its thread-local pointer.
        record.bind_os_thread();
        record.request_suspend();
        SignalStop.deliver(&record).unwrap();
        thread::sleep(Duration::from_millis(20));
        assert_ne!(record.state(), ThreadState::Suspended);
    }
}
