use crate::{
    config::StopKind,
    error::Result,
    threading::{stop::StopMechanism, ControlRecord},
};

/// Cooperative stop: the target parks when it next polls
/// [`crate::Runtime::safe_point`], waiting on its record's own condvar.
#[derive(Debug, Default, Clone, Copy)]
pub struct SafepointStop;

impl StopMechanism for SafepointStop {
    fn kind(&self) -> StopKind {
        StopKind::Safepoint
    }

    fn install(&self) -> Result<()> {
        Ok(())
    }

    fn deliver(&self, _target: &ControlRecord) -> Result<()> {
        Ok(())
    }

    fn wake(&self, target: &ControlRecord) -> Result<()> {
        // Taking the lock orders this notify after any waiter's flag check.
        let _guard = target.park_lock.lock();
        target.park_cv.notify_all();
        Ok(())
    }

    fn mask(&self) {}

    fn unmask(&self) {}

    fn park_current(&self, record: &ControlRecord) {
        record.park_while_requested(|| {
            let mut guard = record.park_lock.lock();
            if record.must_park() {
                record.park_cv.wait(&mut guard);
            }
        });
    }
}
