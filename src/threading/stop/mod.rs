//! Out-of-band stop primitives.
//!
//! A [`StopMechanism`] knows how to interrupt a running thread so it enters the
//! park loop of its [`ControlRecord`], how to wake it again, and how the owner
//! waits while parked. Dispatch is static through [`Stopper`].
use crate::{
    config::StopKind,
    error::Result,
    threading::ControlRecord,
};
use enum_dispatch::enum_dispatch;
use tracing::{debug, warn};

mod safepoint;
mod signal;

pub use safepoint::SafepointStop;
pub use signal::SignalStop;

#[enum_dispatch]
pub trait StopMechanism {
    fn kind(&self) -> StopKind;

    /// One-time process setup. Idempotent.
    fn install(&self) -> Result<()>;

    /// Interrupts `target` so it notices its pending suspend request.
    fn deliver(&self, target: &ControlRecord) -> Result<()>;

    /// Wakes a parked `target` after its request was cleared.
    fn wake(&self, target: &ControlRecord) -> Result<()>;

    /// Blocks the stop primitive for the calling thread (slow guard entry).
    fn mask(&self);

    /// Undoes [`StopMechanism::mask`].
    fn unmask(&self);

    /// Parks the calling thread, which owns `record`, for as long as its
    /// suspend request stands and it stays at `NOBLOCK`.
    fn park_current(&self, record: &ControlRecord);
}

#[enum_dispatch(StopMechanism)]
#[derive(Debug)]
pub enum Stopper {
    SignalStop,
    SafepointStop,
}

impl Stopper {
    /// Builds and installs the requested mechanism, falling back to safepoints
    /// where signals are unavailable.
    pub fn for_kind(kind: StopKind) -> Self {
        let stopper = match kind {
            StopKind::Safepoint => Stopper::from(SafepointStop),
            StopKind::Signal => {
                let signal = Stopper::from(SignalStop);
                match signal.install() {
                    Ok(()) => signal,
                    Err(e) => {
                        warn!("signal stop mechanism unavailable ({e}), using safepoints");
                        Stopper::from(SafepointStop)
                    }
                }
            }
        };
        debug!(mechanism = ?stopper.kind(), "stop mechanism ready");
        stopper
    }
}
