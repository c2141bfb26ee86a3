//! Thread registry, suspension protocol and lifecycle.
//!
//! # Architecture
//!
//! Every thread the runtime knows about owns exactly one [`ControlRecord`],
//! published in the [`Registry`] under its [`crate::ThreadHandle`]. The
//! suspend protocol reads and writes two fields of that record from more than
//! one thread:
//!
//! - `blocking`: how strongly the owner currently refuses suspension
//!   ([`BlockingLevel`]).
//! - `suspend_requested`: set by a suspender, cleared by a resumer.
//!
//! Every write to either field is followed by a full barrier, so a suspender's
//! request is visible before it waits for the target, and a target's guard-lift
//! is visible before it looks for a pending request.
//!
//! ## Stop mechanisms
//!
//! A running target is forced into its park loop by a [`StopMechanism`]:
//!
//! - **Signal** (Unix): `SIGUSR1` is delivered with `pthread_kill`; the handler
//!   parks in `sigsuspend`.
//! - **Safepoint** (portable): delivery is a no-op; the target parks the next
//!   time it polls [`crate::Runtime::safe_point`].
//!
//! Both go through the same park loop on the record, so state transitions and
//! the barrier contract are identical.
//!
//! ## Guards
//!
//! The slow guard (`BLOCKING`) also masks the stop signal and is meant for
//! calls that may sleep. The fast guard (`CRITICAL`) only flips the level; it
//! stays sound without masking because the handler re-reads the level and
//! returns immediately when it is not `NOBLOCK`.
mod current;
mod lifecycle;
mod protocol;
mod record;
mod registry;
mod stop;

pub use lifecycle::ThreadOptions;
pub use record::ControlRecord;
pub use registry::{Registry, RegistryState, ThreadsInfo};
pub use stop::{StopMechanism, Stopper};

pub(crate) use current::{bind_current, current_for, unbind_current};
pub(crate) use lifecycle::next_handle;
pub use protocol::StopTheWorldGuard;

use serde::Serialize;

/// Lifecycle and scheduling state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ThreadState {
    Creating = 0,
    Started = 1,
    Running = 2,
    Waiting = 3,
    TimedWaiting = 4,
    Blocked = 5,
    Suspended = 6,
}

impl ThreadState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ThreadState::Creating,
            1 => ThreadState::Started,
            2 => ThreadState::Running,
            3 => ThreadState::Waiting,
            4 => ThreadState::TimedWaiting,
            5 => ThreadState::Blocked,
            6 => ThreadState::Suspended,
            _ => ThreadState::Running, // Fallback
        }
    }
}

/// How strongly a thread currently refuses external suspension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum BlockingLevel {
    /// Suspendable at any instruction.
    NoBlock = 0,
    /// Slow guard: stop signal masked, suspension deferred.
    Blocking = 1,
    /// Fast guard: suspension deferred, signal left unmasked.
    Critical = 2,
}

impl BlockingLevel {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BlockingLevel::Blocking,
            2 => BlockingLevel::Critical,
            _ => BlockingLevel::NoBlock,
        }
    }
}

/// Serializable view of one registered thread, as returned by
/// [`crate::Runtime::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadSnapshot {
    pub handle: crate::ThreadHandle,
    pub name: String,
    pub state: ThreadState,
    pub blocking: BlockingLevel,
    pub suspend_requested: bool,
    pub priority: i32,
    pub daemon: bool,
    pub stack_size: usize,
}
