//! A portable thread runtime for a managed virtual machine.
//!
//! The [`Runtime`] keeps a registry of every thread it knows about, can stop
//! any of them at an arbitrary point (by signal on Unix, or at cooperative
//! safe points anywhere), and hands out mutexes and condition variables from
//! fixed-capacity pools by index.
//!
//! ```no_run
//! use vmthreads::{Runtime, ThreadOptions};
//!
//! let runtime = Runtime::with_defaults();
//! let rt = runtime.clone();
//! let worker = runtime
//!     .spawn(ThreadOptions::named("worker"), move || rt.safe_point())
//!     .unwrap();
//! runtime.suspend(worker).ok();
//! runtime.resume(worker).ok();
//! ```
pub mod cli;
pub mod config;
pub mod error;
pub mod handle;
pub mod metrics;
pub mod pool;
pub mod runtime;
pub mod sync;
pub mod threading;

pub use config::{RuntimeConfig, StopKind};
pub use error::{ConfigError, Result, ThreadError};
pub use handle::{CondId, MutexId, ThreadHandle};
pub use metrics::{RuntimeMetrics, RuntimeStats};
pub use runtime::Runtime;
pub use threading::{
    BlockingLevel, ControlRecord, StopTheWorldGuard, ThreadOptions, ThreadSnapshot,
    ThreadState, ThreadsInfo,
};
