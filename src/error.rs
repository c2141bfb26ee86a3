use thiserror::Error;

/// Failure kinds shared by every thread, pool and suspension operation.
///
/// None of these are fatal: an `InvalidHandle` on lookup usually just means the
/// thread already exited, `Busy` and `Timeout` are retryable, and `Exhausted`
/// is a capacity-planning problem the caller should surface.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    #[error("unknown thread or pool handle")]
    InvalidHandle,
    #[error("pool capacity of {capacity} exhausted")]
    Exhausted { capacity: usize },
    #[error("resource is busy")]
    Busy,
    #[error("wait timed out")]
    Timeout,
    #[error("invalid argument: {0}")]
    InvalidArgs(&'static str),
    #[error("unsupported on this platform: {0}")]
    Unsupported(&'static str),
    #[error("mutex is already held by the calling thread")]
    WouldDeadlock,
    #[error("caller does not own the resource")]
    PermissionDenied,
}

pub type Result<T, E = ThreadError> = std::result::Result<T, E>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    Parse(String),
    #[error("Invalid config: {0}")]
    Invalid(&'static str),
}
