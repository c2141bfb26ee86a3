//! Compile-time limits and the runtime-overridable configuration.
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of slots in the mutex pool.
pub const MUTEX_POOL_CAPACITY: usize = 1024;
/// Default number of slots in the condition-variable pool.
pub const COND_POOL_CAPACITY: usize = 1024;
/// Stack size used when a caller passes `0` or relies on [`crate::ThreadOptions::default`].
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;
/// Smallest stack the lifecycle layer accepts.
pub const MIN_STACK_SIZE: usize = 16 * 1024;
/// Display names (threads, mutexes, conditions) are stored in at most `OBJECT_NAME_MAX - 1` bytes.
pub const OBJECT_NAME_MAX: usize = 32;

pub const PRIORITY_MIN: i32 = 1;
pub const PRIORITY_NORM: i32 = 5;
pub const PRIORITY_MAX: i32 = 10;

/// How a suspender forces a running thread into its park loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StopKind {
    /// Out-of-band signal delivery (`SIGUSR1`). Unix only.
    Signal,
    /// The target parks itself at its next [`crate::Runtime::safe_point`] poll.
    Safepoint,
}

impl Default for StopKind {
    fn default() -> Self {
        if cfg!(unix) {
            StopKind::Signal
        } else {
            StopKind::Safepoint
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub mutex_capacity: usize,
    pub cond_capacity: usize,
    pub default_stack_size: usize,
    pub stop_mechanism: StopKind,
    /// A suspender still waiting for its target after this long logs a warning.
    pub suspend_warn_after_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            mutex_capacity: MUTEX_POOL_CAPACITY,
            cond_capacity: COND_POOL_CAPACITY,
            default_stack_size: DEFAULT_STACK_SIZE,
            stop_mechanism: StopKind::default(),
            suspend_warn_after_ms: 1000,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mutex_capacity == 0 {
            return Err(ConfigError::Invalid("mutex_capacity must be non-zero"));
        }
        if self.cond_capacity == 0 {
            return Err(ConfigError::Invalid("cond_capacity must be non-zero"));
        }
        if self.default_stack_size < MIN_STACK_SIZE {
            return Err(ConfigError::Invalid("default_stack_size below MIN_STACK_SIZE"));
        }
        Ok(())
    }

    pub fn with_pool_capacity(mut self, mutexes: usize, conds: usize) -> Self {
        self.mutex_capacity = mutexes;
        self.cond_capacity = conds;
        self
    }

    pub fn with_stop_mechanism(mut self, kind: StopKind) -> Self {
        self.stop_mechanism = kind;
        self
    }

    pub fn suspend_warn_after(&self) -> Duration {
        Duration::from_millis(self.suspend_warn_after_ms)
    }
}

/// Truncates `name` to fit an `OBJECT_NAME_MAX` buffer without splitting a character.
pub(crate) fn clamp_name(name: &str) -> String {
    let limit = OBJECT_NAME_MAX - 1;
    if name.len() <= limit {
        return name.to_owned();
    }
    let mut end = limit;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = RuntimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mutex_capacity, MUTEX_POOL_CAPACITY);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            mutex_capacity = 8
            stop_mechanism = "safepoint"
            "#,
        )
        .unwrap();
        assert_eq!(config.mutex_capacity, 8);
        assert_eq!(config.cond_capacity, COND_POOL_CAPACITY);
        assert_eq!(config.stop_mechanism, StopKind::Safepoint);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let err = RuntimeConfig::from_toml_str("cond_capacity = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_garbage() {
        let err = RuntimeConfig::from_toml_str("mutex_capacity = \"lots\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_clamp_name() {
        assert_eq!(clamp_name("main"), "main");
        let long = "x".repeat(40);
        assert_eq!(clamp_name(&long).len(), OBJECT_NAME_MAX - 1);
        // 'é' is two bytes; byte 31 would land inside the final one
        let accented = format!("{}é", "a".repeat(30));
        assert_eq!(clamp_name(&accented), "a".repeat(30));
    }
}
