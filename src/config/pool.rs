//! Worker pool configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_KEEP_ALIVE_MS: u64 = 60_000;
const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;
const MIN_STACK_SIZE: usize = 64 * 1024;

/// Configuration of the on-demand worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerPoolConfig {
    /// Hard cap on worker threads; `None` grows without bound.
    pub max_workers: Option<usize>,
    /// How long an idle worker waits for a job before it exits.
    pub keep_alive_ms: u64,
    /// Stack size of each worker thread in bytes.
    pub thread_stack_size: usize,
    /// Worker thread name prefix; threads are named `{prefix}-{n}`.
    pub thread_name_prefix: String,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            keep_alive_ms: DEFAULT_KEEP_ALIVE_MS,
            thread_stack_size: DEFAULT_STACK_SIZE,
            thread_name_prefix: "geohub-worker".into(),
        }
    }
}

impl WorkerPoolConfig {
    /// Default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of worker threads.
    #[must_use]
    pub const fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = Some(max_workers);
        self
    }

    /// Set the idle keep-alive.
    #[must_use]
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive_ms = u64::try_from(keep_alive.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the worker stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Idle keep-alive as a duration.
    #[must_use]
    pub const fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_workers == Some(0) {
            return Err("max_workers must be greater than 0".into());
        }
        if self.keep_alive_ms == 0 {
            return Err("keep_alive_ms must be greater than 0".into());
        }
        if self.thread_stack_size < MIN_STACK_SIZE {
            return Err(format!("thread_stack_size must be at least {MIN_STACK_SIZE}"));
        }
        if self.thread_name_prefix.is_empty() {
            return Err("thread_name_prefix must not be empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerPoolConfig::new();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_workers, None);
        assert_eq!(config.keep_alive(), Duration::from_secs(60));
    }

    #[test]
    fn test_invalid_values() {
        assert!(WorkerPoolConfig::new().with_max_workers(0).validate().is_err());
        assert!(WorkerPoolConfig::new()
            .with_keep_alive(Duration::ZERO)
            .validate()
            .is_err());
        assert!(WorkerPoolConfig::new()
            .with_thread_stack_size(1024)
            .validate()
            .is_err());
    }
}
