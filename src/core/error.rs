//! Error types for task scheduling.

use std::fmt;

use thiserror::Error;

use super::task::TaskState;
use super::worker_pool::PoolError;

/// Which admission limit rejected a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitScope {
    /// The instance-wide soft cap on concurrent non-internal tasks.
    Instance,
    /// The per-principal cap.
    Principal,
}

impl fmt::Display for LimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance => f.write_str("instance"),
            Self::Principal => f.write_str("principal"),
        }
    }
}

/// Admission-control rejection. Callers should treat this as retryable
/// backpressure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("maximum number of concurrent tasks reached for {scope} ({limit})")]
pub struct TooManyTasks {
    /// Which limit was hit.
    pub scope: LimitScope,
    /// The configured value of that limit at rejection time.
    pub limit: u64,
    /// The principal that was over its limit, for [`LimitScope::Principal`].
    pub principal: Option<String>,
}

impl TooManyTasks {
    /// Rejection by the instance-wide limit.
    #[must_use]
    pub const fn instance(limit: u64) -> Self {
        Self {
            scope: LimitScope::Instance,
            limit,
            principal: None,
        }
    }

    /// Rejection by a per-principal limit.
    pub fn principal(limit: u64, principal: impl Into<String>) -> Self {
        Self {
            scope: LimitScope::Principal,
            limit,
            principal: Some(principal.into()),
        }
    }
}

/// Failure raised by a task's `init` or `execute` hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskFault {
    /// The hook returned an error.
    #[error("task failed: {0}")]
    Error(String),
    /// The hook panicked.
    #[error("task panicked: {0}")]
    Panic(String),
}

/// Errors produced by the task lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The operation is only legal in another state.
    #[error("found illegal state {found}, expected {expected}")]
    InvalidState {
        /// State the task was in.
        found: TaskState,
        /// State the operation requires.
        expected: TaskState,
    },
    /// Admission control rejected the start.
    #[error(transparent)]
    TooManyTasks(#[from] TooManyTasks),
    /// The task ran but its error hook did not produce an output.
    #[error(transparent)]
    Failed(#[from] TaskFault),
    /// The worker pool failed for a reason other than saturation.
    #[error("internal error while forking worker: {0}")]
    Pool(PoolError),
    /// The listener list is full.
    #[error("listener limit of {0} reached")]
    TooManyListeners(usize),
    /// Waiting for the output timed out; the task keeps running.
    #[error("timed out waiting for the task output")]
    Timeout,
    /// The worker went away without delivering an outcome.
    #[error("task terminated without delivering an outcome")]
    Lost,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_many_tasks_display() {
        assert_eq!(
            TooManyTasks::instance(2).to_string(),
            "maximum number of concurrent tasks reached for instance (2)"
        );
        let err = TooManyTasks::principal(5, "app-1");
        assert_eq!(err.scope, LimitScope::Principal);
        assert_eq!(err.principal.as_deref(), Some("app-1"));
        assert_eq!(
            err.to_string(),
            "maximum number of concurrent tasks reached for principal (5)"
        );
    }

    #[test]
    fn test_invalid_state_display() {
        let err = TaskError::InvalidState {
            found: TaskState::Execute,
            expected: TaskState::New,
        };
        assert_eq!(err.to_string(), "found illegal state EXECUTE, expected NEW");
    }
}
