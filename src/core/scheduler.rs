//! Shared admission limiter and worker pool.

use std::sync::Arc;

use tracing::info;

use super::limiter::TaskLimiter;
use super::task::{Task, TaskContext, TaskWork};
use super::worker_pool::{PoolError, WorkerPool};
use crate::config::HubConfig;

/// Creates tasks that share one limiter and one worker pool.
#[derive(Clone)]
pub struct TaskScheduler {
    limiter: Arc<TaskLimiter>,
    pool: Arc<WorkerPool>,
}

impl TaskScheduler {
    /// Assemble a scheduler from existing parts.
    #[must_use]
    pub const fn new(limiter: Arc<TaskLimiter>, pool: Arc<WorkerPool>) -> Self {
        Self { limiter, pool }
    }

    /// Build limiter and pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` if the pool settings are invalid.
    pub fn from_config(config: &HubConfig) -> Result<Self, PoolError> {
        let pool = WorkerPool::new(config.worker_pool.clone())?;
        let limiter = config.limiter();
        info!(
            max_concurrent_tasks = limiter.limit(),
            max_tasks_per_principal = ?limiter.principal_limit(),
            "Task scheduler ready"
        );
        Ok(Self::new(Arc::new(limiter), Arc::new(pool)))
    }

    /// The shared admission limiter.
    #[must_use]
    pub const fn limiter(&self) -> &Arc<TaskLimiter> {
        &self.limiter
    }

    /// The shared worker pool.
    #[must_use]
    pub const fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Create a new task bound to this scheduler.
    pub fn task<W: TaskWork>(&self, work: W, context: TaskContext) -> Task<W> {
        Task::new(
            work,
            context,
            Arc::clone(&self.limiter),
            Arc::clone(&self.pool),
        )
    }

    /// Shut the worker pool down. Tasks started afterwards are rejected.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}
