//! Worker pool executing tasks on dedicated OS threads.
//!
//! The pool grows on demand: a submitted job is handed to an idle worker if one
//! is waiting, otherwise a new worker thread is spawned. Idle workers retire
//! after the configured keep-alive. Every worker owns a single-threaded tokio
//! runtime, so jobs may block on I/O without stalling other tasks.
//!
//! Parallelism is not limited here; admission control happens before a job is
//! submitted (see [`crate::core::TaskLimiter`]). An optional `max_workers`
//! turns the pool into a hard cap that rejects with [`PoolError::Saturated`].
//!
//! # Example
//!
//! ```rust,ignore
//! use geohub_core::config::WorkerPoolConfig;
//! use geohub_core::core::WorkerPool;
//!
//! let pool = WorkerPool::new(WorkerPoolConfig::new())?;
//! pool.submit(async { tracing::info!("running on a pool worker") })?;
//! pool.shutdown();
//! ```

mod native;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use thiserror::Error;

/// Unit of work executed by a worker.
pub(crate) type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Errors that can occur when using a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool has been shut down.
    #[error("pool has been shut down")]
    Shutdown,

    /// All `max_workers` workers are busy.
    #[error("all {max_workers} workers are busy")]
    Saturated {
        /// Configured worker cap.
        max_workers: usize,
    },

    /// Creating a worker thread or its runtime failed.
    #[error("failed to spawn worker: {0}")]
    Spawn(String),

    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Live worker threads.
    pub worker_count: usize,

    /// Workers waiting for a job.
    pub idle_workers: usize,

    /// Jobs currently executing.
    pub active_jobs: u64,

    /// Total jobs accepted.
    pub submitted_jobs: u64,

    /// Total jobs finished, including panicked ones.
    pub completed_jobs: u64,

    /// Total jobs that panicked.
    pub panicked_jobs: u64,

    /// Total worker threads ever spawned.
    pub spawned_workers: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub live_workers: AtomicUsize,
    pub idle_workers: AtomicUsize,
    pub active_jobs: AtomicU64,
    pub submitted_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
    pub panicked_jobs: AtomicU64,
    pub spawned_workers: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self) -> PoolStats {
        PoolStats {
            worker_count: self.live_workers.load(Ordering::Relaxed),
            idle_workers: self.idle_workers.load(Ordering::Relaxed),
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
            panicked_jobs: self.panicked_jobs.load(Ordering::Relaxed),
            spawned_workers: self.spawned_workers.load(Ordering::Relaxed),
        }
    }
}

pub use native::WorkerPool;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_error_display() {
        assert_eq!(PoolError::Shutdown.to_string(), "pool has been shut down");
        assert_eq!(
            PoolError::Saturated { max_workers: 4 }.to_string(),
            "all 4 workers are busy"
        );
        assert_eq!(
            PoolError::InvalidConfig("x".into()).to_string(),
            "invalid configuration: x"
        );
        let err: anyhow::Error = PoolError::Spawn("no threads".into()).into();
        assert_eq!(err.to_string(), "failed to spawn worker: no threads");
    }

    #[test]
    fn test_pool_counters_snapshot() {
        let counters = PoolCounters::default();
        counters.submitted_jobs.fetch_add(10, Ordering::Relaxed);
        counters.completed_jobs.fetch_add(5, Ordering::Relaxed);
        counters.live_workers.fetch_add(3, Ordering::Relaxed);

        let stats = counters.snapshot();
        assert_eq!(stats.worker_count, 3);
        assert_eq!(stats.submitted_jobs, 10);
        assert_eq!(stats.completed_jobs, 5);
        assert_eq!(stats.active_jobs, 0);
    }
}
