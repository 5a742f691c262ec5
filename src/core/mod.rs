//! Task scheduling: admission control, worker pool and task lifecycle.

pub mod audit;
pub mod error;
pub mod limiter;
pub mod scheduler;
pub mod task;
pub mod worker_pool;

pub use audit::{audit_listener, build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, LimitScope, TaskError, TaskFault, TooManyTasks};
pub use limiter::{TaskLimiter, TaskSlot};
pub use scheduler::TaskScheduler;
pub use task::{
    Listener, Task, TaskContext, TaskHandle, TaskOutcome, TaskState, TaskWork, MAX_LISTENERS,
};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
