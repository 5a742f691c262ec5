//! Lifecycle-tracked unit of work.
//!
//! A [`Task`] wraps one piece of [`TaskWork`] and runs it on a pool worker after
//! admission control. The state only moves forward:
//!
//! ```text
//! NEW -> START -> EXECUTE -> CALLING_LISTENER -> DONE
//! ```
//!
//! The internal flag and the listener list may only change while the task is
//! `NEW`. `start` holds the task mutex across admission, submission and the
//! `START` transition; the worker takes the same mutex before it moves to
//! `EXECUTE`, so it can never observe a task that is still `NEW`.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info_span, warn, Instrument};

use super::error::{TaskError, TaskFault, TooManyTasks};
use super::limiter::{TaskLimiter, TaskSlot};
use super::worker_pool::{PoolError, WorkerPool};
use crate::model::Request;
use crate::util::clock::now_ms;

/// Maximum number of listeners a task accepts.
pub const MAX_LISTENERS: usize = 64;

static TASK_IDS: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state of a task. Ordered by progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// Created, not yet started. The only mutable state.
    New = 0,
    /// Admitted and submitted to the pool.
    Start = 1,
    /// Running `init` and `execute` on a worker.
    Execute = 2,
    /// Delivering the outcome to listeners.
    CallingListener = 3,
    /// Finished.
    Done = 4,
}

impl TaskState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::New,
            1 => Self::Start,
            2 => Self::Execute,
            3 => Self::CallingListener,
            _ => Self::Done,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::New => "NEW",
            Self::Start => "START",
            Self::Execute => "EXECUTE",
            Self::CallingListener => "CALLING_LISTENER",
            Self::Done => "DONE",
        })
    }
}

/// Execution context carried explicitly through every call a task makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    /// Correlation id, used for logging and error results.
    pub stream_id: String,
    /// Principal counted by the per-principal limit.
    pub principal: Option<String>,
    /// Absolute deadline in milliseconds since epoch.
    pub deadline_ms: Option<u64>,
}

impl TaskContext {
    /// Context with the given stream id, no principal and no deadline.
    pub fn new(stream_id: impl Into<String>) -> Self {
        Self {
            stream_id: stream_id.into(),
            principal: None,
            deadline_ms: None,
        }
    }

    /// Context taking stream id and deadline from a request.
    #[must_use]
    pub fn for_request(request: &Request) -> Self {
        Self {
            stream_id: request.stream_id.clone(),
            principal: None,
            deadline_ms: request.deadline_ms,
        }
    }

    /// Set the principal.
    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Set the deadline to `budget` from now.
    #[must_use]
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        let budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self.deadline_ms = Some(now_ms().saturating_add(budget_ms));
        self
    }

    /// Time left before the deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline_ms
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now_ms())))
    }
}

/// What a task produces: the output, or the fault its error hook let through.
pub type TaskOutcome<O> = Result<O, TaskFault>;

/// Completion callback. Identity is the `Arc` pointer.
pub type Listener<O> = Arc<dyn Fn(&TaskOutcome<O>) + Send + Sync>;

/// The work a task performs on its worker.
#[async_trait]
pub trait TaskWork: Send + 'static {
    /// Value delivered to listeners and the task handle.
    type Output: Send + 'static;

    /// Runs before `execute`. A failure skips `execute`.
    async fn init(&mut self, _ctx: &TaskContext) -> Result<(), TaskFault> {
        Ok(())
    }

    /// Produce the output.
    async fn execute(&mut self, ctx: &TaskContext) -> Result<Self::Output, TaskFault>;

    /// Turn a failure of `init` or `execute` into an output.
    ///
    /// The default logs and hands the fault on; the handle then resolves to
    /// [`TaskError::Failed`]. Override it to degrade gracefully.
    fn error_response(
        &mut self,
        ctx: &TaskContext,
        fault: TaskFault,
    ) -> Result<Self::Output, TaskFault> {
        warn!(stream_id = %ctx.stream_id, error = %fault, "Task failed");
        Err(fault)
    }
}

struct Guarded<W: TaskWork> {
    internal: bool,
    listeners: Vec<Listener<W::Output>>,
    work: Option<W>,
}

struct TaskInner<W: TaskWork> {
    id: u64,
    context: TaskContext,
    state: AtomicU8,
    thread: Mutex<Option<ThreadId>>,
    guarded: Mutex<Guarded<W>>,
    limiter: Arc<TaskLimiter>,
    pool: Arc<WorkerPool>,
}

impl<W: TaskWork> TaskInner<W> {
    fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn advance(&self, from: TaskState, to: TaskState) -> Result<(), TaskError> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|found| TaskError::InvalidState {
                found: TaskState::from_u8(found),
                expected: from,
            })
    }
}

/// A task. Cloning yields another handle to the same task.
pub struct Task<W: TaskWork> {
    inner: Arc<TaskInner<W>>,
}

impl<W: TaskWork> Clone for Task<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: TaskWork> fmt::Debug for Task<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.inner.id)
            .field("stream_id", &self.inner.context.stream_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<W: TaskWork> Task<W> {
    /// Create a task in state `NEW`.
    pub fn new(
        work: W,
        context: TaskContext,
        limiter: Arc<TaskLimiter>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id: TASK_IDS.fetch_add(1, Ordering::Relaxed),
                context,
                state: AtomicU8::new(TaskState::New as u8),
                thread: Mutex::new(None),
                guarded: Mutex::new(Guarded {
                    internal: false,
                    listeners: Vec::new(),
                    work: Some(work),
                }),
                limiter,
                pool,
            }),
        }
    }

    /// Process-unique task id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The execution context.
    #[must_use]
    pub fn context(&self) -> &TaskContext {
        &self.inner.context
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.inner.state()
    }

    /// Whether the task bypasses the admission limit.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        self.inner.guarded.lock().internal
    }

    /// The worker thread the task is bound to while it runs.
    #[must_use]
    pub fn thread(&self) -> Option<ThreadId> {
        *self.inner.thread.lock()
    }

    fn ensure_new(&self) -> Result<(), TaskError> {
        let found = self.state();
        if found == TaskState::New {
            Ok(())
        } else {
            Err(TaskError::InvalidState {
                found,
                expected: TaskState::New,
            })
        }
    }

    /// Mark the task as internal so that it bypasses the admission limit.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidState`] unless the task is `NEW`.
    pub fn set_internal(&self, internal: bool) -> Result<(), TaskError> {
        let mut guarded = self.inner.guarded.lock();
        self.ensure_new()?;
        guarded.internal = internal;
        Ok(())
    }

    /// Register a listener. Adding the same listener again is a no-op and
    /// returns `false`.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidState`] unless the task is `NEW`, or
    /// [`TaskError::TooManyListeners`] once [`MAX_LISTENERS`] are registered.
    pub fn add_listener(&self, listener: Listener<W::Output>) -> Result<bool, TaskError> {
        let mut guarded = self.inner.guarded.lock();
        self.ensure_new()?;
        if guarded.listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            return Ok(false);
        }
        if guarded.listeners.len() >= MAX_LISTENERS {
            return Err(TaskError::TooManyListeners(MAX_LISTENERS));
        }
        guarded.listeners.push(listener);
        Ok(true)
    }

    /// Unregister a listener. Returns whether it was registered.
    ///
    /// # Errors
    ///
    /// [`TaskError::InvalidState`] unless the task is `NEW`.
    pub fn remove_listener(&self, listener: &Listener<W::Output>) -> Result<bool, TaskError> {
        let mut guarded = self.inner.guarded.lock();
        self.ensure_new()?;
        let before = guarded.listeners.len();
        guarded.listeners.retain(|l| !Arc::ptr_eq(l, listener));
        Ok(guarded.listeners.len() != before)
    }

    /// Admit the task and submit it to the worker pool.
    ///
    /// Never blocks on the work itself. If the pool rejects the job the slot is
    /// released and the task stays `NEW`.
    ///
    /// # Errors
    ///
    /// - [`TaskError::InvalidState`] unless the task is `NEW`
    /// - [`TaskError::TooManyTasks`] if admission control or the pool rejects it
    /// - [`TaskError::Pool`] if a worker could not be created
    pub fn start(&self) -> Result<TaskHandle<W::Output>, TaskError> {
        let guarded = self.inner.guarded.lock();
        self.ensure_new()?;

        let slot = self
            .inner
            .limiter
            .try_acquire(guarded.internal, self.inner.context.principal.as_deref())?;

        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let span = info_span!(
            "task",
            task_id = self.inner.id,
            stream_id = %self.inner.context.stream_id
        );
        let job = async move {
            let outcome = run(inner, slot).await;
            // The caller may have dropped its handle.
            let _ = tx.send(outcome);
        }
        .instrument(span);

        match self.inner.pool.submit(job) {
            Ok(()) => {
                self.inner.state.store(TaskState::Start as u8, Ordering::Release);
                drop(guarded);
                debug!(task_id = self.inner.id, "Task started");
                Ok(TaskHandle { rx: Some(rx) })
            }
            Err(PoolError::Saturated { .. } | PoolError::Shutdown) => {
                warn!(task_id = self.inner.id, "Worker pool rejected task");
                Err(TaskError::TooManyTasks(TooManyTasks::instance(
                    self.inner.limiter.limit(),
                )))
            }
            Err(e) => Err(TaskError::Pool(e)),
        }
    }

    /// Request cancellation. Running work is never preempted, so this always
    /// reports `false`.
    #[must_use]
    pub fn cancel(&self) -> bool {
        false
    }
}

/// Records the worker thread a task runs on; unbinds on drop.
struct ThreadBinding<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> ThreadBinding<'a> {
    fn bind<W: TaskWork>(inner: &'a TaskInner<W>) -> Result<Self, TaskError> {
        let mut thread = inner.thread.lock();
        if thread.is_some() {
            return Err(TaskError::InvalidState {
                found: inner.state(),
                expected: TaskState::Start,
            });
        }
        *thread = Some(thread::current().id());
        Ok(Self {
            slot: &inner.thread,
        })
    }
}

impl Drop for ThreadBinding<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

async fn run<W: TaskWork>(inner: Arc<TaskInner<W>>, slot: TaskSlot) -> TaskOutcome<W::Output> {
    let (work, listeners) = {
        let mut guarded = inner.guarded.lock();
        (guarded.work.take(), guarded.listeners.clone())
    };

    // `start` sets START under the guard the work is taken from, so the
    // refusals below only fire on a double hand-off. They still end in
    // listeners and DONE.
    let binding = ThreadBinding::bind(&inner);
    let outcome = match (work, &binding) {
        (None, _) => {
            error!("Task has no work to run");
            Err(TaskFault::Error("task work already consumed".into()))
        }
        (Some(_), Err(e)) => {
            error!(error = %e, "Task is already bound to a worker");
            Err(TaskFault::Error(e.to_string()))
        }
        (Some(mut work), Ok(_)) => match inner.advance(TaskState::Start, TaskState::Execute) {
            Ok(()) => execute(&inner, &mut work).await,
            Err(e) => {
                error!(error = %e, "Task was not started");
                Err(TaskFault::Error(e.to_string()))
            }
        },
    };

    inner
        .state
        .store(TaskState::CallingListener as u8, Ordering::Release);
    for (index, listener) in listeners.iter().enumerate() {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(&outcome))) {
            error!(listener = index, panic = %panic_message(&*panic), "Listener failed");
        }
    }
    inner.state.store(TaskState::Done as u8, Ordering::Release);

    drop(binding);
    drop(slot);
    debug!("Task done");
    outcome
}

async fn execute<W: TaskWork>(inner: &TaskInner<W>, work: &mut W) -> TaskOutcome<W::Output> {
    let ctx = &inner.context;
    let attempt = AssertUnwindSafe(async {
        work.init(ctx).await?;
        work.execute(ctx).await
    })
    .catch_unwind()
    .await;
    let outcome = match attempt {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(fault)) => error_response(work, ctx, fault),
        Err(panic) => error_response(work, ctx, TaskFault::Panic(panic_message(&*panic))),
    };
    if let Err(e) = inner.advance(TaskState::Execute, TaskState::CallingListener) {
        error!(error = %e, "Unexpected state after execution");
    }
    outcome
}

fn error_response<W: TaskWork>(
    work: &mut W,
    ctx: &TaskContext,
    fault: TaskFault,
) -> TaskOutcome<W::Output> {
    catch_unwind(AssertUnwindSafe(|| work.error_response(ctx, fault)))
        .unwrap_or_else(|panic| Err(TaskFault::Panic(panic_message(&*panic))))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned())
}

/// Receives the outcome of a started task.
#[derive(Debug)]
pub struct TaskHandle<O> {
    rx: Option<oneshot::Receiver<TaskOutcome<O>>>,
}

impl<O> TaskHandle<O> {
    fn resolve(received: Result<TaskOutcome<O>, oneshot::error::RecvError>) -> Result<O, TaskError> {
        match received {
            Ok(outcome) => outcome.map_err(TaskError::Failed),
            Err(_) => Err(TaskError::Lost),
        }
    }

    /// Wait for the outcome.
    ///
    /// # Errors
    ///
    /// [`TaskError::Failed`] if the task produced a fault, [`TaskError::Lost`]
    /// if the outcome was already taken or the worker vanished.
    pub async fn wait(mut self) -> Result<O, TaskError> {
        let Some(rx) = self.rx.take() else {
            return Err(TaskError::Lost);
        };
        Self::resolve(rx.await)
    }

    /// Block the current thread until the outcome arrives. Must not be called
    /// from inside an async runtime.
    ///
    /// # Errors
    ///
    /// Same as [`TaskHandle::wait`].
    pub fn wait_blocking(mut self) -> Result<O, TaskError> {
        let Some(rx) = self.rx.take() else {
            return Err(TaskError::Lost);
        };
        Self::resolve(rx.blocking_recv())
    }

    /// Wait at most `timeout`. On [`TaskError::Timeout`] the task keeps running
    /// and the handle can be waited on again.
    ///
    /// # Errors
    ///
    /// [`TaskError::Timeout`], or the errors of [`TaskHandle::wait`].
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<O, TaskError> {
        let Some(rx) = self.rx.as_mut() else {
            return Err(TaskError::Lost);
        };
        let received = tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| TaskError::Timeout)?;
        self.rx = None;
        Self::resolve(received)
    }
}
