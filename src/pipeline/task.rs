use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::EventPipeline;
use crate::core::{TaskContext, TaskFault, TaskWork};
use crate::model::{ErrorKind, HubResult, Request};

/// Task work that runs one request through a pipeline.
///
/// Faults are always turned into an [`ErrorKind::Exception`] result, so a
/// started pipeline task resolves to a [`HubResult`].
#[derive(Debug)]
pub struct PipelineTask {
    pipeline: Arc<EventPipeline>,
    request: Option<Request>,
}

impl PipelineTask {
    /// Work that sends `request` through `pipeline`.
    #[must_use]
    pub const fn new(pipeline: Arc<EventPipeline>, request: Request) -> Self {
        Self {
            pipeline,
            request: Some(request),
        }
    }
}

#[async_trait]
impl TaskWork for PipelineTask {
    type Output = HubResult;

    async fn init(&mut self, ctx: &TaskContext) -> Result<(), TaskFault> {
        match &self.request {
            Some(request) if request.stream_id != ctx.stream_id => Err(TaskFault::Error(format!(
                "request stream {} does not match task stream {}",
                request.stream_id, ctx.stream_id
            ))),
            Some(_) => Ok(()),
            None => Err(TaskFault::Error("request already consumed".into())),
        }
    }

    async fn execute(&mut self, ctx: &TaskContext) -> Result<HubResult, TaskFault> {
        let request = self
            .request
            .take()
            .ok_or_else(|| TaskFault::Error("request already consumed".into()))?;
        Ok(self.pipeline.send_upstream(ctx, request).await)
    }

    fn error_response(&mut self, ctx: &TaskContext, fault: TaskFault) -> Result<HubResult, TaskFault> {
        warn!(stream_id = %ctx.stream_id, error = %fault, "Pipeline task failed");
        Ok(HubResult::error(ErrorKind::Exception, fault.to_string()).with_stream_id(ctx.stream_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkerPoolConfig;
    use crate::core::{TaskLimiter, TaskScheduler, WorkerPool};
    use crate::pipeline::{Event, EventHandler};
    use crate::model::{AdminAction, RequestOp};

    struct Boom;

    #[async_trait]
    impl EventHandler for Boom {
        fn name(&self) -> &str {
            "boom"
        }

        async fn process_event(&self, _event: Event<'_>) -> HubResult {
            panic!("handler exploded")
        }
    }

    struct Ok200;

    #[async_trait]
    impl EventHandler for Ok200 {
        fn name(&self) -> &str {
            "ok"
        }

        async fn process_event(&self, _event: Event<'_>) -> HubResult {
            HubResult::success()
        }
    }

    fn scheduler() -> TaskScheduler {
        TaskScheduler::new(
            Arc::new(TaskLimiter::new(10)),
            Arc::new(WorkerPool::new(WorkerPoolConfig::new()).unwrap()),
        )
    }

    fn request() -> Request {
        Request::new("space", RequestOp::Admin { action: AdminAction::CreateSpace })
    }

    #[test]
    fn test_runs_pipeline() {
        let pipeline = Arc::new(EventPipeline::new(vec![Arc::new(Ok200) as Arc<dyn EventHandler>]).unwrap());
        let request = request();
        let ctx = TaskContext::for_request(&request);
        let task = scheduler().task(PipelineTask::new(pipeline, request), ctx);
        let result = task.start().unwrap().wait_blocking().unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn test_panicking_handler_becomes_error_result() {
        let pipeline = Arc::new(EventPipeline::new(vec![Arc::new(Boom) as Arc<dyn EventHandler>]).unwrap());
        let request = request();
        let ctx = TaskContext::for_request(&request);
        let stream_id = ctx.stream_id.clone();
        let task = scheduler().task(PipelineTask::new(pipeline, request), ctx);
        let result = task.start().unwrap().wait_blocking().unwrap();
        assert_eq!(result.error_kind(), Some(ErrorKind::Exception));
        assert_eq!(result.error_message(), Some("task panicked: handler exploded"));
        match &result {
            HubResult::Error(err) => assert_eq!(err.stream_id.as_deref(), Some(stream_id.as_str())),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_mismatched_stream_fails_init() {
        let pipeline = Arc::new(EventPipeline::new(vec![Arc::new(Ok200) as Arc<dyn EventHandler>]).unwrap());
        let task = scheduler().task(PipelineTask::new(pipeline, request()), TaskContext::new("other"));
        let result = task.start().unwrap().wait_blocking().unwrap();
        assert!(result.error_message().unwrap().contains("does not match"));
    }
}
