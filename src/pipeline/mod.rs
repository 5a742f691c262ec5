//! Chain-of-responsibility request pipeline.
//!
//! A request enters at the first handler. Each handler may mutate it, answer it
//! itself, or forward it to the next handler through [`Event::send_upstream`].
//! The position of the next handler travels by value inside the [`Event`], so a
//! traversal never shares a mutable cursor.

mod task;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, trace};

use crate::core::TaskContext;
use crate::model::{ErrorKind, HubResult, Request};

pub use task::PipelineTask;

/// A pipeline stage.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handle the event, either answering it or forwarding it upstream.
    async fn process_event(&self, event: Event<'_>) -> HubResult;
}

/// Something that accepts forwarded requests on behalf of a remote handler.
#[async_trait]
pub trait UpstreamSink: Send + Sync {
    /// Forward `request` and return the result produced upstream.
    async fn send_upstream(&self, ctx: &TaskContext, request: Request) -> HubResult;
}

/// Pipeline construction error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// A pipeline needs at least one handler.
    #[error("pipeline requires at least one handler")]
    Empty,
    /// A configured handler references an extension that is not configured.
    #[error("handler `{handler}` references unknown extension `{extension}`")]
    UnknownExtension {
        /// Handler id.
        handler: String,
        /// Extension id.
        extension: String,
    },
}

#[derive(Clone, Copy)]
enum Upstream<'a> {
    Pipeline {
        pipeline: &'a EventPipeline,
        next: usize,
    },
    Remote(&'a dyn UpstreamSink),
}

/// The view a handler gets of one request in flight.
pub struct Event<'a> {
    request: Request,
    ctx: &'a TaskContext,
    upstream: Upstream<'a>,
}

impl fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let next = match self.upstream {
            Upstream::Pipeline { next, .. } => Some(next),
            Upstream::Remote(_) => None,
        };
        f.debug_struct("Event")
            .field("request", &self.request)
            .field("stream_id", &self.ctx.stream_id)
            .field("next", &next)
            .finish()
    }
}

impl<'a> Event<'a> {
    /// An event whose upstream is a remote peer rather than a local pipeline.
    pub fn remote(request: Request, ctx: &'a TaskContext, upstream: &'a dyn UpstreamSink) -> Self {
        Self {
            request,
            ctx,
            upstream: Upstream::Remote(upstream),
        }
    }

    /// The request.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// The request, for in-place rewriting before forwarding.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// Take the request out of the event.
    #[must_use]
    pub fn into_request(self) -> Request {
        self.request
    }

    /// The task context.
    #[must_use]
    pub const fn context(&self) -> &'a TaskContext {
        self.ctx
    }

    /// Send `request` to the next handler and wait for its result.
    ///
    /// May be called several times; every call starts at the same next handler.
    pub async fn send_upstream(&self, request: Request) -> HubResult {
        self.upstream.send(self.ctx, request).await
    }

    /// Forward this event's own request upstream.
    pub async fn forward(self) -> HubResult {
        self.upstream.send(self.ctx, self.request).await
    }
}

impl<'a> Upstream<'a> {
    async fn send(self, ctx: &'a TaskContext, request: Request) -> HubResult {
        match self {
            Upstream::Pipeline { pipeline, next } => pipeline.dispatch(ctx, request, next).await,
            Upstream::Remote(sink) => sink.send_upstream(ctx, request).await,
        }
    }
}

/// An ordered, non-empty list of handlers. The last one is the terminal
/// storage and never forwards.
#[derive(Clone)]
pub struct EventPipeline {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl fmt::Debug for EventPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|h| h.name()))
            .finish()
    }
}

impl EventPipeline {
    /// Create a pipeline.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Empty`] if `handlers` is empty.
    pub fn new(handlers: Vec<Arc<dyn EventHandler>>) -> Result<Self, PipelineError> {
        if handlers.is_empty() {
            return Err(PipelineError::Empty);
        }
        Ok(Self { handlers })
    }

    /// Number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether there are no handlers; never true for a constructed pipeline.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Handler names in order.
    #[must_use]
    pub fn handler_names(&self) -> Vec<&str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// Run `request` through the pipeline starting at the first handler.
    pub async fn send_upstream(&self, ctx: &TaskContext, request: Request) -> HubResult {
        debug!(
            stream_id = %ctx.stream_id,
            space = %request.space_id,
            op = request.op.name(),
            "Pipeline started"
        );
        self.dispatch(ctx, request, 0).await
    }

    fn dispatch<'a>(
        &'a self,
        ctx: &'a TaskContext,
        request: Request,
        index: usize,
    ) -> BoxFuture<'a, HubResult> {
        Box::pin(async move {
            let Some(handler) = self.handlers.get(index) else {
                return HubResult::error(
                    ErrorKind::Exception,
                    "end of pipeline reached without a result",
                )
                .with_stream_id(ctx.stream_id.clone());
            };
            trace!(stream_id = %ctx.stream_id, handler = handler.name(), index, "Invoking handler");
            let event = Event {
                request,
                ctx,
                upstream: Upstream::Pipeline {
                    pipeline: self,
                    next: index + 1,
                },
            };
            handler.process_event(event).await
        })
    }
}
