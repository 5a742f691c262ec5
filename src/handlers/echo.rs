use async_trait::async_trait;
use tracing::info;

use crate::model::{ErrorKind, HubResult, RequestOp, SuccessResult};
use crate::pipeline::{Event, EventHandler};

/// Answers writes as if they had been persisted; never forwards.
///
/// Every written feature comes back as updated. Other requests are not
/// supported.
#[derive(Debug, Clone)]
pub struct EchoHandler {
    id: String,
}

impl EchoHandler {
    /// Create the handler.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl EventHandler for EchoHandler {
    fn name(&self) -> &str {
        &self.id
    }

    async fn process_event(&self, event: Event<'_>) -> HubResult {
        let stream_id = event.context().stream_id.clone();
        let request = event.into_request();
        info!(handler = %self.id, op = request.op.name(), "Echoing request");
        match request.op {
            RequestOp::Write { features, .. } => {
                let updated = features.iter().map(|f| f.id.clone()).collect();
                HubResult::Success(
                    SuccessResult::default()
                        .with_updated(updated)
                        .with_features(features),
                )
            }
            other => HubResult::error(
                ErrorKind::NotImplemented,
                format!("Unsupported request type in echo handler: {}", other.name()),
            )
            .with_stream_id(stream_id),
        }
    }
}
