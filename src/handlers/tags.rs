use async_trait::async_trait;
use tracing::debug;

use crate::model::{HubResult, RequestOp};
use crate::pipeline::{Event, EventHandler};

/// Adds and removes fixed tags on every written feature, then forwards.
#[derive(Debug, Clone)]
pub struct TagHandler {
    id: String,
    add: Vec<String>,
    remove: Vec<String>,
}

impl TagHandler {
    /// Create the handler. Removal runs before addition.
    pub fn new(id: impl Into<String>, add: Vec<String>, remove: Vec<String>) -> Self {
        Self {
            id: id.into(),
            add,
            remove,
        }
    }
}

#[async_trait]
impl EventHandler for TagHandler {
    fn name(&self) -> &str {
        &self.id
    }

    async fn process_event(&self, mut event: Event<'_>) -> HubResult {
        if let RequestOp::Write { features, .. } = &mut event.request_mut().op {
            let mut changed = 0_usize;
            for feature in features.iter_mut() {
                for tag in &self.remove {
                    changed += usize::from(feature.remove_tag(tag));
                }
                for tag in &self.add {
                    changed += usize::from(feature.add_tag(tag));
                }
            }
            debug!(handler = %self.id, changed, "Tagged features");
        }
        event.forward().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskContext;
    use crate::handlers::EchoHandler;
    use crate::model::{Feature, Request, WriteMode};
    use crate::pipeline::EventPipeline;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_tags_written_features() {
        let mut feature = Feature::new("a");
        feature.add_tag("draft");
        let pipeline = EventPipeline::new(vec![
            Arc::new(TagHandler::new(
                "tags",
                vec!["reviewed".into(), "draft".into()],
                vec!["draft".into()],
            )) as Arc<dyn EventHandler>,
            Arc::new(EchoHandler::new("echo")) as Arc<dyn EventHandler>,
        ])
        .unwrap();
        let request = Request::new(
            "space",
            RequestOp::Write {
                features: vec![feature],
                mode: WriteMode::Create,
            },
        );

        let mut result = pipeline.send_upstream(&TaskContext::new("s"), request).await;
        let features = result.features();
        assert_eq!(features[0].tags(), ["reviewed", "draft"]);
    }
}
