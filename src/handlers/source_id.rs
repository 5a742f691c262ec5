//! Maps client source ids onto tags.
//!
//! Writes: a feature carrying `@ns:com:here:mom:meta.sourceId = X` gets every
//! `xyz_source_id_*` tag replaced by `xyz_source_id_X`. Reads: `Eq` and
//! `Contains` filters on that property are rewritten into tag-exists filters,
//! so storages only need to index tags.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::model::feature::{META_NS, SOURCE_ID};
use crate::model::{HubResult, PropertyFilter, RequestOp};
use crate::pipeline::{Event, EventHandler};

/// Prefix of tags derived from source ids.
pub const TAG_PREFIX: &str = "xyz_source_id_";

/// Source-id rewriting handler. Always forwards.
#[derive(Debug, Clone)]
pub struct SourceIdHandler {
    id: String,
}

impl SourceIdHandler {
    /// Create the handler.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

fn is_source_id_path(path: &[String]) -> bool {
    let path = match path.split_first() {
        Some((first, rest)) if first == "properties" => rest,
        _ => path,
    };
    matches!(path, [ns, key] if ns == META_NS && key == SOURCE_ID)
}

fn source_id_tag(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(format!("{TAG_PREFIX}{s}")),
        other => Some(format!("{TAG_PREFIX}{other}")),
    }
}

/// Rewrite source-id filters in `filter` into tag filters, recursively.
/// Returns how many filters were rewritten.
pub fn rewrite_filter(filter: &mut PropertyFilter) -> usize {
    let replacement = match filter {
        PropertyFilter::Eq { path, value } | PropertyFilter::Contains { path, value }
            if is_source_id_path(path) =>
        {
            source_id_tag(value).map(|tag| PropertyFilter::TagExists { tag })
        }
        PropertyFilter::Not { child } => return rewrite_filter(child),
        _ => None,
    };
    if let Some(replacement) = replacement {
        *filter = replacement;
        return 1;
    }
    filter
        .children_mut()
        .map_or(0, |children| children.iter_mut().map(rewrite_filter).sum())
}

#[async_trait]
impl EventHandler for SourceIdHandler {
    fn name(&self) -> &str {
        &self.id
    }

    async fn process_event(&self, mut event: Event<'_>) -> HubResult {
        let request = event.request_mut();
        let op = request.op.name();
        match &mut request.op {
            RequestOp::Write { features, .. } => {
                for feature in features.iter_mut() {
                    if let Some(source_id) = feature.source_id() {
                        feature.remove_tags_with_prefix(TAG_PREFIX);
                        feature.add_tag(&format!("{TAG_PREFIX}{source_id}"));
                    }
                }
            }
            other => {
                if let Some(Some(filter)) = other.filter_mut() {
                    let rewritten = rewrite_filter(filter);
                    debug!(handler = %self.id, op, rewritten, "Rewrote source id filters");
                }
            }
        }
        event.forward().await
    }
}
