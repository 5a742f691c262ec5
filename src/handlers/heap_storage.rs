//! Terminal in-memory storage.
//!
//! Spaces are ordered maps from feature id to feature behind a `RwLock`. The
//! storage checks the deadline before touching data and answers with
//! [`ErrorKind::Timeout`] once it is exhausted.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::core::TaskContext;
use crate::model::{
    AdminAction, BBox, ErrorKind, Feature, HubResult, PropertyFilter, Request, RequestOp,
    SuccessResult, WriteMode,
};
use crate::pipeline::{Event, EventHandler};

type Space = BTreeMap<String, Feature>;

/// In-memory storage. Never forwards.
#[derive(Debug, Default)]
pub struct HeapStorage {
    id: String,
    spaces: RwLock<HashMap<String, Space>>,
}

fn error(ctx: &TaskContext, kind: ErrorKind, message: impl Into<String>) -> HubResult {
    HubResult::error(kind, message).with_stream_id(ctx.stream_id.clone())
}

fn filtered<'a>(
    features: impl Iterator<Item = &'a Feature>,
    filter: Option<&'a PropertyFilter>,
) -> impl Iterator<Item = &'a Feature> {
    features.filter(move |f| filter.is_none_or(|filter| filter.matches(f)))
}

impl HeapStorage {
    /// Empty storage.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            spaces: RwLock::new(HashMap::new()),
        }
    }

    /// Storage with the given spaces already created.
    #[must_use]
    pub fn with_spaces<I, S>(self, spaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut map = self.spaces.write();
            for space in spaces {
                map.entry(space.into()).or_default();
            }
        }
        self
    }

    /// Number of features stored in `space`, `None` if it does not exist.
    #[must_use]
    pub fn count(&self, space: &str) -> Option<usize> {
        self.spaces.read().get(space).map(BTreeMap::len)
    }

    /// Execute a request directly.
    pub fn execute(&self, ctx: &TaskContext, request: Request) -> HubResult {
        if request.is_expired() || ctx.remaining().is_some_and(|left| left.is_zero()) {
            info!(storage = %self.id, stream_id = %ctx.stream_id, "Deadline exhausted");
            return error(ctx, ErrorKind::Timeout, "request deadline exhausted");
        }
        let space_id = request.space_id;
        debug!(storage = %self.id, space = %space_id, op = request.op.name(), "Executing request");
        match request.op {
            RequestOp::Admin { action } => self.admin(ctx, &space_id, action),
            RequestOp::ReadById { ids, filter } => {
                let spaces = self.spaces.read();
                let Some(space) = spaces.get(&space_id) else {
                    return error(ctx, ErrorKind::NotFound, format!("no such space: {space_id}"));
                };
                let features = filtered(ids.iter().filter_map(|id| space.get(id)), filter.as_ref())
                    .cloned()
                    .collect();
                HubResult::with_features(features)
            }
            RequestOp::ReadByBbox { bbox, filter, limit } => {
                let spaces = self.spaces.read();
                let Some(space) = spaces.get(&space_id) else {
                    return error(ctx, ErrorKind::NotFound, format!("no such space: {space_id}"));
                };
                let in_box = space
                    .values()
                    .filter(|f| f.bounds().is_some_and(|b: BBox| b.intersects(&bbox)));
                let features = filtered(in_box, filter.as_ref())
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect();
                HubResult::with_features(features)
            }
            RequestOp::Write { features, mode } => self.write(ctx, &space_id, features, mode),
            RequestOp::Delete { ids } => {
                let mut spaces = self.spaces.write();
                let Some(space) = spaces.get_mut(&space_id) else {
                    return error(ctx, ErrorKind::NotFound, format!("no such space: {space_id}"));
                };
                let deleted = ids.into_iter().filter(|id| space.remove(id).is_some()).collect();
                HubResult::Success(SuccessResult::default().with_deleted(deleted))
            }
        }
    }

    fn admin(&self, ctx: &TaskContext, space_id: &str, action: AdminAction) -> HubResult {
        let mut spaces = self.spaces.write();
        match action {
            AdminAction::CreateSpace => {
                if spaces.contains_key(space_id) {
                    return error(ctx, ErrorKind::Conflict, format!("space exists: {space_id}"));
                }
                spaces.insert(space_id.to_owned(), Space::new());
                info!(storage = %self.id, space = space_id, "Space created");
                HubResult::success()
            }
            AdminAction::DropSpace => match spaces.remove(space_id) {
                Some(space) => {
                    info!(storage = %self.id, space = space_id, features = space.len(), "Space dropped");
                    HubResult::Success(SuccessResult::default().with_deleted(space.into_keys().collect()))
                }
                None => error(ctx, ErrorKind::NotFound, format!("no such space: {space_id}")),
            },
            AdminAction::Maintain => {
                if spaces.contains_key(space_id) {
                    HubResult::success()
                } else {
                    error(ctx, ErrorKind::NotFound, format!("no such space: {space_id}"))
                }
            }
        }
    }

    fn write(
        &self,
        ctx: &TaskContext,
        space_id: &str,
        mut features: Vec<Feature>,
        mode: WriteMode,
    ) -> HubResult {
        let mut spaces = self.spaces.write();
        let Some(space) = spaces.get_mut(space_id) else {
            return error(ctx, ErrorKind::NotFound, format!("no such space: {space_id}"));
        };
        // Ids written earlier in the same batch count as existing.
        let mut batch = HashSet::with_capacity(features.len());
        for feature in &mut features {
            if feature.id.is_empty() {
                feature.id = uuid::Uuid::new_v4().to_string();
            }
            let exists = space.contains_key(&feature.id) || !batch.insert(feature.id.clone());
            match mode {
                WriteMode::Create if exists => {
                    return error(ctx, ErrorKind::Conflict, format!("feature exists: {}", feature.id));
                }
                WriteMode::Update if !exists => {
                    return error(ctx, ErrorKind::NotFound, format!("no such feature: {}", feature.id));
                }
                _ => {}
            }
        }

        let mut inserted = Vec::new();
        let mut updated = Vec::new();
        for feature in &features {
            if space.insert(feature.id.clone(), feature.clone()).is_some() {
                updated.push(feature.id.clone());
            } else {
                inserted.push(feature.id.clone());
            }
        }
        HubResult::Success(
            SuccessResult::default()
                .with_inserted(inserted)
                .with_updated(updated)
                .with_features(features),
        )
    }
}

#[async_trait]
impl EventHandler for HeapStorage {
    fn name(&self) -> &str {
        &self.id
    }

    async fn process_event(&self, event: Event<'_>) -> HubResult {
        let ctx = event.context();
        self.execute(ctx, event.into_request())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> TaskContext {
        TaskContext::new("s")
    }

    fn write(features: Vec<Feature>, mode: WriteMode) -> Request {
        Request::new("roads", RequestOp::Write { features, mode })
    }

    #[test]
    fn test_admin_lifecycle() {
        let storage = HeapStorage::new("heap");
        let create = Request::new("roads", RequestOp::Admin { action: AdminAction::CreateSpace });
        assert!(storage.execute(&ctx(), create.clone()).is_success());
        assert_eq!(
            storage.execute(&ctx(), create).error_kind(),
            Some(ErrorKind::Conflict)
        );
        let maintain = Request::new("roads", RequestOp::Admin { action: AdminAction::Maintain });
        assert!(storage.execute(&ctx(), maintain).is_success());
        let drop_space = Request::new("roads", RequestOp::Admin { action: AdminAction::DropSpace });
        assert!(storage.execute(&ctx(), drop_space.clone()).is_success());
        assert_eq!(
            storage.execute(&ctx(), drop_space).error_kind(),
            Some(ErrorKind::NotFound)
        );
    }

    #[test]
    fn test_write_modes() {
        let storage = HeapStorage::new("heap").with_spaces(["roads"]);
        let result = storage.execute(&ctx(), write(vec![Feature::new("a")], WriteMode::Create));
        assert_eq!(result.as_success().unwrap().inserted, ["a"]);

        let result = storage.execute(&ctx(), write(vec![Feature::new("a")], WriteMode::Create));
        assert_eq!(result.error_kind(), Some(ErrorKind::Conflict));

        let result = storage.execute(&ctx(), write(vec![Feature::new("b")], WriteMode::Update));
        assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(storage.count("roads"), Some(1));

        let result = storage.execute(
            &ctx(),
            write(vec![Feature::new("a"), Feature::new("")], WriteMode::Upsert),
        );
        let success = result.as_success().unwrap();
        assert_eq!(success.updated, ["a"]);
        assert_eq!(success.inserted.len(), 1);
        assert_eq!(storage.count("roads"), Some(2));
    }

    #[test]
    fn test_duplicate_ids_within_one_batch() {
        let storage = HeapStorage::new("heap").with_spaces(["roads"]);
        let result = storage.execute(
            &ctx(),
            write(vec![Feature::new("a"), Feature::new("a")], WriteMode::Create),
        );
        assert_eq!(result.error_kind(), Some(ErrorKind::Conflict));
        assert_eq!(storage.count("roads"), Some(0));

        // Update accepts a repeat of an id that exists.
        storage.execute(&ctx(), write(vec![Feature::new("b")], WriteMode::Create));
        let result = storage.execute(
            &ctx(),
            write(vec![Feature::new("b"), Feature::new("b")], WriteMode::Update),
        );
        assert_eq!(result.as_success().unwrap().updated, ["b", "b"]);

        let result = storage.execute(
            &ctx(),
            write(vec![Feature::new("c"), Feature::new("c")], WriteMode::Upsert),
        );
        let success = result.as_success().unwrap();
        assert_eq!(success.inserted, ["c"]);
        assert_eq!(success.updated, ["c"]);
    }

    #[test]
    fn test_reads_and_delete() {
        let storage = HeapStorage::new("heap").with_spaces(["roads"]);
        let features = vec![
            Feature::new("berlin")
                .with_point(13.4, 52.5)
                .with_property("kind", json!("city")),
            Feature::new("paris")
                .with_point(2.35, 48.85)
                .with_property("kind", json!("city")),
            Feature::new("no-geometry"),
        ];
        storage.execute(&ctx(), write(features, WriteMode::Upsert));

        let by_id = Request::new(
            "roads",
            RequestOp::ReadById {
                ids: vec!["paris".into(), "missing".into()],
                filter: None,
            },
        );
        let mut result = storage.execute(&ctx(), by_id);
        let ids: Vec<_> = result.features().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, ["paris"]);

        let by_box = Request::new(
            "roads",
            RequestOp::ReadByBbox {
                bbox: BBox::new(10.0, 50.0, 15.0, 55.0),
                filter: Some(PropertyFilter::Eq {
                    path: vec!["kind".into()],
                    value: json!("city"),
                }),
                limit: Some(10),
            },
        );
        let mut result = storage.execute(&ctx(), by_box);
        let ids: Vec<_> = result.features().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, ["berlin"]);

        let delete = Request::new(
            "roads",
            RequestOp::Delete {
                ids: vec!["berlin".into(), "missing".into()],
            },
        );
        let result = storage.execute(&ctx(), delete);
        assert_eq!(result.as_success().unwrap().deleted, ["berlin"]);
    }

    #[test]
    fn test_exhausted_deadline() {
        let storage = HeapStorage::new("heap").with_spaces(["roads"]);
        let mut request = write(vec![Feature::new("a")], WriteMode::Upsert);
        request.deadline_ms = Some(1);
        assert_eq!(
            storage.execute(&ctx(), request).error_kind(),
            Some(ErrorKind::Timeout)
        );
        assert_eq!(storage.count("roads"), Some(0));
    }
}
