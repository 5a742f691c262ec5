//! Requests submitted against a space.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::feature::{BBox, Feature};
use crate::util::clock::now_ms;

/// Property filter applied by reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PropertyFilter {
    /// Property at `path` equals `value`.
    Eq {
        /// Path below `properties`.
        path: Vec<String>,
        /// Expected value.
        value: Value,
    },
    /// Property at `path` is an array containing `value`, or equals it.
    Contains {
        /// Path below `properties`.
        path: Vec<String>,
        /// Expected element.
        value: Value,
    },
    /// Property at `path` exists.
    Exists {
        /// Path below `properties`.
        path: Vec<String>,
    },
    /// Feature carries the tag.
    TagExists {
        /// Tag name.
        tag: String,
    },
    /// All children match.
    And {
        /// Child filters.
        children: Vec<PropertyFilter>,
    },
    /// At least one child matches.
    Or {
        /// Child filters.
        children: Vec<PropertyFilter>,
    },
    /// The child does not match.
    Not {
        /// Negated filter.
        child: Box<PropertyFilter>,
    },
}

impl PropertyFilter {
    /// Evaluate the filter against a feature.
    #[must_use]
    pub fn matches(&self, feature: &Feature) -> bool {
        match self {
            Self::Eq { path, value } => feature.property(path) == Some(value),
            Self::Contains { path, value } => match feature.property(path) {
                Some(Value::Array(items)) => items.contains(value),
                Some(other) => other == value,
                None => false,
            },
            Self::Exists { path } => feature.property(path).is_some(),
            Self::TagExists { tag } => feature.has_tag(tag),
            Self::And { children } => children.iter().all(|c| c.matches(feature)),
            Self::Or { children } => children.iter().any(|c| c.matches(feature)),
            Self::Not { child } => !child.matches(feature),
        }
    }

    /// Child filters of a combinator; `None` for leaves.
    #[must_use]
    pub fn children_mut(&mut self) -> Option<&mut Vec<Self>> {
        match self {
            Self::And { children } | Self::Or { children } => Some(children),
            _ => None,
        }
    }
}

/// How a write treats existing features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Fail with a conflict if the feature exists.
    Create,
    /// Replace the feature if it exists, otherwise insert it.
    #[default]
    Upsert,
    /// Fail with not-found if the feature does not exist.
    Update,
}

/// Administrative actions on a space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    /// Create the backing collection.
    CreateSpace,
    /// Drop the backing collection and all its features.
    DropSpace,
    /// Run storage maintenance for the space.
    Maintain,
}

/// The operation a request performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestOp {
    /// Read features by id.
    ReadById {
        /// Feature ids.
        ids: Vec<String>,
        /// Optional property filter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<PropertyFilter>,
    },
    /// Read features intersecting a bounding box.
    ReadByBbox {
        /// Query window.
        bbox: BBox,
        /// Optional property filter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filter: Option<PropertyFilter>,
        /// Maximum number of features to return.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    /// Write features.
    Write {
        /// Features to write.
        features: Vec<Feature>,
        /// Conflict handling.
        #[serde(default)]
        mode: WriteMode,
    },
    /// Delete features by id.
    Delete {
        /// Feature ids.
        ids: Vec<String>,
    },
    /// Administrative action.
    Admin {
        /// Action to perform.
        action: AdminAction,
    },
}

impl RequestOp {
    /// Short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ReadById { .. } => "read_by_id",
            Self::ReadByBbox { .. } => "read_by_bbox",
            Self::Write { .. } => "write",
            Self::Delete { .. } => "delete",
            Self::Admin { .. } => "admin",
        }
    }

    /// The read filter, for read operations.
    pub fn filter_mut(&mut self) -> Option<&mut Option<PropertyFilter>> {
        match self {
            Self::ReadById { filter, .. } | Self::ReadByBbox { filter, .. } => Some(filter),
            _ => None,
        }
    }
}

/// A request against a space.
///
/// Handlers may mutate a request in place before forwarding it; a request is
/// never shared between tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Correlation id of the request stream.
    pub stream_id: String,
    /// Target space.
    pub space_id: String,
    /// Absolute deadline in milliseconds since epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// The operation.
    #[serde(flatten)]
    pub op: RequestOp,
}

impl Request {
    /// Create a request with a fresh stream id and no deadline.
    pub fn new(space_id: impl Into<String>, op: RequestOp) -> Self {
        Self {
            stream_id: uuid::Uuid::new_v4().to_string(),
            space_id: space_id.into(),
            deadline_ms: None,
            op,
        }
    }

    /// Override the stream id.
    #[must_use]
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        self.stream_id = stream_id.into();
        self
    }

    /// Set the deadline to `budget` from now.
    #[must_use]
    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        let budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX);
        self.deadline_ms = Some(now_ms().saturating_add(budget_ms));
        self
    }

    /// Time left before the deadline; `None` if the request has no deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline_ms
            .map(|deadline| Duration::from_millis(deadline.saturating_sub(now_ms())))
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|left| left.is_zero())
    }
}
