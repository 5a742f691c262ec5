//! Outcome of a request.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::cursor::{FeatureCursor, HeapCacheCursor};
use super::feature::Feature;

/// Classification of an error result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Unclassified failure.
    Exception,
    /// The request was malformed or referenced something invalid.
    IllegalArgument,
    /// The handler does not support the request.
    NotImplemented,
    /// The addressed space or feature does not exist.
    NotFound,
    /// The principal may not perform the request.
    Forbidden,
    /// A write conflicted with the current state.
    Conflict,
    /// The request deadline was exhausted.
    Timeout,
    /// Too many concurrent requests; retry later.
    TooManyRequests,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exception => "Exception",
            Self::IllegalArgument => "IllegalArgument",
            Self::NotImplemented => "NotImplemented",
            Self::NotFound => "NotFound",
            Self::Forbidden => "Forbidden",
            Self::Conflict => "Conflict",
            Self::Timeout => "Timeout",
            Self::TooManyRequests => "TooManyRequests",
        };
        f.write_str(name)
    }
}

/// Successful outcome, optionally carrying a cursor over produced features.
#[derive(Default)]
pub struct SuccessResult {
    /// Identifiers of inserted features.
    pub inserted: Vec<String>,
    /// Identifiers of updated features.
    pub updated: Vec<String>,
    /// Identifiers of deleted features.
    pub deleted: Vec<String>,
    cursor: Option<Box<dyn FeatureCursor>>,
}

impl fmt::Debug for SuccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuccessResult")
            .field("inserted", &self.inserted)
            .field("updated", &self.updated)
            .field("deleted", &self.deleted)
            .field("has_cursor", &self.cursor.is_some())
            .finish()
    }
}

impl SuccessResult {
    /// Record inserted ids.
    #[must_use]
    pub fn with_inserted(mut self, ids: Vec<String>) -> Self {
        self.inserted = ids;
        self
    }

    /// Record updated ids.
    #[must_use]
    pub fn with_updated(mut self, ids: Vec<String>) -> Self {
        self.updated = ids;
        self
    }

    /// Record deleted ids.
    #[must_use]
    pub fn with_deleted(mut self, ids: Vec<String>) -> Self {
        self.deleted = ids;
        self
    }

    /// Attach a cursor, closing any cursor attached before.
    #[must_use]
    pub fn with_cursor(mut self, cursor: Box<dyn FeatureCursor>) -> Self {
        if let Some(mut old) = self.cursor.replace(cursor) {
            old.close();
        }
        self
    }

    /// Attach an in-memory cursor over the given features.
    #[must_use]
    pub fn with_features(self, features: Vec<Feature>) -> Self {
        self.with_cursor(Box::new(HeapCacheCursor::new(features)))
    }
}

/// Error outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResult {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Stream the failed request belonged to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_id: Option<String>,
}

/// Outcome of a request.
///
/// A result owns at most one open cursor and must be closed once consumed;
/// dropping it closes the cursor as well.
#[derive(Debug)]
pub enum HubResult {
    /// The request succeeded.
    Success(SuccessResult),
    /// The request failed.
    Error(ErrorResult),
    /// No outcome yet; used while orchestrating the extension protocol.
    NoResult,
}

impl HubResult {
    /// A success without ids or cursor.
    #[must_use]
    pub fn success() -> Self {
        Self::Success(SuccessResult::default())
    }

    /// A success with an in-memory cursor over `features`.
    #[must_use]
    pub fn with_features(features: Vec<Feature>) -> Self {
        Self::Success(SuccessResult::default().with_features(features))
    }

    /// An error result.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error(ErrorResult {
            kind,
            message: message.into(),
            stream_id: None,
        })
    }

    /// Tag an error result with the stream id of its request.
    #[must_use]
    pub fn with_stream_id(mut self, stream_id: impl Into<String>) -> Self {
        if let Self::Error(err) = &mut self {
            err.stream_id = Some(stream_id.into());
        }
        self
    }

    /// Whether this is an error result.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Whether this is a success result.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The error kind, for error results.
    #[must_use]
    pub const fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Error(err) => Some(err.kind),
            _ => None,
        }
    }

    /// The error message, for error results.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Error(err) => Some(err.message.as_str()),
            _ => None,
        }
    }

    /// Borrow the success part.
    #[must_use]
    pub const fn as_success(&self) -> Option<&SuccessResult> {
        match self {
            Self::Success(success) => Some(success),
            _ => None,
        }
    }

    /// Whether a cursor is attached.
    #[must_use]
    pub const fn has_cursor(&self) -> bool {
        matches!(self, Self::Success(SuccessResult { cursor: Some(_), .. }))
    }

    /// Borrow the attached cursor.
    pub fn cursor_mut(&mut self) -> Option<&mut (dyn FeatureCursor + 'static)> {
        match self {
            Self::Success(success) => success.cursor.as_deref_mut(),
            _ => None,
        }
    }

    /// Detach the cursor; the caller becomes responsible for closing it.
    pub fn take_cursor(&mut self) -> Option<Box<dyn FeatureCursor>> {
        match self {
            Self::Success(success) => success.cursor.take(),
            _ => None,
        }
    }

    /// Drain the remaining features of the cursor, then close it.
    pub fn features(&mut self) -> Vec<Feature> {
        let Some(mut cursor) = self.take_cursor() else {
            return Vec::new();
        };
        let features = std::iter::from_fn(|| cursor.next_feature()).collect();
        cursor.close();
        features
    }

    /// Close the result, releasing the cursor. Safe to call on any variant and
    /// more than once.
    pub fn close(&mut self) {
        if let Some(mut cursor) = self.take_cursor() {
            cursor.close();
        }
    }

    /// Convert into the serializable wire form, draining the cursor.
    #[must_use]
    pub fn into_wire(mut self) -> WireResult {
        let features = self.has_cursor().then(|| self.features());
        match &mut self {
            Self::Success(success) => WireResult::Success {
                inserted: std::mem::take(&mut success.inserted),
                updated: std::mem::take(&mut success.updated),
                deleted: std::mem::take(&mut success.deleted),
                features,
            },
            Self::Error(err) => WireResult::Error(err.clone()),
            Self::NoResult => WireResult::NoResult,
        }
    }
}

impl Drop for HubResult {
    fn drop(&mut self) {
        self.close();
    }
}

impl From<ErrorResult> for HubResult {
    fn from(err: ErrorResult) -> Self {
        Self::Error(err)
    }
}

/// Serializable form of a [`HubResult`], used on the extension wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireResult {
    /// Success with ids and the materialized features.
    Success {
        /// Identifiers of inserted features.
        #[serde(default)]
        inserted: Vec<String>,
        /// Identifiers of updated features.
        #[serde(default)]
        updated: Vec<String>,
        /// Identifiers of deleted features.
        #[serde(default)]
        deleted: Vec<String>,
        /// Features of the cursor, absent if the result had none.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        features: Option<Vec<Feature>>,
    },
    /// Error result.
    Error(ErrorResult),
    /// No outcome.
    NoResult,
}

impl WireResult {
    /// Rebuild a result; features come back behind a [`HeapCacheCursor`].
    #[must_use]
    pub fn into_result(self) -> HubResult {
        match self {
            Self::Success {
                inserted,
                updated,
                deleted,
                features,
            } => {
                let success = SuccessResult {
                    inserted,
                    updated,
                    deleted,
                    cursor: None,
                };
                HubResult::Success(match features {
                    Some(features) => success.with_features(features),
                    None => success,
                })
            }
            Self::Error(err) => HubResult::Error(err),
            Self::NoResult => HubResult::NoResult,
        }
    }
}
