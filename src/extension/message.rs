//! Messages exchanged between the hub and an extension process.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{Request, WireResult};

/// Identifies the handler an extension should run and its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerSpec {
    /// Handler id in the hub configuration.
    pub id: String,
    /// Name the extension registered the handler implementation under.
    pub class_name: String,
    /// Free-form handler properties.
    #[serde(default)]
    pub properties: Value,
}

impl HandlerSpec {
    /// Spec without properties.
    pub fn new(id: impl Into<String>, class_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            class_name: class_name.into(),
            properties: Value::Null,
        }
    }
}

/// One frame on the extension connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExtensionMessage {
    /// Hub to extension: run `handler` on `request`.
    ProcessEvent {
        /// The handler to run.
        handler: HandlerSpec,
        /// The request as seen at the bridge's position in the pipeline.
        request: Request,
        /// Principal of the task.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        principal: Option<String>,
    },
    /// Extension to hub: forward `request` up the hub's pipeline.
    SendUpstream {
        /// Request to forward.
        request: Request,
    },
    /// Either direction: the result for the last message sent by the peer.
    Response {
        /// The result.
        result: WireResult,
    },
}

impl ExtensionMessage {
    /// Message kind for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ProcessEvent { .. } => "process_event",
            Self::SendUpstream { .. } => "send_upstream",
            Self::Response { .. } => "response",
        }
    }
}
