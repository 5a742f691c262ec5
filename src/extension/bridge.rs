//! Host side of the extension protocol.
//!
//! [`ExtensionHandler`] sits in a local pipeline like any other handler. For
//! each event it opens a connection to the extension, sends `ProcessEvent`, and
//! then serves the extension's `SendUpstream` requests from the local pipeline
//! until the terminal `Response` arrives. Every failure ends as an error result.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::message::{ExtensionMessage, HandlerSpec};
use super::socket::{ExtensionSocket, SocketError};
use crate::config::ExtensionConfig;
use crate::model::{ErrorKind, HubResult};
use crate::pipeline::{Event, EventHandler};

#[derive(Debug, Error)]
enum BridgeError {
    #[error("Unknown host: {host}")]
    UnknownHost { host: String },
    #[error("Communication to extension {extension} failed")]
    Communication {
        extension: String,
        #[source]
        source: SocketError,
    },
    #[error("Received invalid response from extension")]
    InvalidMessage,
    #[error("{0}")]
    Unexpected(String),
}

impl BridgeError {
    const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownHost { .. } | Self::Communication { .. } | Self::InvalidMessage => {
                ErrorKind::Exception
            }
            Self::Unexpected(_) => ErrorKind::IllegalArgument,
        }
    }
}

/// Pipeline handler that runs its logic in an extension process.
#[derive(Debug, Clone)]
pub struct ExtensionHandler {
    extension: String,
    config: ExtensionConfig,
    spec: HandlerSpec,
}

impl ExtensionHandler {
    /// Bridge to the handler `spec` hosted by extension `extension` at `config`.
    pub fn new(extension: impl Into<String>, config: ExtensionConfig, spec: HandlerSpec) -> Self {
        Self {
            extension: extension.into(),
            config,
            spec,
        }
    }

    /// The extension id.
    #[must_use]
    pub fn extension(&self) -> &str {
        &self.extension
    }

    fn communication(&self, source: SocketError) -> BridgeError {
        match source {
            SocketError::Malformed(_) => BridgeError::InvalidMessage,
            source => BridgeError::Communication {
                extension: self.extension.clone(),
                source,
            },
        }
    }

    async fn connect(&self) -> Result<ExtensionSocket, BridgeError> {
        let host = self.config.host.as_str();
        let unknown = || BridgeError::UnknownHost { host: host.to_owned() };
        let addr = tokio::net::lookup_host((host, self.config.port))
            .await
            .map_err(|_| unknown())?
            .next()
            .ok_or_else(unknown)?;
        debug!(extension = %self.extension, %addr, "Connecting to extension");
        ExtensionSocket::connect(addr, self.config.timeout())
            .await
            .map_err(|e| self.communication(e))
    }

    async fn exchange(&self, event: &Event<'_>) -> Result<HubResult, BridgeError> {
        let mut socket = self.connect().await?;
        socket
            .send(&ExtensionMessage::ProcessEvent {
                handler: self.spec.clone(),
                request: event.request().clone(),
                principal: event.context().principal.clone(),
            })
            .await
            .map_err(|e| match e {
                SocketError::Malformed(e) => BridgeError::Unexpected(e.to_string()),
                e => self.communication(e),
            })?;

        loop {
            match socket.receive().await.map_err(|e| self.communication(e))? {
                ExtensionMessage::Response { result } => {
                    if let Err(e) = socket.close().await {
                        debug!(extension = %self.extension, error = %e, "Closing extension connection failed");
                    }
                    return Ok(result.into_result());
                }
                ExtensionMessage::SendUpstream { request } => {
                    debug!(extension = %self.extension, op = request.op.name(), "Relaying upstream request");
                    let result = event.send_upstream(request).await.into_wire();
                    socket
                        .send(&ExtensionMessage::Response { result })
                        .await
                        .map_err(|e| self.communication(e))?;
                }
                other => {
                    info!(extension = %self.extension, kind = other.kind(), "Received invalid message from extension");
                    return Err(BridgeError::InvalidMessage);
                }
            }
        }
    }
}

#[async_trait]
impl EventHandler for ExtensionHandler {
    fn name(&self) -> &str {
        &self.spec.id
    }

    async fn process_event(&self, event: Event<'_>) -> HubResult {
        match self.exchange(&event).await {
            Ok(result) => result,
            Err(e) => {
                warn!(extension = %self.extension, error = %e, "Extension invocation failed");
                HubResult::error(e.kind(), e.to_string()).with_stream_id(event.context().stream_id.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let unknown = BridgeError::UnknownHost { host: "nowhere".into() };
        assert_eq!(unknown.to_string(), "Unknown host: nowhere");
        assert_eq!(unknown.kind(), ErrorKind::Exception);
        assert_eq!(BridgeError::Unexpected("x".into()).kind(), ErrorKind::IllegalArgument);

        let handler = ExtensionHandler::new(
            "ext-1",
            ExtensionConfig::new("localhost", 1),
            HandlerSpec::new("h", "echo"),
        );
        let err = handler.communication(SocketError::Closed);
        assert_eq!(err.to_string(), "Communication to extension ext-1 failed");
        let malformed = serde_json::from_str::<u8>("x").unwrap_err();
        assert!(matches!(
            handler.communication(SocketError::Malformed(malformed)),
            BridgeError::InvalidMessage
        ));
    }
}
