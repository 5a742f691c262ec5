//! Extension side of the protocol: hosts handlers for a remote hub.
//!
//! Each accepted connection carries exactly one `ProcessEvent`. The named
//! handler runs with an [`Event`] whose upstream is the connection itself: a
//! forward becomes a `SendUpstream` frame answered by the hub's `Response`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

use super::message::ExtensionMessage;
use super::socket::{ExtensionSocket, SocketError};
use crate::core::TaskContext;
use crate::model::{ErrorKind, HubResult, Request};
use crate::pipeline::{Event, EventHandler, UpstreamSink};

/// Handlers an extension process offers, by class name.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `class_name`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, class_name: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(class_name.into(), handler);
        self
    }

    /// Look a handler up.
    #[must_use]
    pub fn get(&self, class_name: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(class_name)
    }

    /// Registered class names, sorted.
    #[must_use]
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// A running extension server.
pub struct ExtensionServer {
    local_addr: SocketAddr,
    accept_loop: JoinHandle<()>,
}

impl ExtensionServer {
    /// Bind `addr` and start accepting hub connections on the current runtime.
    ///
    /// # Errors
    ///
    /// Bind failure.
    pub async fn bind(addr: impl ToSocketAddrs, registry: HandlerRegistry) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, handlers = ?registry.class_names(), "Extension server listening");
        let registry = Arc::new(registry);
        let accept_loop = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(%peer, error = %e, "Could not disable Nagle");
                        }
                        let registry = Arc::clone(&registry);
                        tokio::spawn(serve_connection(ExtensionSocket::new(stream), registry));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
        });
        Ok(Self {
            local_addr,
            accept_loop,
        })
    }

    /// The bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. Connections in progress finish.
    pub fn shutdown(&self) {
        self.accept_loop.abort();
    }

    /// Run until the accept loop ends.
    pub async fn wait(mut self) {
        if let Err(e) = (&mut self.accept_loop).await {
            if !e.is_cancelled() {
                error!(error = %e, "Accept loop failed");
            }
        }
    }
}

impl Drop for ExtensionServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}

/// Upstream of a hosted handler: the hub on the other end of the connection.
struct HubUpstream {
    socket: Mutex<ExtensionSocket>,
}

#[async_trait]
impl UpstreamSink for HubUpstream {
    async fn send_upstream(&self, ctx: &TaskContext, request: Request) -> HubResult {
        let mut socket = self.socket.lock().await;
        let exchange = async {
            socket.send(&ExtensionMessage::SendUpstream { request }).await?;
            socket.receive().await
        };
        match exchange.await {
            Ok(ExtensionMessage::Response { result }) => result.into_result(),
            Ok(other) => {
                warn!(kind = other.kind(), "Hub answered a forward with an unexpected message");
                HubResult::error(ErrorKind::Exception, "Received invalid response from hub")
                    .with_stream_id(ctx.stream_id.clone())
            }
            Err(e) => HubResult::error(ErrorKind::Exception, format!("Communication to hub failed: {e}"))
                .with_stream_id(ctx.stream_id.clone()),
        }
    }
}

async fn serve_connection(mut socket: ExtensionSocket, registry: Arc<HandlerRegistry>) {
    let (handler, request, principal) = match socket.receive().await {
        Ok(ExtensionMessage::ProcessEvent {
            handler,
            request,
            principal,
        }) => (handler, request, principal),
        Ok(other) => {
            warn!(kind = other.kind(), "Expected process_event");
            return;
        }
        Err(SocketError::Closed) => return,
        Err(e) => {
            warn!(error = %e, "Reading process_event failed");
            return;
        }
    };

    let mut ctx = TaskContext::for_request(&request);
    ctx.principal = principal;
    let span = tracing::info_span!("extension_event", stream_id = %ctx.stream_id, handler = %handler.id);
    let upstream = HubUpstream {
        socket: Mutex::new(socket),
    };

    let result = async {
        match registry.get(&handler.class_name) {
            Some(hosted) => hosted.process_event(Event::remote(request, &ctx, &upstream)).await,
            None => HubResult::error(
                ErrorKind::NotFound,
                format!("No handler registered as {}", handler.class_name),
            )
            .with_stream_id(ctx.stream_id.clone()),
        }
    }
    .instrument(span)
    .await;

    let mut socket = upstream.socket.into_inner();
    if let Err(e) = socket
        .send(&ExtensionMessage::Response {
            result: result.into_wire(),
        })
        .await
    {
        warn!(error = %e, "Sending response to hub failed");
        return;
    }
    // Let the hub close first.
    match socket.receive().await {
        Err(SocketError::Closed) => {}
        Err(e) => debug!(error = %e, "Connection ended uncleanly"),
        Ok(other) => debug!(kind = other.kind(), "Ignoring frame after response"),
    }
}
