//! Integration tests for out-of-process handlers
//!
//! A real `ExtensionServer` is bound on an ephemeral local port and the hub
//! talks to it through `ExtensionHandler`s placed in local pipelines.

use async_trait::async_trait;
use geohub_core::config::ExtensionConfig;
use geohub_core::core::TaskContext;
use geohub_core::extension::{
    ExtensionHandler, ExtensionMessage, ExtensionServer, ExtensionSocket, HandlerRegistry,
    HandlerSpec,
};
use geohub_core::handlers::{EchoHandler, TagHandler};
use geohub_core::model::{ErrorKind, Feature, HubResult, Request, RequestOp, WriteMode};
use geohub_core::pipeline::{Event, EventHandler, EventPipeline};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// HELPERS
// ============================================================================

/// Local storage that records what reaches it.
#[derive(Default)]
struct RecordingStorage {
    seen: Mutex<Vec<Request>>,
}

#[async_trait]
impl EventHandler for RecordingStorage {
    fn name(&self) -> &str {
        "storage"
    }

    async fn process_event(&self, event: Event<'_>) -> HubResult {
        let request = event.into_request();
        let features = match &request.op {
            RequestOp::Write { features, .. } => features.clone(),
            _ => Vec::new(),
        };
        self.seen.lock().push(request);
        HubResult::with_features(features)
    }
}

async fn start_server() -> ExtensionServer {
    let registry = HandlerRegistry::new()
        .with("echo", Arc::new(EchoHandler::new("echo")))
        .with(
            "tagger",
            Arc::new(TagHandler::new("tagger", vec!["validated".into()], Vec::new())),
        );
    ExtensionServer::bind("127.0.0.1:0", registry).await.unwrap()
}

/// Hosted handler that writes twice through the hub before answering.
struct TwoStepWriter;

#[async_trait]
impl EventHandler for TwoStepWriter {
    fn name(&self) -> &str {
        "two-step"
    }

    async fn process_event(&self, event: Event<'_>) -> HubResult {
        for space in ["one", "two"] {
            let request = Request::new(
                space,
                RequestOp::Write {
                    features: vec![Feature::new(space)],
                    mode: WriteMode::Upsert,
                },
            );
            let result = event.send_upstream(request).await;
            if !result.is_success() {
                return result;
            }
        }
        HubResult::with_features(vec![Feature::new("final")])
    }
}

fn endpoint(server: &ExtensionServer) -> ExtensionConfig {
    let addr = server.local_addr();
    ExtensionConfig::new(addr.ip().to_string(), addr.port()).with_timeout(Duration::from_secs(5))
}

fn bridged(
    config: ExtensionConfig,
    class_name: &str,
    storage: &Arc<RecordingStorage>,
) -> EventPipeline {
    let bridge = ExtensionHandler::new("ext-1", config, HandlerSpec::new("remote", class_name));
    EventPipeline::new(vec![
        Arc::new(bridge) as Arc<dyn EventHandler>,
        Arc::clone(storage) as Arc<dyn EventHandler>,
    ])
    .unwrap()
}

fn write_request() -> Request {
    Request::new(
        "roads",
        RequestOp::Write {
            features: vec![Feature::new("a"), Feature::new("b")],
            mode: WriteMode::Upsert,
        },
    )
}

// ============================================================================
// ROUND TRIPS
// ============================================================================

#[tokio::test]
async fn test_immediate_response_from_extension() {
    let server = start_server().await;
    let storage = Arc::new(RecordingStorage::default());
    let pipeline = bridged(endpoint(&server), "echo", &storage);

    let request = write_request();
    let ctx = TaskContext::for_request(&request);
    let mut result = pipeline.send_upstream(&ctx, request).await;

    assert_eq!(result.as_success().unwrap().updated, ["a", "b"]);
    assert_eq!(result.features().len(), 2);
    assert!(storage.seen.lock().is_empty());
    server.shutdown();
}

#[tokio::test]
async fn test_remote_forward_reaches_local_storage_once() {
    let server = start_server().await;
    let storage = Arc::new(RecordingStorage::default());
    let pipeline = bridged(endpoint(&server), "tagger", &storage);

    let request = write_request();
    let ctx = TaskContext::for_request(&request);
    let mut result = pipeline.send_upstream(&ctx, request).await;
    assert!(result.is_success(), "{:?}", result.error_message());
    assert_eq!(result.features().len(), 2);

    let seen = storage.seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].stream_id, ctx.stream_id);
    let RequestOp::Write { features, .. } = &seen[0].op else {
        panic!("storage saw {:?}", seen[0].op);
    };
    assert!(features.iter().all(|f| f.has_tag("validated")));
    drop(seen);
    server.shutdown();
}

#[tokio::test]
async fn test_unknown_class_name_is_not_found() {
    let server = start_server().await;
    let storage = Arc::new(RecordingStorage::default());
    let pipeline = bridged(endpoint(&server), "does.not.Exist", &storage);

    let request = write_request();
    let ctx = TaskContext::for_request(&request);
    let result = pipeline.send_upstream(&ctx, request).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));
    assert!(storage.seen.lock().is_empty());
    server.shutdown();
}

#[tokio::test]
async fn test_sequential_invocations_use_fresh_connections() {
    let server = start_server().await;
    let storage = Arc::new(RecordingStorage::default());
    let pipeline = bridged(endpoint(&server), "tagger", &storage);

    for _ in 0..3 {
        let request = write_request();
        let ctx = TaskContext::for_request(&request);
        assert!(pipeline.send_upstream(&ctx, request).await.is_success());
    }
    assert_eq!(storage.seen.lock().len(), 3);
    server.shutdown();
}

#[tokio::test]
async fn test_repeated_send_upstream_reaches_storage_in_order() {
    let registry = HandlerRegistry::new().with("two-step", Arc::new(TwoStepWriter));
    let server = ExtensionServer::bind("127.0.0.1:0", registry).await.unwrap();
    let storage = Arc::new(RecordingStorage::default());
    let pipeline = bridged(endpoint(&server), "two-step", &storage);

    let request = write_request();
    let ctx = TaskContext::for_request(&request);
    let mut result = pipeline.send_upstream(&ctx, request).await;
    assert!(result.is_success(), "{:?}", result.error_message());
    let ids: Vec<_> = result.features().iter().map(|f| f.id.clone()).collect();
    assert_eq!(ids, ["final"]);

    let spaces: Vec<_> = storage
        .seen
        .lock()
        .iter()
        .map(|request| request.space_id.clone())
        .collect();
    assert_eq!(spaces, ["one", "two"]);
    server.shutdown();
}

// ============================================================================
// FAILURES
// ============================================================================

#[tokio::test]
async fn test_unknown_host_is_an_error_result() {
    let storage = Arc::new(RecordingStorage::default());
    let config = ExtensionConfig::new("nonexistent.invalid", 7070).with_timeout(Duration::from_secs(2));
    let pipeline = bridged(config, "echo", &storage);

    let request = write_request();
    let ctx = TaskContext::for_request(&request);
    let result = pipeline.send_upstream(&ctx, request).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Exception));
    assert!(result
        .error_message()
        .is_some_and(|message| message.starts_with("Unknown host")));
}

#[tokio::test]
async fn test_refused_connection_is_communication_failure() {
    // Bind and drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let storage = Arc::new(RecordingStorage::default());
    let config = ExtensionConfig::new("127.0.0.1", port).with_timeout(Duration::from_secs(2));
    let pipeline = bridged(config, "echo", &storage);

    let request = write_request();
    let ctx = TaskContext::for_request(&request);
    let result = pipeline.send_upstream(&ctx, request).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Exception));
    assert_eq!(
        result.error_message(),
        Some("Communication to extension ext-1 failed")
    );
}

#[tokio::test]
async fn test_unexpected_message_from_extension_is_invalid_response() {
    // A peer that answers process_event by sending it straight back.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let peer = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut socket = ExtensionSocket::new(stream);
        let message = socket.receive().await.unwrap();
        assert!(matches!(message, ExtensionMessage::ProcessEvent { .. }));
        socket.send(&message).await.unwrap();
        // Hold the connection until the hub hangs up.
        let _ = socket.receive().await;
    });

    let storage = Arc::new(RecordingStorage::default());
    let config = ExtensionConfig::new("127.0.0.1", port).with_timeout(Duration::from_secs(5));
    let pipeline = bridged(config, "echo", &storage);

    let request = write_request();
    let ctx = TaskContext::for_request(&request);
    let result = pipeline.send_upstream(&ctx, request).await;
    assert_eq!(result.error_kind(), Some(ErrorKind::Exception));
    assert_eq!(
        result.error_message(),
        Some("Received invalid response from extension")
    );
    assert!(storage.seen.lock().is_empty());
    drop(pipeline);
    peer.await.unwrap();
}
