//! Standalone extension process hosting the built-in handlers.
//!
//! Listens on `GEOHUB_EXTENSION_ADDR` (default `127.0.0.1:7070`) and serves
//! `ProcessEvent` requests from a hub until interrupted.

use std::sync::Arc;

use anyhow::Context;
use geohub_core::extension::{ExtensionServer, HandlerRegistry};
use geohub_core::handlers::{EchoHandler, SourceIdHandler};
use geohub_core::util::init_tracing;
use tracing::info;

const ENV_ADDR: &str = "GEOHUB_EXTENSION_ADDR";
const DEFAULT_ADDR: &str = "127.0.0.1:7070";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let addr = std::env::var(ENV_ADDR).unwrap_or_else(|_| DEFAULT_ADDR.to_owned());
    let registry = HandlerRegistry::new()
        .with("echo", Arc::new(EchoHandler::new("echo")))
        .with("source_id", Arc::new(SourceIdHandler::new("source_id")));

    let server = ExtensionServer::bind(addr.as_str(), registry)
        .await
        .with_context(|| format!("binding extension server on {addr}"))?;
    info!(local_addr = %server.local_addr(), "Extension ready");

    tokio::select! {
        () = server.wait() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            info!("Shutting down");
        }
    }
    Ok(())
}
