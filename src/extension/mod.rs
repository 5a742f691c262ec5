//! Out-of-process handlers.
//!
//! The wire protocol has three messages: `ProcessEvent` (hub to extension),
//! `SendUpstream` (extension to hub) and `Response` (either direction), framed
//! as one JSON object per line over a TCP connection opened per invocation.

pub mod bridge;
pub mod message;
pub mod server;
pub mod socket;

pub use bridge::ExtensionHandler;
pub use message::{ExtensionMessage, HandlerSpec};
pub use server::{ExtensionServer, HandlerRegistry};
pub use socket::{ExtensionSocket, SocketError};
