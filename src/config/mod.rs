//! Configuration models for the hub, its worker pool, handlers and extensions.

pub mod hub;
pub mod pool;

pub use hub::{ExtensionConfig, HandlerConfig, HubConfig};
pub use pool::WorkerPoolConfig;
