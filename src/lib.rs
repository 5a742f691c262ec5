//! # GeoHub Core
//!
//! The request-execution substrate of a geospatial feature hub.
//!
//! Every client request becomes a [`core::Task`]: a one-shot unit of work
//! with a monotonic lifecycle, admission control against a global (and
//! optionally per-principal) in-flight limit, and completion listeners. A task
//! typically drives a request through an [`pipeline::EventPipeline`], an
//! ordered chain of handlers ending in a storage. Handlers either answer
//! directly or forward a possibly modified request to the next one.
//!
//! Handlers can also live in another process. An
//! [`extension::ExtensionHandler`] serializes the event, ships it to an
//! [`extension::ExtensionServer`] and relays any upstream calls the remote
//! handler makes back into the local pipeline.
//!
//! ## Running a request
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use geohub_core::builders::PipelineBuilder;
//! use geohub_core::config::HubConfig;
//! use geohub_core::core::{TaskContext, TaskScheduler};
//! use geohub_core::handlers::HeapStorage;
//! use geohub_core::pipeline::PipelineTask;
//!
//! let config = HubConfig::from_env()?;
//! let scheduler = TaskScheduler::from_config(&config)?;
//! let pipeline = Arc::new(PipelineBuilder::from_config(
//!     &config,
//!     Arc::new(HeapStorage::new("heap")),
//! )?);
//!
//! let ctx = TaskContext::for_request(&request);
//! let task = scheduler.task(PipelineTask::new(pipeline, request), ctx);
//! let result = task.start()?.wait().await?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Tasks, admission control, scheduling and auditing.
pub mod core;
/// Configuration models for the hub, pool, handlers and extensions.
pub mod config;
/// Builders that assemble pipelines from configuration.
pub mod builders;
/// Requests, results, features and cursors.
pub mod model;
/// Event handlers and the pipelines chaining them.
pub mod pipeline;
/// Out-of-process handlers and their wire protocol.
pub mod extension;
/// Built-in handlers and storage.
pub mod handlers;
/// Shared utilities.
pub mod util;
