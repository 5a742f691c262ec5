//! Builders that assemble pipelines from configuration.

pub mod pipeline_builder;

pub use pipeline_builder::{build_handler, PipelineBuilder};
