//! Builds event pipelines from handler configuration.

use std::sync::Arc;

use tracing::debug;

use crate::config::{HandlerConfig, HubConfig};
use crate::extension::{ExtensionHandler, HandlerSpec};
use crate::handlers::{EchoHandler, SourceIdHandler, TagHandler};
use crate::pipeline::{EventHandler, EventPipeline, PipelineError};

/// Instantiate one configured handler.
///
/// # Errors
///
/// [`PipelineError::UnknownExtension`] if an extension handler references an
/// extension missing from `hub`.
pub fn build_handler(
    config: &HandlerConfig,
    hub: &HubConfig,
) -> Result<Arc<dyn EventHandler>, PipelineError> {
    let handler: Arc<dyn EventHandler> = match config {
        HandlerConfig::SourceId { id } => Arc::new(SourceIdHandler::new(id.clone())),
        HandlerConfig::Tags { id, add, remove } => {
            Arc::new(TagHandler::new(id.clone(), add.clone(), remove.clone()))
        }
        HandlerConfig::Echo { id } => Arc::new(EchoHandler::new(id.clone())),
        HandlerConfig::Extension {
            id,
            extension,
            class_name,
            properties,
        } => {
            let endpoint = hub.extensions.get(extension).ok_or_else(|| {
                PipelineError::UnknownExtension {
                    handler: id.clone(),
                    extension: extension.clone(),
                }
            })?;
            let spec = HandlerSpec {
                id: id.clone(),
                class_name: class_name.clone(),
                properties: properties.clone(),
            };
            Arc::new(ExtensionHandler::new(extension.clone(), endpoint.clone(), spec))
        }
    };
    Ok(handler)
}

/// Assembles a pipeline: configured handlers first, the storage last.
pub struct PipelineBuilder<'a> {
    hub: &'a HubConfig,
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl<'a> PipelineBuilder<'a> {
    /// Start an empty pipeline resolving extensions against `hub`.
    #[must_use]
    pub const fn new(hub: &'a HubConfig) -> Self {
        Self {
            hub,
            handlers: Vec::new(),
        }
    }

    /// Append the configured handlers.
    ///
    /// # Errors
    ///
    /// See [`build_handler`].
    pub fn with_configured(mut self, configs: &[HandlerConfig]) -> Result<Self, PipelineError> {
        for config in configs {
            self.handlers.push(build_handler(config, self.hub)?);
        }
        Ok(self)
    }

    /// Append an already built handler.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Append the terminal storage and build.
    ///
    /// # Errors
    ///
    /// Propagates [`EventPipeline::new`] failures.
    pub fn build(mut self, storage: Arc<dyn EventHandler>) -> Result<EventPipeline, PipelineError> {
        self.handlers.push(storage);
        let pipeline = EventPipeline::new(self.handlers)?;
        debug!(handlers = ?pipeline.handler_names(), "Pipeline built");
        Ok(pipeline)
    }

    /// The hub's default chain in front of `storage`.
    ///
    /// # Errors
    ///
    /// See [`build_handler`].
    pub fn from_config(
        hub: &'a HubConfig,
        storage: Arc<dyn EventHandler>,
    ) -> Result<EventPipeline, PipelineError> {
        Self::new(hub).with_configured(&hub.handlers)?.build(storage)
    }
}
