//! Hub configuration: admission limits, worker pool, handler chain and
//! extension endpoints.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::pool::WorkerPoolConfig;
use crate::core::error::AppResult;
use crate::core::limiter::TaskLimiter;

const DEFAULT_EXTENSION_TIMEOUT_MS: u64 = 30_000;

/// Environment variable naming a JSON config file.
pub const ENV_CONFIG_FILE: &str = "GEOHUB_CONFIG";
/// Environment variable overriding `max_concurrent_tasks`.
pub const ENV_MAX_TASKS: &str = "GEOHUB_MAX_TASKS";
/// Environment variable overriding `max_tasks_per_principal`.
pub const ENV_MAX_TASKS_PER_PRINCIPAL: &str = "GEOHUB_MAX_TASKS_PER_PRINCIPAL";
/// Environment variable naming a JSON file with extension endpoints by id.
pub const ENV_EXTENSIONS_FILE: &str = "GEOHUB_EXTENSIONS_FILE";

fn default_max_tasks() -> u64 {
    TaskLimiter::default_limit()
}

const fn default_extension_timeout_ms() -> u64 {
    DEFAULT_EXTENSION_TIMEOUT_MS
}

/// Endpoint of an out-of-process extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionConfig {
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Connect and read timeout in milliseconds.
    #[serde(default = "default_extension_timeout_ms")]
    pub timeout_ms: u64,
}

impl ExtensionConfig {
    /// Create an endpoint with the default timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: DEFAULT_EXTENSION_TIMEOUT_MS,
        }
    }

    /// Override the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Timeout as a duration.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host must not be empty".into());
        }
        if self.port == 0 {
            return Err("port must be greater than 0".into());
        }
        if self.timeout_ms == 0 {
            return Err("timeout_ms must be greater than 0".into());
        }
        Ok(())
    }
}

/// One stage of a handler chain. The terminal storage is not configured here;
/// it is supplied when the pipeline is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandlerConfig {
    /// Rewrites source ids into tags.
    SourceId {
        /// Handler id.
        id: String,
    },
    /// Adds and removes tags on written features.
    Tags {
        /// Handler id.
        id: String,
        /// Tags to add.
        #[serde(default)]
        add: Vec<String>,
        /// Tags to remove.
        #[serde(default)]
        remove: Vec<String>,
    },
    /// Short-circuits writes, echoing the features back.
    Echo {
        /// Handler id.
        id: String,
    },
    /// A handler running in an extension process.
    Extension {
        /// Handler id.
        id: String,
        /// Key into [`HubConfig::extensions`].
        extension: String,
        /// Name the extension registered the handler under.
        class_name: String,
        /// Free-form handler properties shipped with every event.
        #[serde(default)]
        properties: Value,
    },
}

impl HandlerConfig {
    /// The handler id.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::SourceId { id }
            | Self::Tags { id, .. }
            | Self::Echo { id }
            | Self::Extension { id, .. } => id,
        }
    }
}

/// Root hub configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubConfig {
    /// Soft cap on concurrent non-internal tasks.
    #[serde(default = "default_max_tasks")]
    pub max_concurrent_tasks: u64,
    /// Optional cap on concurrent tasks per principal.
    #[serde(default)]
    pub max_tasks_per_principal: Option<u64>,
    /// Worker pool settings.
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    /// Extension endpoints by extension id.
    #[serde(default)]
    pub extensions: HashMap<String, ExtensionConfig>,
    /// Default handler chain in front of the storage.
    #[serde(default)]
    pub handlers: Vec<HandlerConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_tasks(),
            max_tasks_per_principal: None,
            worker_pool: WorkerPoolConfig::default(),
            extensions: HashMap::new(),
            handlers: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Validate limits, pool settings, extensions and handler references.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_tasks == 0 {
            return Err("max_concurrent_tasks must be greater than 0".into());
        }
        if self.max_tasks_per_principal == Some(0) {
            return Err("max_tasks_per_principal must be greater than 0".into());
        }
        self.worker_pool
            .validate()
            .map_err(|e| format!("worker_pool invalid: {e}"))?;
        for (name, extension) in &self.extensions {
            extension
                .validate()
                .map_err(|e| format!("extension `{name}` invalid: {e}"))?;
        }
        let mut seen = std::collections::HashSet::new();
        for handler in &self.handlers {
            if !seen.insert(handler.id()) {
                return Err(format!("duplicate handler id `{}`", handler.id()));
            }
            if let HandlerConfig::Extension { id, extension, .. } = handler {
                if !self.extensions.contains_key(extension) {
                    return Err(format!(
                        "handler `{id}` references unknown extension `{extension}`"
                    ));
                }
            }
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read and validate a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        Self::from_json_str(&text)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading config file {}", path.display()))
    }

    /// Load configuration from the environment.
    ///
    /// A `.env` file is honoured. `GEOHUB_CONFIG` names an optional JSON file
    /// used as the base; `GEOHUB_MAX_TASKS` and `GEOHUB_MAX_TASKS_PER_PRINCIPAL`
    /// override the limits and `GEOHUB_EXTENSIONS_FILE` adds extension
    /// endpoints, replacing entries with the same id.
    ///
    /// # Errors
    ///
    /// Fails on unreadable files, unparsable numbers or invalid values.
    pub fn from_env() -> AppResult<Self> {
        let _ = dotenvy::dotenv();
        let mut cfg = match std::env::var(ENV_CONFIG_FILE) {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        if let Ok(value) = std::env::var(ENV_MAX_TASKS) {
            cfg.max_concurrent_tasks = value
                .trim()
                .parse()
                .with_context(|| format!("{ENV_MAX_TASKS}={value}"))?;
        }
        if let Ok(value) = std::env::var(ENV_MAX_TASKS_PER_PRINCIPAL) {
            cfg.max_tasks_per_principal = Some(
                value
                    .trim()
                    .parse()
                    .with_context(|| format!("{ENV_MAX_TASKS_PER_PRINCIPAL}={value}"))?,
            );
        }
        if let Ok(path) = std::env::var(ENV_EXTENSIONS_FILE) {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading extensions file {path}"))?;
            let extensions: HashMap<String, ExtensionConfig> = serde_json::from_str(&text)
                .with_context(|| format!("parsing extensions file {path}"))?;
            cfg.extensions.extend(extensions);
        }
        cfg.validate().map_err(anyhow::Error::msg)?;
        Ok(cfg)
    }

    /// Build the admission limiter described by this configuration.
    #[must_use]
    pub fn limiter(&self) -> TaskLimiter {
        let limiter = TaskLimiter::new(self.max_concurrent_tasks);
        match self.max_tasks_per_principal {
            Some(limit) => limiter.with_principal_limit(limit),
            None => limiter,
        }
    }
}
