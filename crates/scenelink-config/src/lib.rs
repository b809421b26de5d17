//! SceneLink configuration.
//!
//! Settings come from an optional `scenelink.toml` and can be overridden with
//! `SCENELINK__*` environment variables, e.g. `SCENELINK__LOG_FILTER=debug`.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use url::Url;

use scenelink_transport::ContextKind;

/// Name of the config file looked up in the working directory.
pub const DEFAULT_CONFIG_NAME: &str = "scenelink";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "SCENELINK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid base URL {url}: {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Tool configured twice: {0}")]
    DuplicateTool(String),
}

/// Host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneLinkConfig {
    /// URL of the host document; tool locations are resolved against it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Default `tracing` filter, used when `RUST_LOG` is not set.
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Target origin for tools that do not set their own.
    #[serde(default = "default_target_origin")]
    pub default_target_origin: String,

    /// World document to seed the host from.
    #[serde(default)]
    pub world_path: Option<PathBuf>,

    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

/// A tool to launch at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    /// Name the tool talks under.
    pub name: String,

    /// Path or URL of the tool's entry point.
    pub location: String,

    #[serde(default = "default_kind")]
    pub kind: ContextKind,

    #[serde(default)]
    pub module: bool,

    #[serde(default)]
    pub target_origin: Option<String>,
}

fn default_base_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_target_origin() -> String {
    "*".to_string()
}

fn default_kind() -> ContextKind {
    ContextKind::Frame
}

impl Default for SceneLinkConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            log_filter: default_log_filter(),
            default_target_origin: default_target_origin(),
            world_path: None,
            tools: Vec::new(),
        }
    }
}

impl SceneLinkConfig {
    /// Load from `path`, or from `scenelink.toml` in the working directory if
    /// it exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, None)
    }

    /// Like [`SceneLinkConfig::load`], reading overrides from `env` instead of
    /// the process environment when given.
    pub fn load_from(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_NAME).required(false),
        };
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .source(env),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        debug!(base_url = %config.base_url, tools = config.tools.len(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;
        let mut seen = HashSet::new();
        for tool in &self.tools {
            if !seen.insert(tool.name.as_str()) {
                return Err(ConfigError::DuplicateTool(tool.name.clone()));
            }
        }
        Ok(())
    }

    pub fn base_url(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|source| ConfigError::InvalidBaseUrl {
            url: self.base_url.clone(),
            source,
        })
    }

    /// Target origin for `tool`, falling back to the configured default.
    pub fn target_origin_for<'a>(&'a self, tool: &'a ToolSpec) -> &'a str {
        tool.target_origin
            .as_deref()
            .unwrap_or(&self.default_target_origin)
    }
}
