//! Configuration loading.

use crate::error::ConfigError;
use crate::types::PipelineConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "AICORE_CONFIG";

const SEPARATOR_ENV: &str = "AICORE_SEPARATOR";
const FALLBACK_PROVIDER_ENV: &str = "AICORE_FALLBACK_PROVIDER";
const MAX_RECURSION_DEPTH_ENV: &str = "AICORE_MAX_RECURSION_DEPTH";
const STREAM_BUFFER_ENV: &str = "AICORE_STREAM_BUFFER";
const LOG_LEVEL_ENV: &str = "AICORE_LOG_LEVEL";
const LOG_FORMAT_ENV: &str = "AICORE_LOG_FORMAT";

/// Config file format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    /// `.yaml` / `.yml`
    Yaml,
    /// `.toml`
    Toml,
    /// `.json`
    Json,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match extension.as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "toml" => Ok(Self::Toml),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::UnsupportedFormat(if other.is_empty() {
                path.display().to_string()
            } else {
                other.to_string()
            })),
        }
    }

    /// Format name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yaml => "yaml",
            Self::Toml => "toml",
            Self::Json => "json",
        }
    }

    /// Parse `content` in this format
    pub fn parse(&self, content: &str) -> Result<PipelineConfig, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            format: self.as_str(),
            message,
        };
        match self {
            Self::Yaml => serde_yaml::from_str(content).map_err(|e| parse_error(e.to_string())),
            Self::Toml => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
            Self::Json => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
        }
    }
}

/// Builder that merges defaults, a file and the environment
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_overrides: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader with environment overrides and no file
    #[must_use]
    pub fn new() -> Self {
        Self {
            file: None,
            env_overrides: true,
        }
    }

    /// Read this file
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Read the file named by `AICORE_CONFIG`, if set
    #[must_use]
    pub fn with_env_file(mut self) -> Self {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                self.file = Some(PathBuf::from(path));
            }
        }
        self
    }

    /// Skip environment overrides
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.env_overrides = false;
        self
    }

    /// Load, merge and validate
    pub async fn load(&self) -> Result<PipelineConfig, ConfigError> {
        self.load_with_env(|var| std::env::var(var).ok()).await
    }

    /// Like [`load`](Self::load), reading overrides through `lookup`
    pub async fn load_with_env<F>(&self, lookup: F) -> Result<PipelineConfig, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match &self.file {
            Some(path) => read_file(path).await?,
            None => PipelineConfig::default(),
        };
        if self.env_overrides {
            apply_env_overrides(&mut config, lookup)?;
        }
        config.validate()?;
        info!(
            file = ?self.file,
            separator = %config.registry.separator,
            max_recursion_depth = config.tool_calling.max_recursion_depth,
            "Configuration loaded"
        );
        Ok(config)
    }
}

async fn read_file(path: &Path) -> Result<PipelineConfig, ConfigError> {
    let format = ConfigFormat::from_path(path)?;
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    debug!(path = %path.display(), format = format.as_str(), "Parsing config file");
    format.parse(&content)
}

fn parse_env<T>(var: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::env(var, e.to_string()))
}

fn apply_env_overrides<F>(config: &mut PipelineConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(SEPARATOR_ENV) {
        config.registry.separator = value;
    }
    if let Some(value) = lookup(FALLBACK_PROVIDER_ENV) {
        config.registry.fallback_provider = Some(value);
    }
    if let Some(value) = lookup(MAX_RECURSION_DEPTH_ENV) {
        config.tool_calling.max_recursion_depth = parse_env(MAX_RECURSION_DEPTH_ENV, &value)?;
    }
    if let Some(value) = lookup(STREAM_BUFFER_ENV) {
        config.streaming.channel_capacity = parse_env(STREAM_BUFFER_ENV, &value)?;
    }
    if let Some(value) = lookup(LOG_LEVEL_ENV) {
        config.logging.level = value;
    }
    if let Some(value) = lookup(LOG_FORMAT_ENV) {
        config.logging.format = parse_env(LOG_FORMAT_ENV, &value)?;
    }
    Ok(())
}

/// Load `path` with environment overrides
pub async fn load_config(path: impl AsRef<Path>) -> Result<PipelineConfig, ConfigError> {
    ConfigLoader::new()
        .with_file(path.as_ref().to_path_buf())
        .load()
        .await
}
