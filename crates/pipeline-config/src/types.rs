//! Configuration types.

use crate::error::ConfigError;
use pipeline_telemetry::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Provider registry settings
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Prompt-mode tool calling
    #[serde(default)]
    pub tool_calling: ToolCallingConfig,

    /// Stream composition
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Check ranges and cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.separator.is_empty() {
            return Err(ConfigError::validation("registry.separator must not be empty"));
        }
        if let Some(fallback) = &self.registry.fallback_provider {
            if fallback.is_empty() || fallback.contains(&self.registry.separator) {
                return Err(ConfigError::validation(format!(
                    "registry.fallback_provider '{fallback}' must be a plain provider id"
                )));
            }
        }
        if self.streaming.channel_capacity == 0 {
            return Err(ConfigError::validation(
                "streaming.channel_capacity must be greater than 0",
            ));
        }
        if let Err(e) = regex::Regex::new(&self.streaming.chunk_pattern) {
            return Err(ConfigError::validation(format!(
                "streaming.chunk_pattern is not a valid regex: {e}"
            )));
        }
        if self.tool_calling.extra_markers.iter().any(String::is_empty) {
            return Err(ConfigError::validation(
                "tool_calling.extra_markers must not contain empty markers",
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::validation("logging.level must not be empty"));
        }
        Ok(())
    }
}

/// Provider registry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Separator between provider id and model id
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Provider used for model ids without a namespace
    #[serde(default)]
    pub fallback_provider: Option<String>,
}

fn default_separator() -> String {
    ">".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            separator: default_separator(),
            fallback_provider: None,
        }
    }
}

/// Prompt-mode tool calling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallingConfig {
    /// Rewrite requests carrying tools into prompt mode
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Deepest recursion level that may still run tools
    #[serde(default = "default_max_recursion_depth")]
    pub max_recursion_depth: u32,

    /// Markers detected in addition to `<tool_use>` and `<tool_call>`
    #[serde(default)]
    pub extra_markers: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_max_recursion_depth() -> u32 {
    20
}

impl Default for ToolCallingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_recursion_depth: default_max_recursion_depth(),
            extra_markers: Vec::new(),
        }
    }
}

/// Stream composition settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Bounded channel capacity between transform stages
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Pause between smoothed reasoning pieces
    #[serde(default = "default_smoothing_delay", with = "humantime_serde")]
    pub smoothing_delay: Duration,

    /// Boundary of one smoothed reasoning piece
    #[serde(default = "default_chunk_pattern")]
    pub chunk_pattern: String,
}

fn default_channel_capacity() -> usize {
    32
}

fn default_smoothing_delay() -> Duration {
    Duration::from_millis(20)
}

fn default_chunk_pattern() -> String {
    r"([\x{4E00}-\x{9FFF}])|\S+\s+".to_string()
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            smoothing_delay: default_smoothing_delay(),
            chunk_pattern: default_chunk_pattern(),
        }
    }
}
