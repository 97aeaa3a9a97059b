//! Executor settings.

use pipeline_config::PipelineConfig;
use pipeline_core::PipelineResult;
use pipeline_plugins::builtin::{
    MarkerClassifier, SmoothingConfig, DEFAULT_CHUNK_PATTERN, DEFAULT_MAX_RECURSION_DEPTH,
    DEFAULT_SMOOTHING_DELAY,
};
use pipeline_plugins::DEFAULT_CHANNEL_CAPACITY;
use std::time::Duration;

/// Settings the executor applies to every call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Per-stage channel capacity of the transform chain
    pub channel_capacity: usize,
    /// Recursion limit for prompt-mode tool calls
    pub max_recursion_depth: u32,
    /// Whether prompt-mode tool calling rewrites requests
    pub tool_calling_enabled: bool,
    /// Markers detected in addition to the defaults
    pub extra_tool_markers: Vec<String>,
    /// Pause between smoothed reasoning pieces
    pub smoothing_delay: Duration,
    /// Boundary of one smoothed reasoning piece
    pub chunk_pattern: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            tool_calling_enabled: true,
            extra_tool_markers: Vec::new(),
            smoothing_delay: DEFAULT_SMOOTHING_DELAY,
            chunk_pattern: DEFAULT_CHUNK_PATTERN.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Set the channel capacity
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the recursion limit
    #[must_use]
    pub fn with_max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Marker classifier for these settings
    pub fn classifier(&self) -> PipelineResult<MarkerClassifier> {
        if self.extra_tool_markers.is_empty() {
            Ok(MarkerClassifier::default())
        } else {
            MarkerClassifier::with_extra_markers(&self.extra_tool_markers)
        }
    }

    /// Smoothing settings for these settings
    pub fn smoothing(&self) -> PipelineResult<SmoothingConfig> {
        SmoothingConfig::with_pattern(self.smoothing_delay, &self.chunk_pattern)
    }
}

impl From<&PipelineConfig> for RuntimeConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            channel_capacity: config.streaming.channel_capacity,
            max_recursion_depth: config.tool_calling.max_recursion_depth,
            tool_calling_enabled: config.tool_calling.enabled,
            extra_tool_markers: config.tool_calling.extra_markers.clone(),
            smoothing_delay: config.streaming.smoothing_delay,
            chunk_pattern: config.streaming.chunk_pattern.clone(),
        }
    }
}
