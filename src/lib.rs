//! # AI Core Pipeline
//!
//! Plugin pipeline between a chat application and pluggable language-model
//! backends.
//!
//! ## Features
//!
//! - Provider registry with namespaced model ids (`provider>model`) and hubs
//! - Ordered plugins with parallel, sequential and first-answer hooks
//! - Per-stream transform chains with backpressure
//! - Prompt-mode tool calling with bounded recursion
//! - Reasoning timing and smoothing plugins
//!
//! ## Usage
//!
//! ```no_run
//! use aicore_pipeline::prelude::*;
//!
//! # async fn run(provider: std::sync::Arc<dyn Provider>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = aicore_pipeline::bootstrap().await?;
//! let registry = aicore_pipeline::registry_for(&config)?;
//! registry.register("openai", provider)?;
//!
//! let executor = RuntimeExecutor::from_config(registry, &config)?
//!     .with_plugin(logging_plugin())
//!     .build()?;
//! let _text = executor
//!     .stream_text("gpt-4", ModelParams::new(vec![ChatMessage::user("hi")]))
//!     .await?
//!     .text()
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub use pipeline_config as config;
pub use pipeline_core as core;
pub use pipeline_plugins as plugins;
pub use pipeline_providers as providers;
pub use pipeline_runtime as runtime;
pub use pipeline_telemetry as telemetry;

use pipeline_config::{ConfigError, ConfigLoader, PipelineConfig};
use pipeline_core::PipelineResult;
use pipeline_providers::ProviderRegistry;
use pipeline_telemetry::{init_logging, TelemetryError};
use tracing::info;

/// Commonly used items
pub mod prelude {
    pub use pipeline_config::PipelineConfig;
    pub use pipeline_core::{
        AbortSignal, ChatMessage, ChunkStream, FinishReason, GenerateResult, LanguageModel,
        ModelParams, PipelineError, PipelineResult, Provider, RequestContext, StreamChunk,
        ToolDefinition,
    };
    pub use pipeline_plugins::builtin::{
        logging_plugin, reasoning_time_plugin, smooth_reasoning_plugin, thinking_time_plugin,
        PromptToolConfig, ToolExecutor, ToolInvoker,
    };
    pub use pipeline_plugins::{Enforce, Plugin, PluginManager, StreamTransform};
    pub use pipeline_providers::{HubProvider, ModelResolver, ProviderRegistry};
    pub use pipeline_runtime::{RuntimeConfig, RuntimeExecutor, StreamTextResult};
}

/// Startup failure
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Logging could not be initialized
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
}

/// Load configuration (file from `AICORE_CONFIG`, then `AICORE_*` overrides)
/// and install the global log subscriber
pub async fn bootstrap() -> Result<PipelineConfig, BootstrapError> {
    let config = ConfigLoader::new().with_env_file().load().await?;
    init_logging(&config.logging)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        separator = %config.registry.separator,
        "AI Core pipeline configured"
    );
    Ok(config)
}

/// Empty registry using the configured separator
pub fn registry_for(config: &PipelineConfig) -> PipelineResult<ProviderRegistry> {
    ProviderRegistry::with_separator(config.registry.separator.clone())
}
