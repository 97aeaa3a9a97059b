//! Error types for the pipeline.
//!
//! A single error enum is shared by every crate in the workspace. Payloads are
//! plain strings so errors stay `Clone` and can be broadcast to every plugin's
//! `on_error` hook.

use thiserror::Error;

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that can occur anywhere in the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// Lookup on a registry that holds no providers
    #[error("No providers registered")]
    NoProviders,

    /// Provider id is not registered
    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    /// Provider exists but does not know the model
    #[error("Model '{model}' not found for provider '{provider}'")]
    ModelNotFound {
        /// Provider id
        provider: String,
        /// Model id within the provider
        model: String,
    },

    /// Model id could not be parsed
    #[error("Invalid model id '{model_id}': {reason}")]
    InvalidModelId {
        /// The offending id
        model_id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Requested model kind is unknown or not offered by the provider
    #[error("Unsupported model kind '{kind}'")]
    UnsupportedModelKind {
        /// Kind name (language, embedding, image)
        kind: String,
        /// Provider that lacks the capability, if known
        provider: Option<String>,
    },

    /// Hub provider could not route a nested model id
    #[error("Hub '{hub}' error: {message}")]
    Hub {
        /// Hub provider id
        hub: String,
        /// Error message
        message: String,
    },

    /// Backend returned a non-success answer
    #[error("Upstream error from '{provider}': {message}")]
    Upstream {
        /// Provider id
        provider: String,
        /// Error message
        message: String,
        /// HTTP-like status code, when the backend reports one
        status_code: Option<u16>,
    },

    /// A plugin hook failed
    #[error("Plugin '{plugin}' failed in {hook}: {message}")]
    Plugin {
        /// Plugin name
        plugin: String,
        /// Hook name
        hook: String,
        /// Error message
        message: String,
    },

    /// Two plugins share a name
    #[error("Duplicate plugin name: {0}")]
    DuplicatePlugin(String),

    /// A stream transform unit failed
    #[error("Stream transform error: {0}")]
    StreamTransform(String),

    /// Tool execution failed
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// The request was aborted by the caller
    #[error("Request aborted")]
    Aborted,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    /// Create an invalid model id error
    pub fn invalid_model_id(model_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidModelId {
            model_id: model_id.into(),
            reason: reason.into(),
        }
    }

    /// Create a model-not-found error
    pub fn model_not_found(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self::ModelNotFound {
            provider: provider.into(),
            model: model.into(),
        }
    }

    /// Create an unsupported model kind error
    pub fn unsupported_kind(kind: impl Into<String>, provider: Option<String>) -> Self {
        Self::UnsupportedModelKind {
            kind: kind.into(),
            provider,
        }
    }

    /// Create a hub routing error
    pub fn hub(hub: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hub {
            hub: hub.into(),
            message: message.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream(
        provider: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::Upstream {
            provider: provider.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Create a plugin hook error
    pub fn plugin(
        plugin: impl Into<String>,
        hook: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Plugin {
            plugin: plugin.into(),
            hook: hook.into(),
            message: message.into(),
        }
    }

    /// Create a stream transform error
    pub fn stream_transform(message: impl Into<String>) -> Self {
        Self::StreamTransform(message.into())
    }

    /// Create a tool execution error
    pub fn tool_execution(message: impl Into<String>) -> Self {
        Self::ToolExecution(message.into())
    }

    /// Check whether this error comes from model resolution.
    ///
    /// Resolution failures are surfaced before any backend call and are
    /// never retried.
    #[must_use]
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::NoProviders
                | Self::ProviderNotFound(_)
                | Self::ModelNotFound { .. }
                | Self::InvalidModelId { .. }
                | Self::UnsupportedModelKind { .. }
                | Self::Hub { .. }
        )
    }

    /// Check if the error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status_code, .. } => {
                matches!(status_code, Some(429) | Some(500..=599) | None)
            }
            _ => false,
        }
    }

    /// Get the error type string for reporting
    #[must_use]
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NoProviders => "no_providers",
            Self::ProviderNotFound(_) => "provider_not_found",
            Self::ModelNotFound { .. } => "model_not_found",
            Self::InvalidModelId { .. } => "invalid_model_id",
            Self::UnsupportedModelKind { .. } => "unsupported_model_kind",
            Self::Hub { .. } => "hub_error",
            Self::Upstream { .. } => "upstream_error",
            Self::Plugin { .. } => "plugin_error",
            Self::DuplicatePlugin(_) => "duplicate_plugin",
            Self::StreamTransform(_) => "stream_transform_error",
            Self::ToolExecution(_) => "tool_execution_error",
            Self::Aborted => "aborted",
            Self::Configuration(_) => "configuration_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
