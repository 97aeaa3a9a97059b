//! Configuration errors.

use thiserror::Error;

/// Failure while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read config file {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Underlying error
        message: String,
    },

    /// The file could not be parsed
    #[error("Failed to parse {format} config: {message}")]
    Parse {
        /// Format name
        format: &'static str,
        /// Underlying error
        message: String,
    },

    /// The extension names no known format
    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// An environment override has an invalid value
    #[error("Invalid value for {var}: {message}")]
    Env {
        /// Variable name
        var: String,
        /// What is wrong
        message: String,
    },

    /// A value is out of range or inconsistent
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl ConfigError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an environment override error
    pub fn env(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Env {
            var: var.into(),
            message: message.into(),
        }
    }
}
