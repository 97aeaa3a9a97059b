//! # Pipeline Config
//!
//! Configuration for the AI Core plugin pipeline.
//!
//! Sources, later ones winning:
//! 1. Built-in defaults
//! 2. A YAML, TOML or JSON file, chosen by extension
//! 3. `AICORE_*` environment variables
//!
//! The merged configuration is validated before it is returned.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{load_config, ConfigFormat, ConfigLoader, CONFIG_PATH_ENV};
pub use types::{PipelineConfig, RegistryConfig, StreamingConfig, ToolCallingConfig};
