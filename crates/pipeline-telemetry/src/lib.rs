//! # Pipeline Telemetry
//!
//! Structured logging for the AI Core plugin pipeline: subscriber setup and
//! the per-request span macro.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;

pub use logging::{init_logging, LogFormat, LoggingConfig, TelemetryError};
