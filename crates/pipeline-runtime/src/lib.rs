//! # Pipeline Runtime
//!
//! The executor that drives one call through the pipeline:
//!
//! ```text
//! context ─► on_request_start ─► resolve_model ─► transform_params
//!         ─► backend stream ─► transform chain ─► transform_result
//!         ─► on_request_end | on_error
//! ```
//!
//! Prompt-mode tool calls re-enter the executor one level deeper through the
//! recursion handle installed in every [`RequestContext`](pipeline_core::RequestContext).

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod executor;
pub mod result;

pub use config::RuntimeConfig;
pub use executor::{ExecutorBuilder, RuntimeExecutor};
pub use result::{StreamTextResult, TextStream};
