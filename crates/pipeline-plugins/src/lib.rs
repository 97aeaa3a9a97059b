//! # Pipeline Plugins
//!
//! Plugin model for the AI Core pipeline.
//!
//! - [`Plugin`]: named bundle of optional hooks
//! - [`PluginManager`]: ordered dispatch with parallel, sequential and
//!   first-answer strategies
//! - [`StreamTransformChain`]: per-stream pipeline of transform units
//! - [`builtin`]: prompt-mode tool calling, reasoning timing, logging

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builtin;
pub mod manager;
pub mod plugin;
pub mod transform;

pub use manager::{ParallelEvent, ParallelReport, PluginFailure, PluginManager, PluginStats};
pub use plugin::{
    Enforce, ErrorEvent, EventHook, HookKind, Plugin, ResolveModelHook, TransformFactory,
    TransformHook,
};
pub use transform::{
    compose, NamedTransform, StreamControl, StreamTransform, StreamTransformChain,
    TransformController, DEFAULT_CHANNEL_CAPACITY,
};
