//! # Pipeline Core
//!
//! Core types, traits, and error handling for the AI Core plugin pipeline.
//!
//! This crate provides the foundational types used throughout the pipeline:
//! - Model parameters and chat messages
//! - Stream chunks and chunk streams
//! - The per-invocation request context and abort signal
//! - Provider and model traits implemented by backend adapters
//! - Error types and handling

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod context;
pub mod error;
pub mod provider;
pub mod request;
pub mod response;
pub mod streaming;

// Re-export commonly used types
pub use context::{AbortSignal, RecursiveCall, RecursiveOutput, RequestContext};
pub use error::{PipelineError, PipelineResult};
pub use provider::{EmbeddingModel, ImageModel, LanguageModel, Provider};
pub use request::{
    ChatMessage, ContentPart, MessageContent, MessageRole, ModelParams, ModelParamsBuilder,
    ToolDefinition,
};
pub use response::{Envelope, GenerateResult, GeneratedImage, RequestOutcome};
pub use streaming::{chunk_stream, ChunkKind, ChunkStream, FinishReason, StreamChunk, Usage};
