//! Provider and model traits.
//!
//! Backend adapters implement these traits outside this workspace. A
//! [`Provider`] hands out model handles; the handles do the actual calls.

use crate::context::AbortSignal;
use crate::error::{PipelineError, PipelineResult};
use crate::request::ModelParams;
use crate::response::{GenerateResult, GeneratedImage};
use crate::streaming::ChunkStream;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// Handle to a chat/completion model
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Provider that served this handle
    fn provider_id(&self) -> &str;

    /// Model id within the provider
    fn model_id(&self) -> &str;

    /// Start a streaming generation.
    ///
    /// A non-success answer from the backend must be returned as `Err`
    /// here, before any stream exists.
    async fn stream(&self, params: ModelParams, abort: AbortSignal) -> PipelineResult<ChunkStream>;

    /// Run a generation to completion
    async fn generate(
        &self,
        params: ModelParams,
        abort: AbortSignal,
    ) -> PipelineResult<GenerateResult> {
        let stream = self.stream(params, abort).await?;
        let chunks: Vec<_> = stream.collect().await;
        GenerateResult::from_chunks(chunks)
    }
}

/// Handle to an embedding model
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Provider that served this handle
    fn provider_id(&self) -> &str;

    /// Model id within the provider
    fn model_id(&self) -> &str;

    /// Embed each value
    async fn embed(&self, values: Vec<String>) -> PipelineResult<Vec<Vec<f32>>>;
}

/// Handle to an image generation model
#[async_trait]
pub trait ImageModel: Send + Sync {
    /// Provider that served this handle
    fn provider_id(&self) -> &str;

    /// Model id within the provider
    fn model_id(&self) -> &str;

    /// Generate `n` images for a prompt
    async fn generate(&self, prompt: String, n: u32) -> PipelineResult<Vec<GeneratedImage>>;
}

/// A backend able to hand out model handles.
///
/// Only language models are mandatory.
pub trait Provider: Send + Sync {
    /// Get a language model handle
    fn language_model(&self, model_id: &str) -> PipelineResult<Arc<dyn LanguageModel>>;

    /// Get an embedding model handle
    fn embedding_model(&self, _model_id: &str) -> PipelineResult<Arc<dyn EmbeddingModel>> {
        Err(PipelineError::unsupported_kind("embedding", None))
    }

    /// Get an image model handle
    fn image_model(&self, _model_id: &str) -> PipelineResult<Arc<dyn ImageModel>> {
        Err(PipelineError::unsupported_kind("image", None))
    }
}
