//! Scripted providers for integration testing
//!
//! A [`ScriptedProvider`] answers each language-model call with the next
//! scripted turn and records what it was asked.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use pipeline_core::{
    AbortSignal, ChunkStream, EmbeddingModel, GeneratedImage, ImageModel, LanguageModel,
    ModelParams, PipelineError, PipelineResult, Provider, StreamChunk,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One scripted model answer
#[derive(Debug, Clone, Default)]
pub struct Turn {
    chunks: Vec<(Duration, StreamChunk)>,
}

impl Turn {
    /// Chunks delivered without delay
    pub fn new(chunks: Vec<StreamChunk>) -> Self {
        Self {
            chunks: chunks.into_iter().map(|c| (Duration::ZERO, c)).collect(),
        }
    }

    /// Chunks each delivered after `(delay_ms, chunk)`
    pub fn timed(chunks: Vec<(u64, StreamChunk)>) -> Self {
        Self {
            chunks: chunks
                .into_iter()
                .map(|(ms, c)| (Duration::from_millis(ms), c))
                .collect(),
        }
    }

    /// The same chunks with `delay` before each
    pub fn with_delay(mut self, delay: Duration) -> Self {
        for (d, _) in &mut self.chunks {
            *d = delay;
        }
        self
    }

    fn into_stream(self) -> ChunkStream {
        futures::stream::iter(self.chunks)
            .then(|(delay, chunk)| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Ok::<_, PipelineError>(chunk)
            })
            .boxed()
    }
}

/// One recorded language-model call
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Model id the provider was asked for
    pub model_id: String,
    /// Final parameters after every transform
    pub params: ModelParams,
}

#[derive(Debug, Default)]
struct ScriptState {
    turns: Mutex<VecDeque<Turn>>,
    last: Mutex<Option<Turn>>,
    failure: Mutex<Option<PipelineError>>,
    calls: AtomicUsize,
    recorded: Mutex<Vec<RecordedCall>>,
}

impl ScriptState {
    fn next_turn(&self) -> Turn {
        let next = self.turns.lock().pop_front();
        match next {
            Some(turn) => {
                *self.last.lock() = Some(turn.clone());
                turn
            }
            None => self.last.lock().clone().unwrap_or_default(),
        }
    }
}

/// Provider replaying scripted turns. Once the script is exhausted the last
/// turn repeats.
#[derive(Debug, Clone)]
pub struct ScriptedProvider {
    name: String,
    state: Arc<ScriptState>,
}

impl ScriptedProvider {
    /// Create a provider with an empty script
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(ScriptState::default()),
        }
    }

    /// Append a turn
    pub fn turn(self, turn: Turn) -> Self {
        self.state.turns.lock().push_back(turn);
        self
    }

    /// Append a turn of undelayed chunks
    pub fn chunks(self, chunks: Vec<StreamChunk>) -> Self {
        self.turn(Turn::new(chunks))
    }

    /// Fail every call before a stream exists
    pub fn failing(self, error: PipelineError) -> Self {
        *self.state.failure.lock() = Some(error);
        self
    }

    /// Provider id
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle for registration
    pub fn as_provider(&self) -> Arc<dyn Provider> {
        Arc::new(self.clone())
    }

    /// Number of language-model calls made
    pub fn calls(&self) -> usize {
        self.state.calls.load(Ordering::SeqCst)
    }

    /// Every recorded call in order
    pub fn recorded(&self) -> Vec<RecordedCall> {
        self.state.recorded.lock().clone()
    }
}

impl Provider for ScriptedProvider {
    fn language_model(&self, model_id: &str) -> PipelineResult<Arc<dyn LanguageModel>> {
        Ok(Arc::new(ScriptedModel {
            provider: self.name.clone(),
            model: model_id.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    fn embedding_model(&self, model_id: &str) -> PipelineResult<Arc<dyn EmbeddingModel>> {
        Ok(Arc::new(ScriptedModel {
            provider: self.name.clone(),
            model: model_id.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    fn image_model(&self, model_id: &str) -> PipelineResult<Arc<dyn ImageModel>> {
        Ok(Arc::new(ScriptedModel {
            provider: self.name.clone(),
            model: model_id.to_string(),
            state: Arc::clone(&self.state),
        }))
    }
}

/// Model handle served by a [`ScriptedProvider`]
#[derive(Debug)]
pub struct ScriptedModel {
    provider: String,
    model: String,
    state: Arc<ScriptState>,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        params: ModelParams,
        _abort: AbortSignal,
    ) -> PipelineResult<ChunkStream> {
        self.state.calls.fetch_add(1, Ordering::SeqCst);
        self.state.recorded.lock().push(RecordedCall {
            model_id: self.model.clone(),
            params,
        });
        let failure = self.state.failure.lock().clone();
        if let Some(error) = failure {
            return Err(error);
        }
        Ok(self.state.next_turn().into_stream())
    }
}

#[async_trait]
impl EmbeddingModel for ScriptedModel {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn embed(&self, values: Vec<String>) -> PipelineResult<Vec<Vec<f32>>> {
        Ok(values
            .iter()
            .map(|value| vec![value.len() as f32, value.split_whitespace().count() as f32])
            .collect())
    }
}

#[async_trait]
impl ImageModel for ScriptedModel {
    fn provider_id(&self) -> &str {
        &self.provider
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: String, n: u32) -> PipelineResult<Vec<GeneratedImage>> {
        Ok((0..n)
            .map(|i| GeneratedImage {
                data: format!("{}/{}/{prompt}/{i}", self.provider, self.model),
                media_type: Some("image/png".to_string()),
            })
            .collect())
    }
}
