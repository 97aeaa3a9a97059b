//! Test helper utilities for integration tests

use crate::mock_providers::ScriptedProvider;
use async_trait::async_trait;
use futures::StreamExt;
use once_cell::sync::Lazy;
use pipeline_core::{
    ChatMessage, ChunkStream, PipelineError, PipelineResult, StreamChunk,
};
use pipeline_plugins::builtin::{
    ToolExecutionRequest, ToolExecutor, ToolResponse, ToolStatus,
};
use pipeline_providers::ProviderRegistry;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing_subscriber::EnvFilter;

/// Initialize tracing for tests (only once)
static TRACING: Lazy<()> = Lazy::new(|| {
    if std::env::var("TEST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
});

/// Initialize tracing for tests
pub fn init_tracing() {
    Lazy::force(&TRACING);
}

/// Registry holding every given provider under its own name
pub fn registry_with(providers: &[&ScriptedProvider]) -> ProviderRegistry {
    let registry = ProviderRegistry::new();
    registry
        .register_batch(
            providers
                .iter()
                .map(|provider| (provider.name().to_string(), provider.as_provider())),
        )
        .expect("Failed to register providers");
    registry
}

/// Drain a stream, failing the test on any error item
pub async fn collect_ok<S>(stream: S) -> Vec<StreamChunk>
where
    S: futures::Stream<Item = PipelineResult<StreamChunk>>,
{
    stream
        .map(|item| item.expect("Unexpected stream error"))
        .collect()
        .await
}

/// Drain a stream keeping error items
pub async fn collect_all(stream: ChunkStream) -> Vec<PipelineResult<StreamChunk>> {
    stream.collect().await
}

/// Concatenated text deltas
pub fn text_of(chunks: &[StreamChunk]) -> String {
    chunks.iter().filter_map(StreamChunk::as_text_delta).collect()
}

/// Number of `finish` chunks
pub fn finish_count(chunks: &[StreamChunk]) -> usize {
    chunks.iter().filter(|chunk| chunk.is_finish()).count()
}

/// Tool executor that calls the first catalog tool whenever it is asked,
/// answering with a fixed value
pub struct FixedAnswerExecutor {
    answer: Value,
    calls: AtomicUsize,
    fail: bool,
}

impl FixedAnswerExecutor {
    /// Executor answering `answer`
    pub fn new(answer: Value) -> Self {
        Self {
            answer,
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// Executor whose every run fails
    pub fn failing() -> Self {
        Self {
            answer: Value::Null,
            calls: AtomicUsize::new(0),
            fail: true,
        }
    }

    /// Number of runs
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolExecutor for FixedAnswerExecutor {
    async fn parse_and_call_tools(
        &self,
        request: ToolExecutionRequest<'_>,
    ) -> PipelineResult<Vec<ChatMessage>> {
        let run = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PipelineError::tool_execution("tool server unreachable"));
        }
        let Some(tool) = request.tools.first() else {
            return Ok(Vec::new());
        };

        let id = format!("{}-{run}", tool.name);
        (request.on_chunk)(StreamChunk::ToolCall {
            tool_call_id: id.clone(),
            tool_name: tool.name.clone(),
            arguments: Value::Object(serde_json::Map::new()),
        });
        request.tool_responses.push(ToolResponse {
            id,
            tool_name: tool.name.clone(),
            arguments: Value::Object(serde_json::Map::new()),
            status: ToolStatus::Done,
            result: Some(self.answer.clone()),
            error: None,
        });
        let start = request.tool_responses.len() - 1;
        Ok(request
            .converter
            .convert(&request.tool_responses[start..], request.model))
    }
}
