//! Prompt-mode tool-call recursion.
//!
//! The plugin rewrites the request so the tool catalog travels in the system
//! prompt, then watches the response stream. Once the model turn finishes,
//! the accumulated text is checked for tool markers. If tools ran, the whole
//! pipeline is re-invoked one level deeper with the tool results appended to
//! the history, and the nested stream is forwarded into the current one.
//!
//! ```text
//! Streaming ──finish/flush──► Detecting ──no markers──► Done
//!                                 │
//!                                 ▼
//!                          ExecutingTools ──► Recursing ──► Done
//! ```

use super::classifier::MarkerClassifier;
use super::prompt::{
    build_system_prompt, ModelDescriptor, PromptBuilder, PromptResultConverter,
    PromptToolExecutor, ToolExecutionRequest, ToolExecutor, ToolInvoker, ToolResponse,
    ToolResultConverter,
};
use crate::plugin::Plugin;
use crate::transform::{StreamTransform, TransformController};
use async_trait::async_trait;
use futures::StreamExt;
use pipeline_core::{
    ChatMessage, FinishReason, ModelParams, PipelineError, PipelineResult, RecursiveOutput,
    RequestContext, StreamChunk, ToolDefinition,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Plugin name of the prompt tool-use plugin
pub const PROMPT_TOOL_PLUGIN: &str = "built-in:prompt-tool-use";

/// Context metadata key holding the tool catalog
pub const PROMPT_TOOLS_KEY: &str = "promptTools";

/// Default recursion limit
pub const DEFAULT_MAX_RECURSION_DEPTH: u32 = 20;

/// Settings of the prompt tool-use plugin
#[derive(Clone)]
pub struct PromptToolConfig {
    /// Whether the plugin rewrites requests at all
    pub enabled: bool,
    /// Deepest level that may still recurse
    pub max_recursion_depth: u32,
    /// Marker detection policy
    pub classifier: MarkerClassifier,
    /// Tool-execution collaborator
    pub executor: Arc<dyn ToolExecutor>,
    /// Tool result to history conversion
    pub converter: Arc<dyn ToolResultConverter>,
    /// Replaces the default system prompt builder
    pub prompt_builder: Option<PromptBuilder>,
}

impl PromptToolConfig {
    /// Config around a custom executor
    #[must_use]
    pub fn new(executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            enabled: true,
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            classifier: MarkerClassifier::default(),
            executor,
            converter: Arc::new(PromptResultConverter),
            prompt_builder: None,
        }
    }

    /// Config using [`PromptToolExecutor`] over `invoker`
    #[must_use]
    pub fn with_invoker(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self::new(Arc::new(PromptToolExecutor::new(invoker)))
    }

    /// Set the recursion limit
    #[must_use]
    pub fn with_max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }

    /// Set the marker classifier
    #[must_use]
    pub fn with_classifier(mut self, classifier: MarkerClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Set the result converter
    #[must_use]
    pub fn with_converter(mut self, converter: Arc<dyn ToolResultConverter>) -> Self {
        self.converter = converter;
        self
    }

    /// Set a custom system prompt builder
    #[must_use]
    pub fn with_prompt_builder(mut self, builder: PromptBuilder) -> Self {
        self.prompt_builder = Some(builder);
        self
    }

    /// Enable or disable request rewriting
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    fn system_prompt(&self, user_system_prompt: &str, tools: &[ToolDefinition]) -> String {
        match &self.prompt_builder {
            Some(builder) => builder(user_system_prompt, tools),
            None => build_system_prompt(user_system_prompt, tools),
        }
    }
}

impl std::fmt::Debug for PromptToolConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptToolConfig")
            .field("enabled", &self.enabled)
            .field("max_recursion_depth", &self.max_recursion_depth)
            .field("classifier", &self.classifier)
            .field("custom_prompt", &self.prompt_builder.is_some())
            .finish_non_exhaustive()
    }
}

/// Engine states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Forwarding chunks and accumulating text
    Streaming,
    /// Terminal signal seen, checking for markers
    Detecting,
    /// Running tools
    ExecutingTools,
    /// Draining the nested invocation
    Recursing,
    /// Nothing left to do
    Done,
}

/// Per-stream tool-call bookkeeping
#[derive(Debug, Clone, Default)]
pub struct ToolCallState {
    /// Depth of the invocation this stream belongs to
    pub recursion_depth: u32,
    /// Deepest level that may still recurse
    pub max_recursion_depth: u32,
    /// Text deltas seen so far
    pub accumulated_text: String,
    /// Latch ensuring detection runs once
    pub tools_processed: bool,
}

/// The recursion engine, one instance per stream
pub struct ToolCallEngine {
    state: EngineState,
    call: ToolCallState,
    config: Arc<PromptToolConfig>,
    ctx: Arc<RequestContext>,
    tools: Vec<ToolDefinition>,
    tool_responses: Vec<ToolResponse>,
}

impl ToolCallEngine {
    /// Create an engine for one stream of `ctx`.
    ///
    /// With an empty catalog the engine forwards every chunk unchanged.
    #[must_use]
    pub fn new(
        config: Arc<PromptToolConfig>,
        ctx: Arc<RequestContext>,
        tools: Vec<ToolDefinition>,
    ) -> Self {
        let state = if tools.is_empty() {
            EngineState::Done
        } else {
            EngineState::Streaming
        };
        Self {
            state,
            call: ToolCallState {
                recursion_depth: ctx.recursion_depth,
                max_recursion_depth: config.max_recursion_depth,
                ..Default::default()
            },
            config,
            ctx,
            tools,
            tool_responses: Vec::new(),
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Whether tool markers are watched at all
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.tools.is_empty()
    }

    /// Bookkeeping snapshot
    #[must_use]
    pub fn call_state(&self) -> &ToolCallState {
        &self.call
    }

    async fn forward(
        finish: Option<StreamChunk>,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        match finish {
            Some(chunk) => out.enqueue(chunk).await,
            None => Ok(()),
        }
    }

    fn check_abort(&self) -> PipelineResult<()> {
        if self.ctx.abort.is_aborted() {
            return Err(PipelineError::Aborted);
        }
        Ok(())
    }

    /// Handle a `finish` chunk, or end of stream when `finish` is `None`
    async fn on_terminal(
        &mut self,
        finish: Option<StreamChunk>,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        if self.call.tools_processed || !self.is_active() {
            return Self::forward(finish, out).await;
        }
        self.call.tools_processed = true;
        self.state = EngineState::Detecting;

        let Some(marker) = self
            .config
            .classifier
            .matched_marker(&self.call.accumulated_text)
            .map(ToString::to_string)
        else {
            self.state = EngineState::Done;
            return Self::forward(finish, out).await;
        };

        self.state = EngineState::ExecutingTools;
        let depth = self.call.recursion_depth;
        debug!(request_id = %self.ctx.request_id, depth, marker = %marker, "Tool markers detected");

        if depth >= self.call.max_recursion_depth {
            warn!(
                request_id = %self.ctx.request_id,
                depth,
                max = self.call.max_recursion_depth,
                "Tool call depth limit reached"
            );
            out.enqueue(StreamChunk::text_delta(format!(
                "\n\n[max tool call depth {} reached]",
                self.call.max_recursion_depth
            )))
            .await?;
            self.state = EngineState::Done;
            return Self::forward(finish, out).await;
        }

        self.check_abort()?;
        let messages = match self.execute_tools(out).await {
            Ok(messages) => messages,
            Err(PipelineError::Aborted) => return Err(PipelineError::Aborted),
            Err(err) => {
                warn!(request_id = %self.ctx.request_id, error = %err, "Tool execution failed");
                out.enqueue(StreamChunk::text_delta(format!(
                    "\n\n[tool call error: {err}]"
                )))
                .await?;
                self.state = EngineState::Done;
                return Self::forward(finish, out).await;
            }
        };
        if messages.is_empty() {
            self.state = EngineState::Done;
            return Self::forward(finish, out).await;
        }

        self.state = EngineState::Recursing;
        self.check_abort()?;
        self.recurse(messages, finish, out).await?;
        self.state = EngineState::Done;
        Ok(())
    }

    async fn execute_tools(
        &mut self,
        out: &mut TransformController,
    ) -> PipelineResult<Vec<ChatMessage>> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let on_chunk = move |chunk: StreamChunk| {
            // The receiver outlives the executor call.
            let _ = tx.send(chunk);
        };
        let model = ModelDescriptor {
            provider_id: self.ctx.provider_id.clone(),
            model_id: self.ctx.model_id.clone(),
        };

        let call = self
            .config
            .executor
            .parse_and_call_tools(ToolExecutionRequest {
                response_text: &self.call.accumulated_text,
                tool_responses: &mut self.tool_responses,
                on_chunk: &on_chunk,
                converter: self.config.converter.as_ref(),
                model: &model,
                tools: &self.tools,
            });
        tokio::pin!(call);

        // Chunks reach the consumer while tools are still running.
        let result = loop {
            tokio::select! {
                biased;
                Some(chunk) = rx.recv() => out.enqueue(chunk).await?,
                result = &mut call => break result,
            }
        };
        while let Ok(chunk) = rx.try_recv() {
            out.enqueue(chunk).await?;
        }
        result
    }

    async fn recurse(
        &mut self,
        tool_messages: Vec<ChatMessage>,
        finish: Option<StreamChunk>,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        let Some(recursive_call) = self.ctx.recursive_call().cloned() else {
            warn!(
                request_id = %self.ctx.request_id,
                "No recursive call handle, stopping after tools"
            );
            return Self::forward(finish, out).await;
        };

        let mut params: ModelParams = self.ctx.original_params.clone();
        params
            .messages
            .push(ChatMessage::assistant(self.call.accumulated_text.clone()));
        params.messages.extend(tool_messages);

        info!(
            request_id = %self.ctx.request_id,
            depth = self.call.recursion_depth + 1,
            "Recursing after tool execution"
        );

        match recursive_call(params).await {
            Ok(RecursiveOutput::Stream(mut nested)) => {
                while let Some(item) = nested.next().await {
                    match item {
                        Ok(chunk) => out.enqueue(chunk).await?,
                        Err(PipelineError::Aborted) => return Err(PipelineError::Aborted),
                        Err(err) => return Self::recursion_failed(&err, out).await,
                    }
                }
                Ok(())
            }
            Ok(RecursiveOutput::Text(text)) => {
                out.enqueue(StreamChunk::text_delta(text)).await?;
                Self::forward(finish, out).await
            }
            Err(PipelineError::Aborted) => Err(PipelineError::Aborted),
            Err(err) => Self::recursion_failed(&err, out).await,
        }
    }

    async fn recursion_failed(
        err: &PipelineError,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        warn!(error = %err, "Recursive tool call failed");
        out.enqueue(StreamChunk::text_delta(format!(
            "\n\n[tool call recursion failed: {err}]"
        )))
        .await?;
        out.enqueue(StreamChunk::finish(FinishReason::Error)).await
    }
}

#[async_trait]
impl StreamTransform for ToolCallEngine {
    async fn transform(
        &mut self,
        chunk: StreamChunk,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        match chunk {
            finish @ StreamChunk::Finish { .. } => self.on_terminal(Some(finish), out).await,
            StreamChunk::TextDelta { text } => {
                if self.state == EngineState::Streaming {
                    self.call.accumulated_text.push_str(&text);
                }
                out.enqueue(StreamChunk::TextDelta { text }).await
            }
            other => out.enqueue(other).await,
        }
    }

    async fn flush(&mut self, out: &mut TransformController) -> PipelineResult<()> {
        self.on_terminal(None, out).await
    }

    async fn flush_on_error(
        &mut self,
        _error: &PipelineError,
        _out: &mut TransformController,
    ) -> PipelineResult<()> {
        Ok(())
    }
}

/// Tools moved into the prompt by `transform_params` for this request
fn catalog(ctx: &RequestContext) -> Vec<ToolDefinition> {
    ctx.metadata_value(PROMPT_TOOLS_KEY)
        .and_then(|value| serde_json::from_value(value).ok())
        .unwrap_or_default()
}

/// Create the prompt tool-use plugin
#[must_use]
pub fn prompt_tool_plugin(config: PromptToolConfig) -> Plugin {
    let config = Arc::new(config);
    let params_config = Arc::clone(&config);

    Plugin::new(PROMPT_TOOL_PLUGIN)
        .transform_params(move |mut params: ModelParams, ctx: Arc<RequestContext>| {
            let config = Arc::clone(&params_config);
            async move {
                if !config.enabled {
                    return Ok(params);
                }
                let tools = match params.tools.take() {
                    Some(tools) if !tools.is_empty() => tools,
                    other => {
                        params.tools = other;
                        return Ok(params);
                    }
                };

                ctx.set_metadata(PROMPT_TOOLS_KEY, serde_json::to_value(&tools)?);
                let user_system = params.system.take().unwrap_or_default();
                params.system = Some(config.system_prompt(&user_system, &tools));
                debug!(
                    request_id = %ctx.request_id,
                    tools = tools.len(),
                    "Tools moved into the system prompt"
                );
                Ok(params)
            }
        })
        .transform_stream(move |_control, ctx: Arc<RequestContext>| {
            let tools = if config.enabled {
                catalog(&ctx)
            } else {
                Vec::new()
            };
            ToolCallEngine::new(Arc::clone(&config), ctx, tools)
        })
}
