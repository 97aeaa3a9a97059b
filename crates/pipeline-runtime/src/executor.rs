//! Pipeline executor.

use crate::config::RuntimeConfig;
use crate::result::StreamTextResult;
use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use pipeline_config::PipelineConfig;
use pipeline_core::{
    AbortSignal, GenerateResult, GeneratedImage, ModelParams, PipelineError, PipelineResult,
    RecursiveCall, RecursiveOutput, RequestContext, RequestOutcome,
};
use pipeline_plugins::builtin::{
    prompt_tool_plugin, smooth_reasoning_plugin, PromptToolConfig, ToolExecutor,
};
use pipeline_plugins::{
    ErrorEvent, ParallelEvent, Plugin, PluginManager, StreamControl, StreamTransformChain,
};
use pipeline_providers::{ModelResolver, ProviderRegistry};
use pipeline_telemetry::pipeline_request_span;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, Instrument};

/// Drives calls through the plugin pipeline.
///
/// Cheap to clone; clones share the registry and the plugin set. Plugin
/// changes apply to calls started afterwards.
#[derive(Clone)]
pub struct RuntimeExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    resolver: ModelResolver,
    fallback_provider: String,
    plugins: ArcSwap<PluginManager>,
    plugin_lock: Mutex<()>,
    config: RuntimeConfig,
}

impl RuntimeExecutor {
    /// Start building an executor over `registry`.
    ///
    /// Model ids without a provider namespace resolve against
    /// `fallback_provider`.
    pub fn builder(
        registry: ProviderRegistry,
        fallback_provider: impl Into<String>,
    ) -> ExecutorBuilder {
        ExecutorBuilder {
            registry,
            fallback_provider: fallback_provider.into(),
            plugins: Vec::new(),
            config: RuntimeConfig::default(),
            prompt_tools: None,
            smooth_reasoning: false,
        }
    }

    /// Builder seeded from a loaded [`PipelineConfig`].
    ///
    /// The registry separator must match the configured one.
    pub fn from_config(
        registry: ProviderRegistry,
        config: &PipelineConfig,
    ) -> PipelineResult<ExecutorBuilder> {
        if registry.separator() != config.registry.separator {
            return Err(PipelineError::Configuration(format!(
                "registry separator '{}' does not match configured '{}'",
                registry.separator(),
                config.registry.separator
            )));
        }
        let fallback = config.registry.fallback_provider.clone().ok_or_else(|| {
            PipelineError::Configuration("registry.fallback_provider is not set".to_string())
        })?;
        Ok(Self::builder(registry, fallback).with_config(RuntimeConfig::from(config)))
    }

    /// The registry models are resolved against
    pub fn registry(&self) -> &ProviderRegistry {
        self.inner.resolver.registry()
    }

    /// Current settings
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Snapshot of the current plugin set
    pub fn plugins(&self) -> Arc<PluginManager> {
        self.inner.plugins.load_full()
    }

    /// Add a plugin for subsequent calls
    pub fn use_plugin(&self, plugin: Plugin) -> PipelineResult<()> {
        self.update_plugins(|plugins| plugins.use_plugin(plugin))
    }

    /// Remove a plugin by name
    pub fn remove_plugin(&self, name: &str) -> bool {
        let mut removed = false;
        // The closure never fails.
        let _ = self.update_plugins(|plugins| {
            removed = plugins.remove(name);
            Ok(())
        });
        removed
    }

    /// Install prompt-mode tool calling backed by `executor`, using the
    /// recursion limit and markers of this executor's settings
    pub fn with_prompt_tools(&self, executor: Arc<dyn ToolExecutor>) -> PipelineResult<()> {
        let config = prompt_tool_config(&self.inner.config, PromptToolConfig::new(executor))?;
        self.use_plugin(prompt_tool_plugin(config))
    }

    fn update_plugins<F>(&self, update: F) -> PipelineResult<()>
    where
        F: FnOnce(&mut PluginManager) -> PipelineResult<()>,
    {
        let _guard = self.inner.plugin_lock.lock();
        let mut next = PluginManager::clone(&self.inner.plugins.load());
        update(&mut next)?;
        debug!(plugins = next.len(), "Plugin set updated");
        self.inner.plugins.store(Arc::new(next));
        Ok(())
    }

    /// Stream a text generation through the pipeline
    pub async fn stream_text(
        &self,
        model_id: &str,
        params: ModelParams,
    ) -> PipelineResult<StreamTextResult> {
        self.stream_text_with(model_id, params, AbortSignal::new())
            .await
    }

    /// Stream a text generation bound to a caller-owned abort signal
    pub async fn stream_text_with(
        &self,
        model_id: &str,
        params: ModelParams,
        abort: AbortSignal,
    ) -> PipelineResult<StreamTextResult> {
        stream_at_depth(
            Arc::clone(&self.inner),
            model_id.to_string(),
            params,
            0,
            abort,
        )
        .await
    }

    /// Run a text generation to completion.
    ///
    /// The stream is drained through the transform chain, folded, and passed
    /// through `transform_result` hooks.
    pub async fn generate_text(
        &self,
        model_id: &str,
        params: ModelParams,
    ) -> PipelineResult<GenerateResult> {
        let opened = open_stream(
            Arc::clone(&self.inner),
            model_id.to_string(),
            params,
            0,
            AbortSignal::new(),
        )
        .await?;
        let ctx = Arc::clone(opened.context());
        let plugins = Arc::clone(opened.plugins());
        let span = pipeline_request_span!(ctx.request_id, model_id, ctx.recursion_depth);

        async move {
            match opened.collect().await {
                Ok(result) => {
                    plugins
                        .execute_parallel(
                            ParallelEvent::RequestEnd(RequestOutcome::Generated(result.clone())),
                            &ctx,
                        )
                        .await;
                    info!(
                        finish_reason = ?result.finish_reason,
                        duration_ms = ctx.elapsed().as_millis() as u64,
                        "Text generation completed"
                    );
                    Ok(result)
                }
                Err(err) => {
                    report_error(&plugins, &ctx, err.clone()).await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Embed `values` with an embedding model
    pub async fn embed(
        &self,
        model_id: &str,
        values: Vec<String>,
    ) -> PipelineResult<Vec<Vec<f32>>> {
        let (ctx, plugins) = self.begin(model_id, ModelParams::default()).await;
        let span = pipeline_request_span!(ctx.request_id, model_id, 0u32);

        async move {
            let resolved = plugins.resolve_model(model_id, &ctx, model_id).await;
            let result = match self
                .inner
                .resolver
                .resolve_embedding_model(&resolved, &self.inner.fallback_provider)
            {
                Ok(model) => model.embed(values).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(vectors) => {
                    plugins
                        .execute_parallel(
                            ParallelEvent::RequestEnd(RequestOutcome::Embeddings {
                                count: vectors.len(),
                            }),
                            &ctx,
                        )
                        .await;
                    Ok(vectors)
                }
                Err(err) => {
                    report_error(&plugins, &ctx, err.clone()).await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Generate `n` images for `prompt`
    pub async fn generate_image(
        &self,
        model_id: &str,
        prompt: &str,
        n: u32,
    ) -> PipelineResult<Vec<GeneratedImage>> {
        let params = ModelParams::builder()
            .message(pipeline_core::ChatMessage::user(prompt))
            .build();
        let (ctx, plugins) = self.begin(model_id, params).await;
        let span = pipeline_request_span!(ctx.request_id, model_id, 0u32);

        async move {
            let resolved = plugins.resolve_model(model_id, &ctx, model_id).await;
            let result = match self
                .inner
                .resolver
                .resolve_image_model(&resolved, &self.inner.fallback_provider)
            {
                Ok(model) => model.generate(prompt.to_string(), n).await,
                Err(err) => Err(err),
            };
            match result {
                Ok(images) => {
                    plugins
                        .execute_parallel(
                            ParallelEvent::RequestEnd(RequestOutcome::Images {
                                count: images.len(),
                            }),
                            &ctx,
                        )
                        .await;
                    Ok(images)
                }
                Err(err) => {
                    report_error(&plugins, &ctx, err.clone()).await;
                    Err(err)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn begin(
        &self,
        model_id: &str,
        params: ModelParams,
    ) -> (Arc<RequestContext>, Arc<PluginManager>) {
        let plugins = self.plugins();
        let ctx = Arc::new(build_context(
            &self.inner,
            model_id,
            params,
            0,
            AbortSignal::new(),
        ));
        plugins
            .execute_parallel(ParallelEvent::RequestStart, &ctx)
            .await;
        (ctx, plugins)
    }
}

impl fmt::Debug for RuntimeExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeExecutor")
            .field("fallback_provider", &self.inner.fallback_provider)
            .field("providers", &self.registry().list_ids())
            .field("plugins", &self.inner.plugins.load().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

/// Builder for [`RuntimeExecutor`]
pub struct ExecutorBuilder {
    registry: ProviderRegistry,
    fallback_provider: String,
    plugins: Vec<Plugin>,
    config: RuntimeConfig,
    prompt_tools: Option<PromptToolConfig>,
    smooth_reasoning: bool,
}

impl ExecutorBuilder {
    /// Add a plugin
    #[must_use]
    pub fn with_plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Add several plugins in order
    #[must_use]
    pub fn with_plugins(mut self, plugins: impl IntoIterator<Item = Plugin>) -> Self {
        self.plugins.extend(plugins);
        self
    }

    /// Replace the settings
    #[must_use]
    pub fn with_config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Enable prompt-mode tool calling.
    ///
    /// Recursion limit, markers and the enabled flag are taken from the
    /// executor settings at build time.
    #[must_use]
    pub fn with_prompt_tools(mut self, config: PromptToolConfig) -> Self {
        self.prompt_tools = Some(config);
        self
    }

    /// Add the reasoning smoothing plugin with the configured delay and pattern
    #[must_use]
    pub fn with_smooth_reasoning(mut self) -> Self {
        self.smooth_reasoning = true;
        self
    }

    /// Build the executor
    pub fn build(self) -> PipelineResult<RuntimeExecutor> {
        if self.fallback_provider.is_empty() {
            return Err(PipelineError::Configuration(
                "fallback provider id must not be empty".to_string(),
            ));
        }

        let mut plugins = self.plugins;
        if self.smooth_reasoning {
            plugins.push(smooth_reasoning_plugin(self.config.smoothing()?));
        }
        if let Some(tools) = self.prompt_tools {
            plugins.push(prompt_tool_plugin(prompt_tool_config(&self.config, tools)?));
        }
        let manager = PluginManager::new(plugins)?;

        info!(
            fallback_provider = %self.fallback_provider,
            plugins = manager.len(),
            max_recursion_depth = self.config.max_recursion_depth,
            "Runtime executor built"
        );

        Ok(RuntimeExecutor {
            inner: Arc::new(ExecutorInner {
                resolver: ModelResolver::new(self.registry),
                fallback_provider: self.fallback_provider,
                plugins: ArcSwap::from_pointee(manager),
                plugin_lock: Mutex::new(()),
                config: self.config,
            }),
        })
    }
}

impl fmt::Debug for ExecutorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorBuilder")
            .field("fallback_provider", &self.fallback_provider)
            .field("plugins", &self.plugins.len())
            .field("config", &self.config)
            .field("prompt_tools", &self.prompt_tools.is_some())
            .field("smooth_reasoning", &self.smooth_reasoning)
            .finish_non_exhaustive()
    }
}

fn prompt_tool_config(
    runtime: &RuntimeConfig,
    config: PromptToolConfig,
) -> PipelineResult<PromptToolConfig> {
    Ok(config
        .with_max_recursion_depth(runtime.max_recursion_depth)
        .with_classifier(runtime.classifier()?)
        .with_enabled(runtime.tool_calling_enabled))
}

/// Provider id the call is addressed to, for context bookkeeping
fn provider_and_model(inner: &ExecutorInner, model_id: &str) -> (String, String) {
    let full_id = inner
        .resolver
        .namespaced_id(model_id, &inner.fallback_provider);
    match inner.resolver.registry().split_id(&full_id) {
        Ok((provider, model)) => (provider.to_string(), model.to_string()),
        Err(_) => (inner.fallback_provider.clone(), model_id.to_string()),
    }
}

fn build_context(
    inner: &Arc<ExecutorInner>,
    model_id: &str,
    params: ModelParams,
    depth: u32,
    abort: AbortSignal,
) -> RequestContext {
    let (provider, model) = provider_and_model(inner, model_id);

    let recursion_inner = Arc::clone(inner);
    let recursion_model = model_id.to_string();
    let recursion_abort = abort.clone();
    let recursive_call: RecursiveCall = Arc::new(move |params: ModelParams| {
        let inner = Arc::clone(&recursion_inner);
        let model_id = recursion_model.clone();
        let abort = recursion_abort.clone();
        async move {
            let nested = stream_at_depth(inner, model_id, params, depth + 1, abort).await?;
            Ok(RecursiveOutput::Stream(nested.into_stream()))
        }
        .boxed()
    });

    RequestContext::new(provider, model, params)
        .with_depth(depth)
        .with_abort(abort)
        .with_recursive_call(recursive_call)
}

async fn report_error(plugins: &PluginManager, ctx: &Arc<RequestContext>, error: PipelineError) {
    plugins
        .execute_parallel(
            ParallelEvent::Error(ErrorEvent {
                outcome: None,
                error,
            }),
            ctx,
        )
        .await;
}

/// Open a stream and report it to `on_request_end` as handed out
fn stream_at_depth(
    inner: Arc<ExecutorInner>,
    model_id: String,
    params: ModelParams,
    depth: u32,
    abort: AbortSignal,
) -> BoxFuture<'static, PipelineResult<StreamTextResult>> {
    async move {
        let opened = open_stream(inner, model_id, params, depth, abort).await?;
        let ctx = Arc::clone(opened.context());
        opened
            .plugins()
            .execute_parallel(ParallelEvent::RequestEnd(RequestOutcome::Streaming), &ctx)
            .await;
        Ok(opened)
    }
    .boxed()
}

/// Run every step up to and including stream composition
fn open_stream(
    inner: Arc<ExecutorInner>,
    model_id: String,
    params: ModelParams,
    depth: u32,
    abort: AbortSignal,
) -> BoxFuture<'static, PipelineResult<StreamTextResult>> {
    async move {
        let plugins = inner.plugins.load_full();
        let ctx = Arc::new(build_context(
            &inner,
            &model_id,
            params.clone(),
            depth,
            abort.clone(),
        ));
        let span = pipeline_request_span!(ctx.request_id, model_id, depth);

        async move {
            plugins
                .execute_parallel(ParallelEvent::RequestStart, &ctx)
                .await;

            let resolved = plugins.resolve_model(&model_id, &ctx, model_id.as_str()).await;
            let params = plugins.transform_params(params, &ctx).await;

            let model = match inner
                .resolver
                .resolve_language_model(&resolved, &inner.fallback_provider)
            {
                Ok(model) => model,
                Err(err) => {
                    report_error(&plugins, &ctx, err.clone()).await;
                    return Err(err);
                }
            };

            let source = match model.stream(params, abort.clone()).await {
                Ok(source) => source,
                Err(err) => {
                    report_error(&plugins, &ctx, err.clone()).await;
                    return Err(err);
                }
            };

            let control = StreamControl::new(abort);
            let chain = StreamTransformChain::new(plugins.collect_stream_transforms())
                .with_capacity(inner.config.channel_capacity);
            let stream = chain.apply(source, &control, &ctx);

            debug!(
                provider = %model.provider_id(),
                model = %model.model_id(),
                stages = chain.len(),
                "Stream opened"
            );
            Ok(StreamTextResult::new(ctx, plugins, control, stream))
        }
        .instrument(span)
        .await
    }
    .boxed()
}
