//! Plugin manager.
//!
//! Holds the ordered plugin list and dispatches hooks with one of three
//! strategies:
//!
//! - **parallel** (`on_request_start`, `on_request_end`, `on_error`): every
//!   defining plugin runs concurrently; failures and panics are isolated
//! - **sequential reduce** (`transform_params`, `transform_result`): each
//!   plugin receives the previous plugin's output
//! - **first non-empty** (`resolve_model`): first answer in order wins

use crate::plugin::{Enforce, ErrorEvent, HookKind, Plugin, TransformHook};
use crate::transform::NamedTransform;
use futures::future::{join_all, BoxFuture, FutureExt};
use pipeline_core::{
    GenerateResult, ModelParams, PipelineError, PipelineResult, RequestContext, RequestOutcome,
};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, instrument, warn};

/// Event dispatched with the parallel strategy
#[derive(Debug, Clone)]
pub enum ParallelEvent {
    /// Before anything else happens
    RequestStart,
    /// After the call produced its outcome
    RequestEnd(RequestOutcome),
    /// After the call failed
    Error(ErrorEvent),
}

impl ParallelEvent {
    /// Hook that handles this event
    #[must_use]
    pub fn hook(&self) -> HookKind {
        match self {
            Self::RequestStart => HookKind::OnRequestStart,
            Self::RequestEnd(_) => HookKind::OnRequestEnd,
            Self::Error(_) => HookKind::OnError,
        }
    }
}

/// One plugin's failure during parallel dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginFailure {
    /// Plugin name
    pub plugin: String,
    /// What went wrong
    pub error: PipelineError,
}

/// Outcome of a parallel dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParallelReport {
    /// Plugins that defined the hook
    pub invoked: usize,
    /// Plugins whose hook failed or panicked
    pub failures: Vec<PluginFailure>,
}

impl ParallelReport {
    /// Whether every hook succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Summary of registered plugins
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginStats {
    /// Total plugins
    pub total: usize,
    /// Plugins per ordering group
    pub by_enforce: HashMap<Enforce, usize>,
    /// Plugins defining each hook
    pub by_hook: HashMap<HookKind, usize>,
}

/// Ordered collection of plugins with hook dispatch
#[derive(Debug, Clone, Default)]
pub struct PluginManager {
    plugins: Vec<Plugin>,
}

impl PluginManager {
    /// Create a manager.
    ///
    /// Order is `Pre`, `Normal`, `Post`; registration order is kept within
    /// each group. Duplicate names are rejected.
    pub fn new(plugins: Vec<Plugin>) -> PipelineResult<Self> {
        let mut manager = Self::default();
        for plugin in plugins {
            manager.use_plugin(plugin)?;
        }
        Ok(manager)
    }

    /// Add a plugin at the end of its ordering group
    pub fn use_plugin(&mut self, plugin: Plugin) -> PipelineResult<()> {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            return Err(PipelineError::DuplicatePlugin(plugin.name().to_string()));
        }
        let position = self
            .plugins
            .iter()
            .position(|p| p.enforce() > plugin.enforce())
            .unwrap_or(self.plugins.len());
        debug!(plugin = %plugin.name(), position, "Plugin registered");
        self.plugins.insert(position, plugin);
        Ok(())
    }

    /// Remove a plugin by name. Returns whether it was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|p| p.name() != name);
        before != self.plugins.len()
    }

    /// Plugins in effective order
    #[must_use]
    pub fn plugins(&self) -> &[Plugin] {
        &self.plugins
    }

    /// Look up a plugin by name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    /// Number of plugins
    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Whether no plugin is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Registration statistics
    #[must_use]
    pub fn stats(&self) -> PluginStats {
        let mut stats = PluginStats {
            total: self.plugins.len(),
            ..Default::default()
        };
        for plugin in &self.plugins {
            *stats.by_enforce.entry(plugin.enforce()).or_default() += 1;
            for hook in plugin.hooks() {
                *stats.by_hook.entry(hook).or_default() += 1;
            }
        }
        stats
    }

    /// Run an event hook on every plugin concurrently.
    ///
    /// Resolves once all hooks settled. A failing or panicking hook is logged
    /// and reported; it never affects its siblings.
    #[instrument(skip_all, fields(request_id = %ctx.request_id, hook = %event.hook()))]
    pub async fn execute_parallel(
        &self,
        event: ParallelEvent,
        ctx: &Arc<RequestContext>,
    ) -> ParallelReport {
        let hook_kind = event.hook();
        let mut names = Vec::new();
        let mut calls: Vec<BoxFuture<'static, PipelineResult<()>>> = Vec::new();

        for plugin in &self.plugins {
            let ctx = Arc::clone(ctx);
            let call = match &event {
                ParallelEvent::RequestStart => plugin.on_request_start.clone().map(|hook| {
                    async move { hook(ctx, ()).await }.boxed()
                }),
                ParallelEvent::RequestEnd(outcome) => {
                    let outcome = outcome.clone();
                    plugin.on_request_end.clone().map(|hook| {
                        async move { hook(ctx, outcome).await }.boxed()
                    })
                }
                ParallelEvent::Error(error_event) => {
                    let error_event = error_event.clone();
                    plugin.on_error.clone().map(|hook| {
                        async move { hook(ctx, error_event).await }.boxed()
                    })
                }
            };
            if let Some(call) = call {
                names.push(plugin.name().to_string());
                calls.push(call);
            }
        }

        let results = join_all(
            calls
                .into_iter()
                .map(|call| AssertUnwindSafe(call).catch_unwind()),
        )
        .await;

        let mut report = ParallelReport {
            invoked: names.len(),
            failures: Vec::new(),
        };
        for (plugin, result) in names.into_iter().zip(results) {
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(panic) => PipelineError::plugin(
                    &plugin,
                    hook_kind.as_str(),
                    format!("panicked: {}", panic_message(&*panic)),
                ),
            };
            error!(plugin = %plugin, hook = %hook_kind, error = %error, "Plugin hook failed");
            report.failures.push(PluginFailure { plugin, error });
        }
        report
    }

    async fn execute_sequential<T, S>(
        &self,
        hook_kind: HookKind,
        initial: T,
        ctx: &Arc<RequestContext>,
        select: S,
    ) -> T
    where
        T: Clone + Send + 'static,
        S: Fn(&Plugin) -> Option<&TransformHook<T>>,
    {
        let mut value = initial;
        for plugin in &self.plugins {
            let Some(hook) = select(plugin) else {
                continue;
            };
            let hook = Arc::clone(hook);
            let fallback = value.clone();
            let ctx = Arc::clone(ctx);
            let call = async move { hook(value, ctx).await };

            value = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(next)) => next,
                Ok(Err(err)) => {
                    warn!(
                        plugin = %plugin.name(),
                        hook = %hook_kind,
                        error = %err,
                        "Plugin hook failed, keeping previous value"
                    );
                    fallback
                }
                Err(panic) => {
                    warn!(
                        plugin = %plugin.name(),
                        hook = %hook_kind,
                        panic = %panic_message(&*panic),
                        "Plugin hook panicked, keeping previous value"
                    );
                    fallback
                }
            };
        }
        value
    }

    /// Reduce parameters through every `transform_params` hook in order
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn transform_params(
        &self,
        params: ModelParams,
        ctx: &Arc<RequestContext>,
    ) -> ModelParams {
        self.execute_sequential(HookKind::TransformParams, params, ctx, |p| {
            p.transform_params.as_ref()
        })
        .await
    }

    /// Reduce a result through every `transform_result` hook in order
    #[instrument(skip_all, fields(request_id = %ctx.request_id))]
    pub async fn transform_result(
        &self,
        result: GenerateResult,
        ctx: &Arc<RequestContext>,
    ) -> GenerateResult {
        self.execute_sequential(HookKind::TransformResult, result, ctx, |p| {
            p.transform_result.as_ref()
        })
        .await
    }

    /// First non-empty `resolve_model` answer in order, or `default`
    #[instrument(skip_all, fields(request_id = %ctx.request_id, alias = %alias))]
    pub async fn resolve_model(
        &self,
        alias: &str,
        ctx: &Arc<RequestContext>,
        default: impl Into<String>,
    ) -> String {
        for plugin in &self.plugins {
            let Some(hook) = plugin.resolve_model.clone() else {
                continue;
            };
            let alias = alias.to_string();
            let ctx = Arc::clone(ctx);
            let call = async move { hook(alias, ctx).await };

            match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(Some(model))) if !model.is_empty() => {
                    debug!(plugin = %plugin.name(), model = %model, "Model alias resolved");
                    return model;
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => {
                    warn!(plugin = %plugin.name(), error = %err, "resolve_model hook failed");
                }
                Err(panic) => {
                    warn!(
                        plugin = %plugin.name(),
                        panic = %panic_message(&*panic),
                        "resolve_model hook panicked"
                    );
                }
            }
        }
        default.into()
    }

    /// Every `transform_stream` factory in order
    #[must_use]
    pub fn collect_stream_transforms(&self) -> Vec<NamedTransform> {
        self.plugins
            .iter()
            .filter_map(|plugin| {
                plugin.transform_stream.clone().map(|factory| NamedTransform {
                    plugin: plugin.name().to_string(),
                    factory,
                })
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
