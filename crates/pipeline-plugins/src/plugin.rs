//! Plugin descriptors.
//!
//! A [`Plugin`] is a named bundle of optional hooks. Each hook is an optional
//! field; the manager checks for presence explicitly before dispatching.
//! Plugins are immutable once built and cheap to clone.

use crate::transform::{StreamControl, StreamTransform};
use futures::future::{BoxFuture, FutureExt};
use pipeline_core::{
    GenerateResult, ModelParams, PipelineError, PipelineResult, RequestContext, RequestOutcome,
};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Hook that observes an event
pub type EventHook<A> =
    Arc<dyn Fn(Arc<RequestContext>, A) -> BoxFuture<'static, PipelineResult<()>> + Send + Sync>;

/// Hook that maps a value to the next value in a sequential reduction
pub type TransformHook<T> =
    Arc<dyn Fn(T, Arc<RequestContext>) -> BoxFuture<'static, PipelineResult<T>> + Send + Sync>;

/// Hook that may answer with a model id
pub type ResolveModelHook = Arc<
    dyn Fn(String, Arc<RequestContext>) -> BoxFuture<'static, PipelineResult<Option<String>>>
        + Send
        + Sync,
>;

/// Factory producing one transform unit per stream
pub type TransformFactory =
    Arc<dyn Fn(&StreamControl, Arc<RequestContext>) -> Box<dyn StreamTransform> + Send + Sync>;

/// Arguments of the `on_error` hook
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    /// Partial outcome, if the call got that far
    pub outcome: Option<RequestOutcome>,
    /// The failure
    pub error: PipelineError,
}

/// Ordering hint. Effective plugin order is `Pre`, then `Normal`, then `Post`,
/// each group in registration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Enforce {
    /// Runs before normal plugins
    Pre,
    /// Registration order
    #[default]
    Normal,
    /// Runs after normal plugins
    Post,
}

/// Names of the hooks a plugin may define
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// `on_request_start`
    OnRequestStart,
    /// `on_request_end`
    OnRequestEnd,
    /// `on_error`
    OnError,
    /// `transform_params`
    TransformParams,
    /// `transform_result`
    TransformResult,
    /// `transform_stream`
    TransformStream,
    /// `resolve_model`
    ResolveModel,
}

impl HookKind {
    /// All hook kinds
    pub const ALL: [Self; 7] = [
        Self::OnRequestStart,
        Self::OnRequestEnd,
        Self::OnError,
        Self::TransformParams,
        Self::TransformResult,
        Self::TransformStream,
        Self::ResolveModel,
    ];

    /// Hook name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnRequestStart => "on_request_start",
            Self::OnRequestEnd => "on_request_end",
            Self::OnError => "on_error",
            Self::TransformParams => "transform_params",
            Self::TransformResult => "transform_result",
            Self::TransformStream => "transform_stream",
            Self::ResolveModel => "resolve_model",
        }
    }
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, optional-capability bundle of hooks
#[derive(Clone)]
pub struct Plugin {
    name: String,
    enforce: Enforce,
    pub(crate) on_request_start: Option<EventHook<()>>,
    pub(crate) on_request_end: Option<EventHook<RequestOutcome>>,
    pub(crate) on_error: Option<EventHook<ErrorEvent>>,
    pub(crate) transform_params: Option<TransformHook<ModelParams>>,
    pub(crate) transform_result: Option<TransformHook<GenerateResult>>,
    pub(crate) transform_stream: Option<TransformFactory>,
    pub(crate) resolve_model: Option<ResolveModelHook>,
}

impl Plugin {
    /// Create a plugin with no hooks
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enforce: Enforce::Normal,
            on_request_start: None,
            on_request_end: None,
            on_error: None,
            transform_params: None,
            transform_result: None,
            transform_stream: None,
            resolve_model: None,
        }
    }

    /// Plugin name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordering hint
    #[must_use]
    pub fn enforce(&self) -> Enforce {
        self.enforce
    }

    /// Whether the plugin defines a hook
    #[must_use]
    pub fn has_hook(&self, hook: HookKind) -> bool {
        match hook {
            HookKind::OnRequestStart => self.on_request_start.is_some(),
            HookKind::OnRequestEnd => self.on_request_end.is_some(),
            HookKind::OnError => self.on_error.is_some(),
            HookKind::TransformParams => self.transform_params.is_some(),
            HookKind::TransformResult => self.transform_result.is_some(),
            HookKind::TransformStream => self.transform_stream.is_some(),
            HookKind::ResolveModel => self.resolve_model.is_some(),
        }
    }

    /// Hooks this plugin defines
    #[must_use]
    pub fn hooks(&self) -> Vec<HookKind> {
        HookKind::ALL
            .into_iter()
            .filter(|hook| self.has_hook(*hook))
            .collect()
    }

    /// Set the ordering hint
    #[must_use]
    pub fn with_enforce(mut self, enforce: Enforce) -> Self {
        self.enforce = enforce;
        self
    }

    /// Set the `on_request_start` hook
    #[must_use]
    pub fn on_request_start<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<()>> + Send + 'static,
    {
        self.on_request_start = Some(Arc::new(move |ctx: Arc<RequestContext>, (): ()| {
            hook(ctx).boxed()
        }));
        self
    }

    /// Set the `on_request_end` hook
    #[must_use]
    pub fn on_request_end<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<RequestContext>, RequestOutcome) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<()>> + Send + 'static,
    {
        self.on_request_end = Some(Arc::new(
            move |ctx: Arc<RequestContext>, outcome: RequestOutcome| hook(ctx, outcome).boxed(),
        ));
        self
    }

    /// Set the `on_error` hook
    #[must_use]
    pub fn on_error<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<RequestContext>, ErrorEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<()>> + Send + 'static,
    {
        self.on_error = Some(Arc::new(move |ctx: Arc<RequestContext>, event: ErrorEvent| {
            hook(ctx, event).boxed()
        }));
        self
    }

    /// Set the `transform_params` hook
    #[must_use]
    pub fn transform_params<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(ModelParams, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<ModelParams>> + Send + 'static,
    {
        self.transform_params = Some(Arc::new(
            move |params: ModelParams, ctx: Arc<RequestContext>| hook(params, ctx).boxed(),
        ));
        self
    }

    /// Set the `transform_result` hook
    #[must_use]
    pub fn transform_result<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(GenerateResult, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<GenerateResult>> + Send + 'static,
    {
        self.transform_result = Some(Arc::new(
            move |result: GenerateResult, ctx: Arc<RequestContext>| hook(result, ctx).boxed(),
        ));
        self
    }

    /// Set the `resolve_model` hook
    #[must_use]
    pub fn resolve_model<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(String, Arc<RequestContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PipelineResult<Option<String>>> + Send + 'static,
    {
        self.resolve_model = Some(Arc::new(move |alias: String, ctx: Arc<RequestContext>| {
            hook(alias, ctx).boxed()
        }));
        self
    }

    /// Set the `transform_stream` factory
    #[must_use]
    pub fn transform_stream<F, T>(mut self, factory: F) -> Self
    where
        F: Fn(&StreamControl, Arc<RequestContext>) -> T + Send + Sync + 'static,
        T: StreamTransform + 'static,
    {
        self.transform_stream = Some(Arc::new(
            move |control: &StreamControl, ctx: Arc<RequestContext>| {
                Box::new(factory(control, ctx)) as Box<dyn StreamTransform>
            },
        ));
        self
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("enforce", &self.enforce)
            .field("hooks", &self.hooks())
            .finish()
    }
}
