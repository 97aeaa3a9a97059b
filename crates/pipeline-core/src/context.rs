//! Per-invocation request context.
//!
//! A [`RequestContext`] is created for every top-level call and for every
//! recursive re-invocation made by the tool-call engine. It is shared as
//! `Arc<RequestContext>` among the hooks of that one invocation only.

use crate::error::PipelineResult;
use crate::request::ModelParams;
use crate::streaming::ChunkStream;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;

/// Metadata key mirroring [`RequestContext::recursion_depth`]
pub const RECURSION_DEPTH_KEY: &str = "recursionDepth";

/// Cancellation signal shared by a request and all its recursive calls
#[derive(Clone)]
pub struct AbortSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortSignal {
    /// Create a signal that has not fired
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the signal. Idempotent.
    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the signal has fired
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the signal fires
    pub async fn aborted(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on abort.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for AbortSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

/// Result of re-running the pipeline from inside a stream transform
pub enum RecursiveOutput {
    /// A nested stream to drain
    Stream(ChunkStream),
    /// Precomputed text
    Text(String),
}

impl fmt::Debug for RecursiveOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("RecursiveOutput::Stream(..)"),
            Self::Text(text) => f.debug_tuple("RecursiveOutput::Text").field(text).finish(),
        }
    }
}

/// Handle that re-runs the whole pipeline one recursion level deeper
pub type RecursiveCall =
    Arc<dyn Fn(ModelParams) -> BoxFuture<'static, PipelineResult<RecursiveOutput>> + Send + Sync>;

/// Identifying and mutable metadata threaded through every hook of one call
pub struct RequestContext {
    /// Unique id for this invocation
    pub request_id: String,
    /// Provider the call is addressed to
    pub provider_id: String,
    /// Model id as requested by the caller
    pub model_id: String,
    /// Parameters as supplied by the caller, before any transform
    pub original_params: ModelParams,
    /// Free-form metadata plugins may read and write
    pub metadata: DashMap<String, serde_json::Value>,
    /// Monotonic start time
    pub started_at: Instant,
    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
    /// Number of prompt-mode tool round trips above this call
    pub recursion_depth: u32,
    /// Cancellation signal shared with nested calls
    pub abort: AbortSignal,
    recursive_call: Option<RecursiveCall>,
}

impl RequestContext {
    /// Create a top-level context
    #[must_use]
    pub fn new(
        provider_id: impl Into<String>,
        model_id: impl Into<String>,
        original_params: ModelParams,
    ) -> Self {
        let provider_id = provider_id.into();
        let model_id = model_id.into();
        let request_id = format!("{provider_id}-{model_id}-{}", uuid::Uuid::new_v4());
        let metadata = DashMap::new();
        metadata.insert(RECURSION_DEPTH_KEY.to_string(), serde_json::json!(0));

        Self {
            request_id,
            provider_id,
            model_id,
            original_params,
            metadata,
            started_at: Instant::now(),
            created_at: Utc::now(),
            recursion_depth: 0,
            abort: AbortSignal::new(),
            recursive_call: None,
        }
    }

    /// Set the recursion depth
    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.recursion_depth = depth;
        self.metadata
            .insert(RECURSION_DEPTH_KEY.to_string(), serde_json::json!(depth));
        self
    }

    /// Share an existing abort signal
    #[must_use]
    pub fn with_abort(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Install the handle used to recurse into the pipeline
    #[must_use]
    pub fn with_recursive_call(mut self, call: RecursiveCall) -> Self {
        self.recursive_call = Some(call);
        self
    }

    /// Seed a metadata entry
    #[must_use]
    pub fn with_metadata(self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Recursion handle, if this invocation can recurse
    #[must_use]
    pub fn recursive_call(&self) -> Option<&RecursiveCall> {
        self.recursive_call.as_ref()
    }

    /// Set a metadata entry
    pub fn set_metadata(&self, key: impl Into<String>, value: serde_json::Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Read a metadata entry
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<serde_json::Value> {
        self.metadata.get(key).map(|v| v.value().clone())
    }

    /// Time since the context was created
    #[must_use]
    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("provider_id", &self.provider_id)
            .field("model_id", &self.model_id)
            .field("recursion_depth", &self.recursion_depth)
            .field("abort", &self.abort)
            .field("can_recurse", &self.recursive_call.is_some())
            .finish_non_exhaustive()
    }
}
