//! Request lifecycle logging.

use crate::plugin::{Enforce, ErrorEvent, Plugin};
use pipeline_core::{RequestContext, RequestOutcome};
use std::sync::Arc;
use tracing::{error, info};

/// Plugin name of [`logging_plugin`]
pub const LOGGING_PLUGIN: &str = "built-in:logging";

fn outcome_kind(outcome: &RequestOutcome) -> &'static str {
    match outcome {
        RequestOutcome::Streaming => "streaming",
        RequestOutcome::Generated(_) => "generated",
        RequestOutcome::Embeddings { .. } => "embeddings",
        RequestOutcome::Images { .. } => "images",
    }
}

/// Log request start, end and failure through `tracing`
#[must_use]
pub fn logging_plugin() -> Plugin {
    Plugin::new(LOGGING_PLUGIN)
        .with_enforce(Enforce::Pre)
        .on_request_start(|ctx: Arc<RequestContext>| async move {
            info!(
                request_id = %ctx.request_id,
                provider = %ctx.provider_id,
                model = %ctx.model_id,
                depth = ctx.recursion_depth,
                "Request started"
            );
            Ok(())
        })
        .on_request_end(|ctx: Arc<RequestContext>, outcome: RequestOutcome| async move {
            info!(
                request_id = %ctx.request_id,
                provider = %ctx.provider_id,
                outcome = outcome_kind(&outcome),
                duration_ms = ctx.elapsed().as_millis(),
                "Request completed"
            );
            Ok(())
        })
        .on_error(|ctx: Arc<RequestContext>, event: ErrorEvent| async move {
            error!(
                request_id = %ctx.request_id,
                provider = %ctx.provider_id,
                error_type = event.error.error_type(),
                error = %event.error,
                duration_ms = ctx.elapsed().as_millis(),
                "Request failed"
            );
            Ok(())
        })
}
