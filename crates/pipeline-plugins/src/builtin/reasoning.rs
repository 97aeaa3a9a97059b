//! Reasoning span instrumentation.
//!
//! A span opens on the first `reasoning` chunk and closes on the first chunk
//! of any other kind, or at end of stream. Closing a span inserts exactly one
//! `reasoning-signature` chunk right before the chunk that closed it.

use crate::plugin::Plugin;
use crate::transform::{StreamTransform, TransformController};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use pipeline_core::{PipelineError, PipelineResult, StreamChunk};
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Plugin name of [`reasoning_time_plugin`]
pub const REASONING_TIME_PLUGIN: &str = "built-in:reasoning-time";

/// Plugin name of [`smooth_reasoning_plugin`]
pub const SMOOTH_REASONING_PLUGIN: &str = "built-in:smooth-reasoning";

/// Plugin name of [`thinking_time_plugin`]
pub const THINKING_TIME_PLUGIN: &str = "built-in:thinking-time";

/// Default delay between smoothed reasoning pieces
pub const DEFAULT_SMOOTHING_DELAY: Duration = Duration::from_millis(20);

/// Default smoothing boundary: one CJK ideograph, or a word with its trailing
/// whitespace
pub const DEFAULT_CHUNK_PATTERN: &str = r"([\x{4E00}-\x{9FFF}])|\S+\s+";

static DEFAULT_CHUNKING: Lazy<Regex> =
    Lazy::new(|| Regex::new(DEFAULT_CHUNK_PATTERN).expect("default chunk pattern is valid"));

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Open reasoning span
#[derive(Debug, Default)]
struct ReasoningSpan {
    started: Option<Instant>,
    text: String,
}

impl ReasoningSpan {
    /// Add a reasoning fragment, opening the span if needed. Returns elapsed
    /// milliseconds since the span opened.
    fn extend(&mut self, fragment: &str) -> u64 {
        let started = *self.started.get_or_insert_with(Instant::now);
        self.text.push_str(fragment);
        millis(started.elapsed())
    }

    fn elapsed_millis(&self) -> u64 {
        self.started.map_or(0, |started| millis(started.elapsed()))
    }

    fn is_open(&self) -> bool {
        self.started.is_some()
    }

    /// Close the span, returning its text and total duration
    fn close(&mut self) -> Option<(String, u64)> {
        let started = self.started.take()?;
        Some((std::mem::take(&mut self.text), millis(started.elapsed())))
    }
}

/// Annotates reasoning chunks with elapsed time
#[derive(Debug, Default)]
pub struct ReasoningTimer {
    span: ReasoningSpan,
}

impl ReasoningTimer {
    async fn close_span(&mut self, out: &mut TransformController) -> PipelineResult<()> {
        if let Some((text, thinking_millis)) = self.span.close() {
            debug!(thinking_millis, "Reasoning span closed");
            out.enqueue(StreamChunk::ReasoningSignature {
                text,
                thinking_millis,
            })
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamTransform for ReasoningTimer {
    async fn transform(
        &mut self,
        chunk: StreamChunk,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        match chunk {
            StreamChunk::Reasoning { text, .. } => {
                let elapsed = self.span.extend(&text);
                out.enqueue(StreamChunk::Reasoning {
                    text,
                    thinking_millis: Some(elapsed),
                })
                .await
            }
            other => {
                self.close_span(out).await?;
                out.enqueue(other).await
            }
        }
    }

    async fn flush(&mut self, out: &mut TransformController) -> PipelineResult<()> {
        self.close_span(out).await
    }
}

/// Track reasoning spans: annotate each reasoning chunk with elapsed time and
/// emit a `reasoning-signature` when the span closes
#[must_use]
pub fn reasoning_time_plugin() -> Plugin {
    Plugin::new(REASONING_TIME_PLUGIN).transform_stream(|_, _| ReasoningTimer::default())
}

/// Smoothing settings
#[derive(Debug, Clone)]
pub struct SmoothingConfig {
    /// Pause after each emitted piece
    pub delay: Duration,
    /// Boundary of one piece
    pub pattern: Regex,
}

impl SmoothingConfig {
    /// Custom boundary pattern
    pub fn with_pattern(delay: Duration, pattern: &str) -> PipelineResult<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            PipelineError::Configuration(format!("invalid smoothing pattern: {e}"))
        })?;
        Ok(Self { delay, pattern })
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_SMOOTHING_DELAY,
            pattern: DEFAULT_CHUNKING.clone(),
        }
    }
}

/// Re-chunks reasoning text into word-sized pieces at a steady pace
#[derive(Debug)]
pub struct SmoothReasoning {
    config: Arc<SmoothingConfig>,
    span: ReasoningSpan,
    buffer: String,
}

impl SmoothReasoning {
    /// Create a unit with `config`
    #[must_use]
    pub fn new(config: Arc<SmoothingConfig>) -> Self {
        Self {
            config,
            span: ReasoningSpan::default(),
            buffer: String::new(),
        }
    }

    fn next_piece(&self) -> Option<usize> {
        self.config
            .pattern
            .find(&self.buffer)
            .map(|m| m.end())
            .filter(|end| *end > 0)
    }

    async fn drain_buffer(&mut self, out: &mut TransformController) -> PipelineResult<()> {
        if !self.buffer.is_empty() {
            let text = std::mem::take(&mut self.buffer);
            out.enqueue(StreamChunk::Reasoning {
                text,
                thinking_millis: Some(self.span.elapsed_millis()),
            })
            .await?;
        }
        Ok(())
    }

    async fn close_span(&mut self, out: &mut TransformController) -> PipelineResult<()> {
        self.drain_buffer(out).await?;
        if let Some((text, thinking_millis)) = self.span.close() {
            out.enqueue(StreamChunk::ReasoningSignature {
                text,
                thinking_millis,
            })
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl StreamTransform for SmoothReasoning {
    async fn transform(
        &mut self,
        chunk: StreamChunk,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        let text = match chunk {
            StreamChunk::Reasoning { text, .. } => text,
            other => {
                if self.span.is_open() {
                    self.close_span(out).await?;
                }
                return out.enqueue(other).await;
            }
        };

        self.span.extend(&text);
        self.buffer.push_str(&text);
        while let Some(end) = self.next_piece() {
            let piece: String = self.buffer.drain(..end).collect();
            out.enqueue(StreamChunk::Reasoning {
                text: piece,
                thinking_millis: Some(self.span.elapsed_millis()),
            })
            .await?;
            tokio::time::sleep(self.config.delay).await;
        }
        Ok(())
    }

    async fn flush(&mut self, out: &mut TransformController) -> PipelineResult<()> {
        self.close_span(out).await
    }
}

/// Smooth reasoning output and track its span
#[must_use]
pub fn smooth_reasoning_plugin(config: SmoothingConfig) -> Plugin {
    let config = Arc::new(config);
    Plugin::new(SMOOTH_REASONING_PLUGIN)
        .transform_stream(move |_, _| SmoothReasoning::new(Arc::clone(&config)))
}

/// Reported when a reasoning span closes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThinkingComplete {
    /// Reasoning text of the span
    pub text: String,
    /// Span duration
    pub millis: u64,
}

/// Callback of [`thinking_time_plugin`]
pub type ThinkingCallback = Arc<dyn Fn(ThinkingComplete) + Send + Sync>;

/// Observes reasoning spans without altering the stream
pub struct ThinkingObserver {
    span: ReasoningSpan,
    callback: ThinkingCallback,
}

impl ThinkingObserver {
    fn report(&mut self) {
        if let Some((text, millis)) = self.span.close() {
            (self.callback)(ThinkingComplete { text, millis });
        }
    }
}

#[async_trait]
impl StreamTransform for ThinkingObserver {
    async fn transform(
        &mut self,
        chunk: StreamChunk,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        match &chunk {
            StreamChunk::Reasoning { text, .. } => {
                self.span.extend(text);
            }
            _ => self.report(),
        }
        out.enqueue(chunk).await
    }

    async fn flush(&mut self, _out: &mut TransformController) -> PipelineResult<()> {
        self.report();
        Ok(())
    }
}

/// Report reasoning spans to `callback`, forwarding every chunk unchanged
#[must_use]
pub fn thinking_time_plugin<F>(callback: F) -> Plugin
where
    F: Fn(ThinkingComplete) + Send + Sync + 'static,
{
    let callback: ThinkingCallback = Arc::new(callback);
    Plugin::new(THINKING_TIME_PLUGIN).transform_stream(move |_, _| ThinkingObserver {
        span: ReasoningSpan::default(),
        callback: Arc::clone(&callback),
    })
}
