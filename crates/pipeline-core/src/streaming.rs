//! Streaming types.
//!
//! A model backend produces a [`ChunkStream`]: a lazy, finite, single-use
//! sequence of [`StreamChunk`]s. An `Err` item is the terminal error signal;
//! nothing after it is meaningful.

use crate::error::PipelineResult;
use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Boxed stream of chunks produced by a backend or a transform chain
pub type ChunkStream = Pin<Box<dyn Stream<Item = PipelineResult<StreamChunk>> + Send>>;

/// Build a chunk stream from an in-memory list of chunks
pub fn chunk_stream(chunks: Vec<StreamChunk>) -> ChunkStream {
    stream::iter(chunks.into_iter().map(Ok)).boxed()
}

/// One unit of model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamChunk {
    /// Incremental answer text
    TextDelta {
        /// Text fragment
        text: String,
    },
    /// Incremental reasoning text
    Reasoning {
        /// Reasoning fragment
        text: String,
        /// Elapsed time since the reasoning span started
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thinking_millis: Option<u64>,
    },
    /// Emitted once when a reasoning span closes
    ReasoningSignature {
        /// Whole reasoning text of the span
        text: String,
        /// Total span duration
        thinking_millis: u64,
    },
    /// A tool invocation, either native or detected in prompt mode
    ToolCall {
        /// Tool call identifier
        tool_call_id: String,
        /// Tool name
        tool_name: String,
        /// Arguments as JSON
        arguments: serde_json::Value,
    },
    /// End of the model turn
    Finish {
        /// Why generation stopped
        finish_reason: FinishReason,
        /// Token usage, if reported
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    /// Non-fatal error reported in-band by the backend
    Error {
        /// Error message
        message: String,
    },
}

/// Discriminant of a [`StreamChunk`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChunkKind {
    /// `text-delta`
    TextDelta,
    /// `reasoning`
    Reasoning,
    /// `reasoning-signature`
    ReasoningSignature,
    /// `tool-call`
    ToolCall,
    /// `finish`
    Finish,
    /// `error`
    Error,
}

impl StreamChunk {
    /// Create a text delta chunk
    #[must_use]
    pub fn text_delta(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    /// Create a reasoning chunk without timing
    #[must_use]
    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::Reasoning {
            text: text.into(),
            thinking_millis: None,
        }
    }

    /// Create a finish chunk without usage
    #[must_use]
    pub fn finish(finish_reason: FinishReason) -> Self {
        Self::Finish {
            finish_reason,
            usage: None,
        }
    }

    /// Get the chunk kind
    #[must_use]
    pub fn kind(&self) -> ChunkKind {
        match self {
            Self::TextDelta { .. } => ChunkKind::TextDelta,
            Self::Reasoning { .. } => ChunkKind::Reasoning,
            Self::ReasoningSignature { .. } => ChunkKind::ReasoningSignature,
            Self::ToolCall { .. } => ChunkKind::ToolCall,
            Self::Finish { .. } => ChunkKind::Finish,
            Self::Error { .. } => ChunkKind::Error,
        }
    }

    /// Text payload of a text delta
    #[must_use]
    pub fn as_text_delta(&self) -> Option<&str> {
        match self {
            Self::TextDelta { text } => Some(text),
            _ => None,
        }
    }

    /// Check if this is a finish chunk
    #[must_use]
    pub fn is_finish(&self) -> bool {
        matches!(self, Self::Finish { .. })
    }
}

/// Reason a model stopped generating
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    /// Natural stop
    Stop,
    /// Token limit reached
    Length,
    /// Model requested tool calls
    ToolCalls,
    /// Content was filtered
    ContentFilter,
    /// Generation failed
    Error,
    /// Anything else
    Other,
}

/// Token usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u32,
    /// Completion tokens
    pub completion_tokens: u32,
    /// Total tokens
    pub total_tokens: u32,
}

impl Usage {
    /// Create usage, computing the total
    #[must_use]
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

impl std::ops::Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}
