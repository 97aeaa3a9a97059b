//! Response types.

use crate::error::{PipelineError, PipelineResult};
use crate::streaming::{FinishReason, StreamChunk, Usage};
use serde::{Deserialize, Serialize};

/// Terminal result of a non-streaming text generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResult {
    /// Concatenated answer text
    pub text: String,
    /// Concatenated reasoning text, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Tool calls observed in the output
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<StreamChunk>,
    /// Finish reason of the last finish chunk
    pub finish_reason: FinishReason,
    /// Summed usage over all finish chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl GenerateResult {
    /// Create a result with only text
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: None,
        }
    }

    /// Fold a fully drained chunk sequence into a result.
    ///
    /// The first `Err` item aborts the fold and is returned as is.
    pub fn from_chunks<I>(chunks: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = PipelineResult<StreamChunk>>,
    {
        let mut result = Self::from_text("");
        let mut reasoning = String::new();

        for chunk in chunks {
            match chunk? {
                StreamChunk::TextDelta { text } => result.text.push_str(&text),
                StreamChunk::Reasoning { text, .. } => reasoning.push_str(&text),
                StreamChunk::ReasoningSignature { .. } => {}
                call @ StreamChunk::ToolCall { .. } => result.tool_calls.push(call),
                StreamChunk::Finish {
                    finish_reason,
                    usage,
                } => {
                    result.finish_reason = finish_reason;
                    result.usage = match (result.usage, usage) {
                        (Some(a), Some(b)) => Some(a + b),
                        (a, b) => a.or(b),
                    };
                }
                StreamChunk::Error { message } => {
                    return Err(PipelineError::Internal(message));
                }
            }
        }

        if !reasoning.is_empty() {
            result.reasoning = Some(reasoning);
        }
        Ok(result)
    }
}

/// Generated image payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    /// URL or base64 data
    pub data: String,
    /// Media type, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

/// What a finished invocation produced, as reported to `on_request_end`
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// A stream was handed to the caller
    Streaming,
    /// A text generation finished
    Generated(GenerateResult),
    /// Embeddings were produced
    Embeddings {
        /// Number of vectors
        count: usize,
    },
    /// Images were produced
    Images {
        /// Number of images
        count: usize,
    },
}

/// Uniform `{ success, data | message }` envelope for outer boundaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    /// Whether the call succeeded
    pub success: bool,
    /// Payload on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    /// Error message on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> From<PipelineResult<T>> for Envelope<T> {
    fn from(result: PipelineResult<T>) -> Self {
        match result {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                message: None,
            },
            Err(err) => Self {
                success: false,
                data: None,
                message: Some(err.to_string()),
            },
        }
    }
}
