//! Prompt-mode tool calling.
//!
//! Models without native function calling get the tool catalog described in
//! the system prompt and answer with XML-style blocks:
//!
//! ```text
//! <tool_use>
//!   <name>search</name>
//!   <arguments>{"query": "weather"}</arguments>
//! </tool_use>
//! ```
//!
//! This module builds that prompt, parses the blocks back out of the
//! response, invokes the tools and converts their results into history
//! messages for the next turn.

use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use pipeline_core::{ChatMessage, PipelineError, PipelineResult, StreamChunk, ToolDefinition};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

static TOOL_USE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<(?:tool_use|tool_call)>.*?<name>(.*?)</name>.*?<arguments>(.*?)</arguments>.*?</(?:tool_use|tool_call)>",
    )
    .expect("tool use pattern is valid")
});

const PROMPT_HEADER: &str = "\
You can call tools to help answer the user. Call at most one tool per message; \
the result is returned to you in the next user message. Work step by step and \
let each result inform the next call.

## Calling a tool

Write the call as XML-style tags, with the exact tool name and a JSON object of arguments:

<tool_use>
  <name>{tool_name}</name>
  <arguments>{json_arguments}</arguments>
</tool_use>

Example:

<tool_use>
  <name>calculator</name>
  <arguments>{\"expression\": \"6 * 7\"}</arguments>
</tool_use>

Results come back in this form:

<tool_use_result>
  <name>{tool_name}</name>
  <result>{result}</result>
</tool_use_result>

A failed call reports <error>{message}</error> instead of <result>.
";

const PROMPT_RULES: &str = "\
## Rules

1. Pass concrete values as arguments, never variable names.
2. Only call a tool when you need it. If you can answer directly, do so.
3. Do not repeat a call you already made with the same arguments.
4. Always use the XML tag format shown above.
";

/// Signature of a custom system prompt builder
pub type PromptBuilder = Arc<dyn Fn(&str, &[ToolDefinition]) -> String + Send + Sync>;

/// Build the tool-use system prompt around the user's own system prompt
#[must_use]
pub fn build_system_prompt(user_system_prompt: &str, tools: &[ToolDefinition]) -> String {
    let mut prompt = String::from(PROMPT_HEADER);
    prompt.push_str("\n## Available tools\n\n");
    prompt.push_str(&available_tools(tools));
    prompt.push_str("\n\n");
    prompt.push_str(PROMPT_RULES);
    prompt.push_str("\n# User instructions\n\n");
    prompt.push_str(user_system_prompt);
    prompt
}

fn available_tools(tools: &[ToolDefinition]) -> String {
    let mut out = String::from("<tools>\n");
    for tool in tools {
        let _ = write!(
            out,
            "<tool>\n  <name>{}</name>\n  <description>{}</description>\n  <arguments>{}</arguments>\n</tool>\n",
            tool.name,
            tool.description.as_deref().unwrap_or_default(),
            tool.input_schema,
        );
    }
    out.push_str("</tools>");
    out
}

/// A tool invocation parsed from response text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    /// `{tool_name}-{index}`
    pub id: String,
    /// Tool name
    pub tool_name: String,
    /// Parsed JSON arguments, or the raw string if they were not JSON
    pub arguments: Value,
}

/// Parse every `<tool_use>` / `<tool_call>` block naming a known tool
#[must_use]
pub fn parse_tool_uses(text: &str, tools: &[ToolDefinition]) -> Vec<ToolUse> {
    if text.is_empty() || tools.is_empty() {
        return Vec::new();
    }

    let mut uses = Vec::new();
    for captures in TOOL_USE_PATTERN.captures_iter(text) {
        let name = captures.get(1).map_or("", |m| m.as_str()).trim();
        let raw_arguments = captures.get(2).map_or("", |m| m.as_str()).trim();

        if !tools.iter().any(|tool| tool.name == name) {
            warn!(tool = %name, "Tool not found in catalog, skipping");
            continue;
        }
        let arguments = serde_json::from_str(raw_arguments)
            .unwrap_or_else(|_| Value::String(raw_arguments.to_string()));

        uses.push(ToolUse {
            id: format!("{name}-{}", uses.len()),
            tool_name: name.to_string(),
            arguments,
        });
    }
    uses
}

/// Lifecycle of one tool invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Parsed, not started
    Pending,
    /// Running
    Invoking,
    /// Returned a result
    Done,
    /// Failed
    Error,
}

/// Record of one tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResponse {
    /// Invocation id
    pub id: String,
    /// Tool name
    pub tool_name: String,
    /// Arguments passed to the tool
    pub arguments: Value,
    /// Final status
    pub status: ToolStatus,
    /// Result, when the tool succeeded
    pub result: Option<Value>,
    /// Error message, when the tool failed
    pub error: Option<String>,
}

/// The model a tool round trip runs against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Provider id
    pub provider_id: String,
    /// Model id
    pub model_id: String,
}

/// Executes a single tool
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Call `tool` with `arguments`
    async fn call_tool(&self, tool: &ToolDefinition, arguments: Value) -> PipelineResult<Value>;
}

#[async_trait]
impl<F, Fut> ToolInvoker for F
where
    F: Fn(ToolDefinition, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipelineResult<Value>> + Send + 'static,
{
    async fn call_tool(&self, tool: &ToolDefinition, arguments: Value) -> PipelineResult<Value> {
        self(tool.clone(), arguments).await
    }
}

/// Converts tool responses into history messages
pub trait ToolResultConverter: Send + Sync {
    /// Messages to append after the assistant turn
    fn convert(&self, responses: &[ToolResponse], model: &ModelDescriptor) -> Vec<ChatMessage>;
}

fn result_block(response: &ToolResponse) -> String {
    match (&response.result, &response.error) {
        (Some(result), None) => format!(
            "<tool_use_result>\n  <name>{}</name>\n  <result>{result}</result>\n</tool_use_result>",
            response.tool_name
        ),
        (_, error) => format!(
            "<tool_use_result>\n  <name>{}</name>\n  <error>{}</error>\n</tool_use_result>",
            response.tool_name,
            error.as_deref().unwrap_or("unknown error")
        ),
    }
}

/// Prompt-mode converter: one user message holding every `<tool_use_result>`
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptResultConverter;

impl ToolResultConverter for PromptResultConverter {
    fn convert(&self, responses: &[ToolResponse], _model: &ModelDescriptor) -> Vec<ChatMessage> {
        if responses.is_empty() {
            return Vec::new();
        }
        let text = responses
            .iter()
            .map(result_block)
            .collect::<Vec<_>>()
            .join("\n\n");
        vec![ChatMessage::user(text)]
    }
}

/// Native-history converter: one tool message per response
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolMessageConverter;

impl ToolResultConverter for ToolMessageConverter {
    fn convert(&self, responses: &[ToolResponse], _model: &ModelDescriptor) -> Vec<ChatMessage> {
        responses
            .iter()
            .map(|response| ChatMessage::tool(&response.id, result_block(response)))
            .collect()
    }
}

/// Inputs of one tool round trip
pub struct ToolExecutionRequest<'a> {
    /// Full accumulated response text
    pub response_text: &'a str,
    /// Responses recorded so far; new responses are appended
    pub tool_responses: &'a mut Vec<ToolResponse>,
    /// Emits chunks into the current stream
    pub on_chunk: &'a (dyn Fn(StreamChunk) + Send + Sync),
    /// Turns responses into history messages
    pub converter: &'a dyn ToolResultConverter,
    /// Active model
    pub model: &'a ModelDescriptor,
    /// Tool catalog
    pub tools: &'a [ToolDefinition],
}

/// Parses tool calls out of response text and runs them
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run every tool call found in `request.response_text` and return the
    /// tool-result messages. An empty list means nothing ran.
    async fn parse_and_call_tools(
        &self,
        request: ToolExecutionRequest<'_>,
    ) -> PipelineResult<Vec<ChatMessage>>;
}

/// Default executor: XML block parsing plus a [`ToolInvoker`]
#[derive(Clone)]
pub struct PromptToolExecutor {
    invoker: Arc<dyn ToolInvoker>,
}

impl PromptToolExecutor {
    /// Create an executor calling tools through `invoker`
    #[must_use]
    pub fn new(invoker: Arc<dyn ToolInvoker>) -> Self {
        Self { invoker }
    }
}

impl std::fmt::Debug for PromptToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PromptToolExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl ToolExecutor for PromptToolExecutor {
    async fn parse_and_call_tools(
        &self,
        request: ToolExecutionRequest<'_>,
    ) -> PipelineResult<Vec<ChatMessage>> {
        let uses = parse_tool_uses(request.response_text, request.tools);
        if uses.is_empty() {
            return Ok(Vec::new());
        }

        for tool_use in &uses {
            (request.on_chunk)(StreamChunk::ToolCall {
                tool_call_id: tool_use.id.clone(),
                tool_name: tool_use.tool_name.clone(),
                arguments: tool_use.arguments.clone(),
            });
        }

        let tools = request.tools;
        let invoker = &self.invoker;
        let calls = uses.iter().map(|tool_use| async move {
            let tool = tools
                .iter()
                .find(|tool| tool.name == tool_use.tool_name)
                .ok_or_else(|| {
                    PipelineError::tool_execution(format!("unknown tool '{}'", tool_use.tool_name))
                })?;
            debug!(tool = %tool.name, id = %tool_use.id, "Invoking tool");
            invoker.call_tool(tool, tool_use.arguments.clone()).await
        });
        let outcomes = join_all(calls).await;

        let responses: Vec<ToolResponse> = uses
            .into_iter()
            .zip(outcomes)
            .map(|(tool_use, outcome)| {
                let (status, result, error) = match outcome {
                    Ok(value) => (ToolStatus::Done, Some(value), None),
                    Err(err) => {
                        warn!(tool = %tool_use.tool_name, error = %err, "Tool call failed");
                        (ToolStatus::Error, None, Some(err.to_string()))
                    }
                };
                ToolResponse {
                    id: tool_use.id,
                    tool_name: tool_use.tool_name,
                    arguments: tool_use.arguments,
                    status,
                    result,
                    error,
                }
            })
            .collect();

        let messages = request.converter.convert(&responses, request.model);
        request.tool_responses.extend(responses);
        Ok(messages)
    }
}
