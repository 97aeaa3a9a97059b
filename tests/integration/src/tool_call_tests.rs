//! Prompt-mode tool calling through the executor

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::ScriptedProvider;
use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{
    AbortSignal, ChatMessage, FinishReason, MessageRole, PipelineError, PipelineResult,
    StreamChunk, ToolDefinition,
};
use pipeline_plugins::builtin::{
    PromptToolConfig, ToolExecutionRequest, ToolExecutor, ToolInvoker,
};
use pipeline_runtime::{RuntimeConfig, RuntimeExecutor};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;

fn tool_executor(
    provider: &ScriptedProvider,
    tools: Arc<dyn ToolExecutor>,
    config: RuntimeConfig,
) -> RuntimeExecutor {
    RuntimeExecutor::builder(registry_with(&[provider]), provider.name())
        .with_config(config)
        .with_prompt_tools(PromptToolConfig::new(tools))
        .build()
        .expect("executor")
}

fn message_text(message: &ChatMessage) -> &str {
    message.text_content().unwrap_or_default()
}

#[tokio::test]
async fn test_tool_result_is_continued_in_the_same_stream() {
    init_tracing();
    let provider = ScriptedProvider::new("openai")
        .chunks(text_turn(&["Let me check...", "<tool_call>", "done"]))
        .chunks(text_turn(&["The answer is ", "42"]));
    let tools = Arc::new(FixedAnswerExecutor::new(json!("42")));
    let executor = tool_executor(&provider, tools.clone(), RuntimeConfig::default());

    let stream = executor
        .stream_text(
            "gpt-4",
            params_with_tools("What is the answer?", vec![answer_tool()]),
        )
        .await
        .expect("call")
        .into_stream();
    let chunks = collect_ok(stream).await;

    assert_eq!(
        chunks,
        vec![
            StreamChunk::text_delta("Let me check..."),
            StreamChunk::text_delta("<tool_call>"),
            StreamChunk::text_delta("done"),
            StreamChunk::ToolCall {
                tool_call_id: "answer-0".to_string(),
                tool_name: "answer".to_string(),
                arguments: json!({}),
            },
            StreamChunk::text_delta("The answer is "),
            StreamChunk::text_delta("42"),
            StreamChunk::finish(FinishReason::Stop),
        ]
    );
    assert_eq!(finish_count(&chunks), 1);
    assert_eq!(tools.calls(), 1);
    assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn test_recursive_call_carries_history_and_tool_results() {
    let provider = ScriptedProvider::new("openai")
        .chunks(text_turn(&["<tool_call>"]))
        .chunks(text_turn(&["42 it is"]));
    let tools = Arc::new(FixedAnswerExecutor::new(json!("42")));
    let executor = tool_executor(&provider, tools, RuntimeConfig::default());

    executor
        .stream_text(
            "gpt-4",
            params_with_tools("What is the answer?", vec![answer_tool()]),
        )
        .await
        .expect("call")
        .text()
        .await
        .expect("text");

    let recorded = provider.recorded();
    assert_eq!(recorded.len(), 2);

    let first = &recorded[0].params;
    assert!(first.tools.is_none());
    let system = first.system.as_deref().unwrap_or_default();
    assert!(system.contains("<name>answer</name>"));
    assert!(system.ends_with("You are a helpful assistant."));

    let nested = &recorded[1].params;
    let roles: Vec<MessageRole> = nested.messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::User, MessageRole::Assistant, MessageRole::User]
    );
    assert_eq!(message_text(&nested.messages[1]), "<tool_call>");
    assert!(message_text(&nested.messages[2]).contains("<result>\"42\"</result>"));
    assert!(nested.tools.is_none());
    assert_eq!(nested.system, first.system);
}

#[tokio::test]
async fn test_recursion_stops_at_the_depth_limit() {
    init_tracing();
    let provider = ScriptedProvider::new("openai").chunks(text_turn(&["<tool_call>"]));
    let tools = Arc::new(FixedAnswerExecutor::new(json!("again")));
    let executor = tool_executor(
        &provider,
        tools.clone(),
        RuntimeConfig::default().with_max_recursion_depth(2),
    );

    let stream = executor
        .stream_text("gpt-4", params_with_tools("loop", vec![answer_tool()]))
        .await
        .expect("call")
        .into_stream();
    let chunks = collect_ok(stream).await;

    assert_eq!(tools.calls(), 2);
    assert_eq!(provider.calls(), 3);
    assert_eq!(
        text_of(&chunks),
        "<tool_call><tool_call><tool_call>\n\n[max tool call depth 2 reached]"
    );
    assert_eq!(finish_count(&chunks), 1);
    assert_eq!(chunks.last(), Some(&StreamChunk::finish(FinishReason::Stop)));

    let deepest = &provider.recorded()[2].params;
    assert_eq!(deepest.messages.len(), 5);
}

#[tokio::test]
async fn test_detection_runs_once_without_finish_chunk() {
    let provider = ScriptedProvider::new("openai")
        .chunks(vec![StreamChunk::text_delta("<tool_use>")])
        .chunks(text_turn(&["ok"]));
    let tools = Arc::new(FixedAnswerExecutor::new(json!(1)));
    let executor = tool_executor(&provider, tools.clone(), RuntimeConfig::default());

    let stream = executor
        .stream_text("gpt-4", params_with_tools("go", vec![answer_tool()]))
        .await
        .expect("call")
        .into_stream();
    let chunks = collect_ok(stream).await;

    assert_eq!(tools.calls(), 1);
    assert_eq!(text_of(&chunks), "<tool_use>ok");
    assert_eq!(finish_count(&chunks), 1);
}

#[tokio::test]
async fn test_tool_failure_becomes_inline_diagnostic() {
    init_tracing();
    let provider = ScriptedProvider::new("openai").chunks(text_turn(&["<tool_call>"]));
    let tools = Arc::new(FixedAnswerExecutor::failing());
    let executor = tool_executor(&provider, tools.clone(), RuntimeConfig::default());

    let result = executor
        .generate_text("gpt-4", params_with_tools("go", vec![answer_tool()]))
        .await
        .expect("generation completes");

    assert_eq!(
        result.text,
        "<tool_call>\n\n[tool call error: Tool execution failed: tool server unreachable]"
    );
    assert_eq!(result.finish_reason, FinishReason::Stop);
    assert_eq!(tools.calls(), 1);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_plain_answers_skip_tool_execution() {
    let provider = ScriptedProvider::new("openai").chunks(text_turn(&["No tools needed."]));
    let tools = Arc::new(FixedAnswerExecutor::new(json!("unused")));
    let executor = tool_executor(&provider, tools.clone(), RuntimeConfig::default());

    let text = executor
        .stream_text("gpt-4", params_with_tools("hi", vec![answer_tool()]))
        .await
        .expect("call")
        .text()
        .await
        .expect("text");

    assert_eq!(text, "No tools needed.");
    assert_eq!(tools.calls(), 0);
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_prompt_executor_invokes_parsed_tools() {
    init_tracing();
    let block = tool_use_block("get_weather", r#"{"city": "Paris"}"#);
    let provider = ScriptedProvider::new("openai")
        .chunks(text_turn(&["Checking.\n", block.as_str()]))
        .chunks(text_turn(&["Sunny in Paris."]));

    let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let invoker: Arc<dyn ToolInvoker> = Arc::new(move |tool: ToolDefinition, arguments: Value| {
        let sink = Arc::clone(&sink);
        async move {
            sink.lock().push((tool.name.clone(), arguments));
            Ok::<_, PipelineError>(json!({"forecast": "sunny"}))
        }
    });

    let executor = RuntimeExecutor::builder(registry_with(&[&provider]), "openai")
        .with_prompt_tools(PromptToolConfig::with_invoker(invoker))
        .build()
        .expect("executor");

    let stream = executor
        .stream_text(
            "gpt-4",
            params_with_tools("Weather in Paris?", vec![weather_tool(), answer_tool()]),
        )
        .await
        .expect("call")
        .into_stream();
    let chunks = collect_ok(stream).await;

    assert_eq!(
        *seen.lock(),
        vec![("get_weather".to_string(), json!({"city": "Paris"}))]
    );
    assert!(chunks.contains(&StreamChunk::ToolCall {
        tool_call_id: "get_weather-0".to_string(),
        tool_name: "get_weather".to_string(),
        arguments: json!({"city": "Paris"}),
    }));
    assert!(text_of(&chunks).ends_with("Sunny in Paris."));
    assert_eq!(finish_count(&chunks), 1);

    let nested = &provider.recorded()[1].params;
    let results = message_text(nested.messages.last().expect("tool results"));
    assert!(results.contains("<name>get_weather</name>"));
    assert!(results.contains(r#"<result>{"forecast":"sunny"}</result>"#));
}

#[tokio::test]
async fn test_tools_installed_at_runtime() {
    let provider = ScriptedProvider::new("openai")
        .chunks(text_turn(&["<tool_call>"]))
        .chunks(text_turn(&["done"]));
    let executor = RuntimeExecutor::builder(registry_with(&[&provider]), "openai")
        .build()
        .expect("executor");
    let tools = Arc::new(FixedAnswerExecutor::new(json!("ok")));

    executor
        .with_prompt_tools(tools.clone())
        .expect("install tools");
    let text = executor
        .stream_text("gpt-4", params_with_tools("go", vec![answer_tool()]))
        .await
        .expect("call")
        .text()
        .await
        .expect("text");

    assert_eq!(text, "<tool_call>done");
    assert_eq!(tools.calls(), 1);

    let first = &provider.recorded()[0].params;
    assert!(first.tools.is_none());
    assert!(first
        .system
        .as_deref()
        .is_some_and(|system| system.contains("<name>answer</name>")));
}

#[tokio::test]
async fn test_disabled_tool_calling_leaves_requests_alone() {
    let provider = ScriptedProvider::new("openai")
        .chunks(text_turn(&["<tool_call>"]))
        .chunks(text_turn(&["second"]));
    let tools = Arc::new(FixedAnswerExecutor::new(json!("unused")));
    let config = RuntimeConfig {
        tool_calling_enabled: false,
        ..RuntimeConfig::default()
    };
    let executor = tool_executor(&provider, tools.clone(), config);

    let chunks = collect_ok(
        executor
            .stream_text("gpt-4", params_with_tools("hi", vec![answer_tool()]))
            .await
            .expect("call")
            .into_stream(),
    )
    .await;

    assert_eq!(chunks, text_turn(&["<tool_call>"]));
    assert_eq!(tools.calls(), 0);
    assert_eq!(provider.calls(), 1);
    let params = &provider.recorded()[0].params;
    assert_eq!(params.tools.as_ref().map(Vec::len), Some(1));
    assert_eq!(params.system.as_deref(), Some("You are a helpful assistant."));
}

#[tokio::test]
async fn test_markers_without_tools_are_plain_text() {
    let provider = ScriptedProvider::new("openai")
        .chunks(text_turn(&["<tool_call>"]))
        .chunks(text_turn(&["second"]));
    let tools = Arc::new(FixedAnswerExecutor::new(json!("unused")));
    let executor = tool_executor(&provider, tools.clone(), RuntimeConfig::default());

    let text = executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("call")
        .text()
        .await
        .expect("text");

    assert_eq!(text, "<tool_call>");
    assert_eq!(tools.calls(), 0);
    assert_eq!(provider.calls(), 1);
}

/// Aborts the request while "running" tools
struct AbortingExecutor {
    abort: AbortSignal,
}

#[async_trait]
impl ToolExecutor for AbortingExecutor {
    async fn parse_and_call_tools(
        &self,
        request: ToolExecutionRequest<'_>,
    ) -> PipelineResult<Vec<ChatMessage>> {
        self.abort.abort();
        Ok(vec![ChatMessage::user(format!(
            "{} tools ran",
            request.tools.len()
        ))])
    }
}

#[tokio::test]
async fn test_abort_during_tools_prevents_recursion() {
    init_tracing();
    let provider = ScriptedProvider::new("openai")
        .chunks(text_turn(&["<tool_call>"]))
        .chunks(text_turn(&["never"]));
    let abort = AbortSignal::new();
    let tools = Arc::new(AbortingExecutor {
        abort: abort.clone(),
    });
    let executor = tool_executor(&provider, tools, RuntimeConfig::default());

    let stream = executor
        .stream_text_with(
            "gpt-4",
            params_with_tools("go", vec![answer_tool()]),
            abort.clone(),
        )
        .await
        .expect("call")
        .into_stream();
    let items = collect_all(stream).await;

    assert!(abort.is_aborted());
    assert_eq!(items.last(), Some(&Err(PipelineError::Aborted)));
    assert!(!items
        .iter()
        .any(|item| matches!(item, Ok(chunk) if chunk.is_finish())));
    assert_eq!(provider.calls(), 1);
}
