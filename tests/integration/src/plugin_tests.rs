//! Plugin dispatch through the executor

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::ScriptedProvider;
use async_trait::async_trait;
use parking_lot::Mutex;
use pipeline_core::{
    GenerateResult, ModelParams, PipelineError, PipelineResult, RequestContext, RequestOutcome,
    StreamChunk,
};
use pipeline_plugins::{Enforce, ErrorEvent, Plugin, StreamTransform, TransformController};
use pipeline_runtime::RuntimeExecutor;
use pretty_assertions::assert_eq;
use std::sync::Arc;

type Log = Arc<Mutex<Vec<String>>>;

fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn executor_for(provider: &ScriptedProvider, plugins: Vec<Plugin>) -> RuntimeExecutor {
    RuntimeExecutor::builder(registry_with(&[provider]), provider.name())
        .with_plugins(plugins)
        .build()
        .expect("executor")
}

/// Appends `[name]` to the system prompt
fn tagging_plugin(name: &str, enforce: Enforce) -> Plugin {
    let tag = format!("[{name}]");
    Plugin::new(name)
        .with_enforce(enforce)
        .transform_params(move |mut params: ModelParams, _ctx| {
            let tag = tag.clone();
            async move {
                params.system = Some(params.system.unwrap_or_default() + &tag);
                Ok::<_, PipelineError>(params)
            }
        })
}

fn recorded_system(provider: &ScriptedProvider) -> Option<String> {
    provider
        .recorded()
        .last()
        .and_then(|call| call.params.system.clone())
}

#[tokio::test]
async fn test_failing_and_panicking_event_hooks_do_not_affect_siblings() {
    init_tracing();
    let provider = ScriptedProvider::new("openai").chunks(text_turn(&["fine"]));
    let log = new_log();

    let failing = Plugin::new("failing").on_request_start(|_ctx| async {
        Err::<(), _>(PipelineError::plugin("failing", "on_request_start", "boom"))
    });
    let panicking = Plugin::new("panicking").on_request_end(|_ctx, _outcome| async {
        let explode = true;
        if explode {
            panic!("hook exploded");
        }
        Ok::<(), PipelineError>(())
    });
    let start_log = Arc::clone(&log);
    let end_log = Arc::clone(&log);
    let recorder = Plugin::new("recorder")
        .on_request_start(move |_ctx| {
            let log = Arc::clone(&start_log);
            async move {
                log.lock().push("start".to_string());
                Ok::<(), PipelineError>(())
            }
        })
        .on_request_end(move |_ctx, outcome: RequestOutcome| {
            let log = Arc::clone(&end_log);
            async move {
                log.lock().push(format!("end:{outcome:?}"));
                Ok::<(), PipelineError>(())
            }
        });

    let executor = executor_for(&provider, vec![failing, panicking, recorder]);
    let text = executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("call survives hook failures")
        .text()
        .await
        .expect("text");

    assert_eq!(text, "fine");
    assert_eq!(
        *log.lock(),
        vec!["start".to_string(), "end:Streaming".to_string()]
    );
}

#[tokio::test]
async fn test_enforce_groups_order_parameter_transforms() {
    init_tracing();
    let provider = ScriptedProvider::new("openai").chunks(text_turn(&["ok"]));
    let executor = executor_for(
        &provider,
        vec![
            tagging_plugin("late", Enforce::Post),
            tagging_plugin("first-normal", Enforce::Normal),
            tagging_plugin("early", Enforce::Pre),
            tagging_plugin("second-normal", Enforce::Normal),
        ],
    );

    executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("call")
        .text()
        .await
        .expect("text");

    assert_eq!(
        recorded_system(&provider).as_deref(),
        Some("[early][first-normal][second-normal][late]")
    );
}

#[tokio::test]
async fn test_failing_parameter_transform_keeps_previous_value() {
    let provider = ScriptedProvider::new("openai").chunks(text_turn(&["ok"]));
    let broken = Plugin::new("broken").transform_params(|_params: ModelParams, _ctx| async {
        Err::<ModelParams, _>(PipelineError::plugin("broken", "transform_params", "bad input"))
    });
    let executor = executor_for(
        &provider,
        vec![
            tagging_plugin("a", Enforce::Normal),
            broken,
            tagging_plugin("b", Enforce::Normal),
        ],
    );

    executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("call")
        .text()
        .await
        .expect("text");

    assert_eq!(recorded_system(&provider).as_deref(), Some("[a][b]"));
}

#[tokio::test]
async fn test_split_plugin_sets_reduce_like_one_set() {
    let combined = ScriptedProvider::new("openai").chunks(text_turn(&["ok"]));
    let executor = executor_for(
        &combined,
        vec![
            tagging_plugin("a", Enforce::Normal),
            tagging_plugin("b", Enforce::Normal),
            tagging_plugin("c", Enforce::Normal),
        ],
    );
    let original = ModelParams::builder()
        .system("base")
        .message(pipeline_core::ChatMessage::user("hi"))
        .build();
    executor
        .stream_text("gpt-4", original.clone())
        .await
        .expect("call")
        .text()
        .await
        .expect("text");

    // [a, b] then [c] on the intermediate result
    let split = ScriptedProvider::new("openai").chunks(text_turn(&["ok"]));
    let first_half = executor_for(
        &split,
        vec![
            tagging_plugin("a", Enforce::Normal),
            tagging_plugin("b", Enforce::Normal),
        ],
    );
    let result = first_half
        .stream_text("gpt-4", original.clone())
        .await
        .expect("first half");
    let intermediate = split.recorded()[0].params.clone();
    result.text().await.expect("text");

    let second_half = executor_for(&split, vec![tagging_plugin("c", Enforce::Normal)]);
    second_half
        .stream_text("gpt-4", intermediate)
        .await
        .expect("second half")
        .text()
        .await
        .expect("text");

    assert_eq!(recorded_system(&combined).as_deref(), Some("base[a][b][c]"));
    assert_eq!(recorded_system(&split), recorded_system(&combined));
    assert_eq!(original.system.as_deref(), Some("base"));
}

#[tokio::test]
async fn test_first_non_empty_model_resolution_wins() {
    init_tracing();
    let openai = ScriptedProvider::new("openai").chunks(text_turn(&["from openai"]));
    let anthropic = ScriptedProvider::new("anthropic").chunks(text_turn(&["from anthropic"]));
    let registry = registry_with(&[&openai, &anthropic]);

    let silent = Plugin::new("silent")
        .resolve_model(|_alias: String, _ctx| async { Ok::<_, PipelineError>(None) });
    let empty = Plugin::new("empty")
        .resolve_model(|_alias: String, _ctx| async {
            Ok::<_, PipelineError>(Some(String::new()))
        });
    let aliases = Plugin::new("aliases").resolve_model(|alias: String, _ctx| async move {
        Ok::<_, PipelineError>((alias == "smart").then(|| "anthropic>claude-3".to_string()))
    });
    let shadowed = Plugin::new("shadowed").resolve_model(|_alias: String, _ctx| async {
        Ok::<_, PipelineError>(Some("openai>never".to_string()))
    });

    let executor = RuntimeExecutor::builder(registry, "openai")
        .with_plugins(vec![silent, empty, aliases, shadowed])
        .build()
        .expect("executor");

    let text = executor
        .stream_text("smart", user_params("hi"))
        .await
        .expect("alias call")
        .text()
        .await
        .expect("text");
    assert_eq!(text, "from anthropic");
    assert_eq!(anthropic.recorded()[0].model_id, "claude-3");

    executor.remove_plugin("aliases");
    executor
        .stream_text("smart", user_params("hi"))
        .await
        .expect("shadowed call")
        .text()
        .await
        .expect("text");
    assert_eq!(openai.recorded()[0].model_id, "never");
}

#[tokio::test]
async fn test_upstream_failure_reaches_on_error_only() {
    init_tracing();
    let provider = ScriptedProvider::new("openai").failing(PipelineError::upstream(
        "openai",
        "rate limited",
        Some(429),
    ));
    let log = new_log();
    let error_log = Arc::clone(&log);
    let end_log = Arc::clone(&log);
    let observer = Plugin::new("observer")
        .on_error(move |_ctx, event: ErrorEvent| {
            let log = Arc::clone(&error_log);
            async move {
                log.lock().push(format!("error:{}", event.error.error_type()));
                Ok::<(), PipelineError>(())
            }
        })
        .on_request_end(move |_ctx, _outcome| {
            let log = Arc::clone(&end_log);
            async move {
                log.lock().push("end".to_string());
                Ok::<(), PipelineError>(())
            }
        });

    let executor = executor_for(&provider, vec![observer]);
    let err = executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect_err("upstream fails");

    assert!(matches!(
        err,
        PipelineError::Upstream {
            status_code: Some(429),
            ..
        }
    ));
    assert_eq!(
        *log.lock(),
        vec![format!("error:{}", err.error_type())]
    );
}

#[tokio::test]
async fn test_result_transforms_apply_to_generated_text() {
    let provider = ScriptedProvider::new("openai").chunks(vec![
        StreamChunk::text_delta("forty-two"),
        stop_with_usage(7, 3),
    ]);
    let suffix = |name: &'static str| {
        Plugin::new(name).transform_result(move |mut result: GenerateResult, _ctx| async move {
            result.text.push_str(name);
            Ok::<_, PipelineError>(result)
        })
    };
    let executor = executor_for(&provider, vec![suffix("-one"), suffix("-two")]);

    let result = executor
        .generate_text("gpt-4", user_params("question"))
        .await
        .expect("generate");
    assert_eq!(result.text, "forty-two-one-two");
    assert_eq!(result.usage.map(|u| u.total_tokens), Some(10));
}

/// Appends a fixed text delta right before `finish`
struct Suffix(&'static str);

#[async_trait]
impl StreamTransform for Suffix {
    async fn transform(
        &mut self,
        chunk: StreamChunk,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        if chunk.is_finish() {
            out.enqueue(StreamChunk::text_delta(self.0)).await?;
        }
        out.enqueue(chunk).await
    }
}

/// Uppercases text deltas
struct Shout;

#[async_trait]
impl StreamTransform for Shout {
    async fn transform(
        &mut self,
        chunk: StreamChunk,
        out: &mut TransformController,
    ) -> PipelineResult<()> {
        match chunk {
            StreamChunk::TextDelta { text } => {
                out.enqueue(StreamChunk::text_delta(text.to_uppercase())).await
            }
            other => out.enqueue(other).await,
        }
    }
}

#[tokio::test]
async fn test_stream_transforms_run_in_plugin_order() {
    init_tracing();
    let run = |plugins: Vec<Plugin>| async move {
        let provider = ScriptedProvider::new("openai").chunks(text_turn(&["hello"]));
        let executor = executor_for(&provider, plugins);
        let stream = executor
            .stream_text("gpt-4", user_params("hi"))
            .await
            .expect("call")
            .into_stream();
        collect_ok(stream).await
    };

    let suffix_then_shout = run(vec![
        Plugin::new("suffix").transform_stream(|_, _| Suffix("!end")),
        Plugin::new("shout").transform_stream(|_, _| Shout),
    ])
    .await;
    let shout_then_suffix = run(vec![
        Plugin::new("shout").transform_stream(|_, _| Shout),
        Plugin::new("suffix").transform_stream(|_, _| Suffix("!end")),
    ])
    .await;

    assert_eq!(text_of(&suffix_then_shout), "HELLO!END");
    assert_eq!(text_of(&shout_then_suffix), "HELLO!end");
    assert_eq!(finish_count(&suffix_then_shout), 1);
    assert_eq!(finish_count(&shout_then_suffix), 1);
}

#[tokio::test]
async fn test_plugins_added_at_runtime_apply_to_later_calls() {
    let provider = ScriptedProvider::new("openai").chunks(text_turn(&["ok"]));
    let executor = executor_for(&provider, Vec::new());

    executor
        .use_plugin(tagging_plugin("added", Enforce::Normal))
        .expect("add plugin");
    let duplicate = executor.use_plugin(tagging_plugin("added", Enforce::Pre));
    assert_eq!(
        duplicate,
        Err(PipelineError::DuplicatePlugin("added".to_string()))
    );

    executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("call")
        .text()
        .await
        .expect("text");
    assert_eq!(recorded_system(&provider).as_deref(), Some("[added]"));

    assert!(executor.remove_plugin("added"));
    assert!(!executor.remove_plugin("added"));
    executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("call")
        .text()
        .await
        .expect("text");
    assert_eq!(recorded_system(&provider), None);
}

#[tokio::test]
async fn test_hooks_see_the_request_context() {
    let provider = ScriptedProvider::new("openai").chunks(text_turn(&["ok"]));
    let seen: Arc<Mutex<Option<(String, String, u32)>>> = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&seen);
    let inspector = Plugin::new("inspector").on_request_start(move |ctx: Arc<RequestContext>| {
        let sink = Arc::clone(&sink);
        async move {
            *sink.lock() = Some((
                ctx.provider_id.clone(),
                ctx.model_id.clone(),
                ctx.recursion_depth,
            ));
            Ok::<(), PipelineError>(())
        }
    });
    let executor = executor_for(&provider, vec![inspector]);

    let result = executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("call");
    assert!(!result.request_id().is_empty());
    result.text().await.expect("text");

    assert_eq!(
        seen.lock().clone(),
        Some(("openai".to_string(), "gpt-4".to_string(), 0))
    );
}
