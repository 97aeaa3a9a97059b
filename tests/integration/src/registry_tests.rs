//! Provider registry and hub resolution through real calls

use crate::fixtures::*;
use crate::helpers::*;
use crate::mock_providers::ScriptedProvider;
use pipeline_core::PipelineError;
use pipeline_providers::{HubProvider, ModelResolver, ProviderRegistry};
use pipeline_runtime::RuntimeExecutor;
use pretty_assertions::assert_eq;

fn openai_and_anthropic() -> (ScriptedProvider, ScriptedProvider) {
    (
        ScriptedProvider::new("openai").chunks(text_turn(&["from openai"])),
        ScriptedProvider::new("anthropic").chunks(text_turn(&["from anthropic"])),
    )
}

#[test]
fn test_namespaced_and_fallback_resolution() {
    init_tracing();
    let (openai, anthropic) = openai_and_anthropic();
    let resolver = ModelResolver::new(registry_with(&[&openai, &anthropic]));

    let model = resolver
        .resolve_language_model("openai>gpt-4", "anthropic")
        .expect("namespaced id resolves");
    assert_eq!(model.provider_id(), "openai");
    assert_eq!(model.model_id(), "gpt-4");

    let model = resolver
        .resolve_language_model("claude-3", "anthropic")
        .expect("bare id resolves against the fallback");
    assert_eq!(model.provider_id(), "anthropic");
    assert_eq!(model.model_id(), "claude-3");
}

#[test]
fn test_every_listed_provider_resolves() {
    let (openai, anthropic) = openai_and_anthropic();
    let registry = registry_with(&[&openai, &anthropic]);
    let resolver = ModelResolver::new(registry.clone());

    for id in registry.list_ids() {
        let model = resolver
            .resolve_language_model(&format!("{id}>some-model"), "openai")
            .expect("listed provider resolves");
        assert_eq!(model.provider_id(), id);
    }
}

#[test]
fn test_unknown_provider_fails_the_same_way_for_every_kind() {
    let (openai, _) = openai_and_anthropic();
    let resolver = ModelResolver::new(registry_with(&[&openai]));
    let expected = PipelineError::ProviderNotFound("mistral".to_string());

    assert_eq!(
        resolver
            .resolve_language_model("mistral>large", "openai")
            .err(),
        Some(expected.clone())
    );
    assert_eq!(
        resolver
            .resolve_embedding_model("mistral>embed", "openai")
            .err(),
        Some(expected.clone())
    );
    assert_eq!(
        resolver.resolve_image_model("mistral>draw", "openai").err(),
        Some(expected)
    );
}

#[tokio::test]
async fn test_empty_registry_reports_no_providers() {
    init_tracing();
    let executor = RuntimeExecutor::builder(ProviderRegistry::new(), "openai")
        .build()
        .expect("executor");

    let err = executor
        .stream_text("gpt-4", user_params("hello"))
        .await
        .expect_err("nothing to resolve against");
    assert_eq!(err, PipelineError::NoProviders);
}

#[tokio::test]
async fn test_hub_routes_calls_to_the_nested_provider() {
    init_tracing();
    let (openai, anthropic) = openai_and_anthropic();
    let registry = registry_with(&[&openai, &anthropic]);
    HubProvider::install("aihubmix", &registry).expect("install hub");

    let executor = RuntimeExecutor::builder(registry, "openai")
        .build()
        .expect("executor");
    let text = executor
        .stream_text("aihubmix>anthropic>claude-3", user_params("hello"))
        .await
        .expect("hub call")
        .text()
        .await
        .expect("text");

    assert_eq!(text, "from anthropic");
    assert_eq!(openai.calls(), 0);
    let recorded = anthropic.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].model_id, "claude-3");
}

#[tokio::test]
async fn test_hub_rejects_unknown_nested_provider() {
    let (openai, _) = openai_and_anthropic();
    let registry = registry_with(&[&openai]);
    HubProvider::install("aihubmix", &registry).expect("install hub");
    let executor = RuntimeExecutor::builder(registry, "openai")
        .build()
        .expect("executor");

    let err = executor
        .stream_text("aihubmix>mistral>large", user_params("hello"))
        .await
        .expect_err("nested provider is missing");
    assert!(matches!(err, PipelineError::Hub { ref hub, .. } if hub == "aihubmix"));
}

#[tokio::test]
async fn test_reregistered_provider_serves_later_calls() {
    init_tracing();
    let first = ScriptedProvider::new("openai").chunks(text_turn(&["first"]));
    let registry = registry_with(&[&first]);
    let executor = RuntimeExecutor::builder(registry.clone(), "openai")
        .build()
        .expect("executor");

    let before = executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("first call")
        .text()
        .await
        .expect("text");
    assert_eq!(before, "first");

    let second = ScriptedProvider::new("openai").chunks(text_turn(&["second"]));
    registry
        .register("openai", second.as_provider())
        .expect("replace provider");

    let after = executor
        .stream_text("gpt-4", user_params("hi"))
        .await
        .expect("second call")
        .text()
        .await
        .expect("text");
    assert_eq!(after, "second");
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 1);
}

#[tokio::test]
async fn test_custom_separator_applies_end_to_end() {
    let openai = ScriptedProvider::new("openai").chunks(text_turn(&["ok"]));
    let registry = ProviderRegistry::with_separator("::").expect("separator");
    registry
        .register("openai", openai.as_provider())
        .expect("register");
    let executor = RuntimeExecutor::builder(registry, "openai")
        .build()
        .expect("executor");

    let result = executor
        .stream_text("openai::gpt-4o", user_params("hi"))
        .await
        .expect("call");
    assert_eq!(result.context().provider_id, "openai");
    assert_eq!(result.context().model_id, "gpt-4o");
    assert_eq!(result.text().await.expect("text"), "ok");
    assert_eq!(openai.recorded()[0].model_id, "gpt-4o");
}
