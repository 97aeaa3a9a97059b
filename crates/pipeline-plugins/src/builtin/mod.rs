//! Built-in plugins.

pub mod classifier;
pub mod logging;
pub mod prompt;
pub mod reasoning;
pub mod tool_call;

pub use classifier::{contains_tool_markers, MarkerClassifier, DEFAULT_MARKERS};
pub use logging::{logging_plugin, LOGGING_PLUGIN};
pub use prompt::{
    build_system_prompt, parse_tool_uses, ModelDescriptor, PromptBuilder, PromptResultConverter,
    PromptToolExecutor, ToolExecutionRequest, ToolExecutor, ToolInvoker, ToolMessageConverter,
    ToolResponse, ToolResultConverter, ToolStatus, ToolUse,
};
pub use reasoning::{
    reasoning_time_plugin, smooth_reasoning_plugin, thinking_time_plugin, ReasoningTimer,
    SmoothReasoning, SmoothingConfig, ThinkingComplete, ThinkingObserver,
    DEFAULT_CHUNK_PATTERN, DEFAULT_SMOOTHING_DELAY,
};
pub use tool_call::{
    prompt_tool_plugin, EngineState, PromptToolConfig, ToolCallEngine, ToolCallState,
    DEFAULT_MAX_RECURSION_DEPTH, PROMPT_TOOLS_KEY, PROMPT_TOOL_PLUGIN,
};
