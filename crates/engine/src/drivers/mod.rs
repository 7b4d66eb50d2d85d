//! Step drivers: strategies that turn the current state into the next step.
//!
//! | Driver | Model output | Step types |
//! |--------|--------------|------------|
//! | [`ChatDriver`] | plain text | `Final` |
//! | [`ToolDispatchDriver`] | native tool calls | `ToolExecution`, `Final` |
//! | [`ReActDriver`] | JSON thought/action | `ToolExecution`, `Final`, `Failure` |
//! | [`OodaDriver`] | JSON observe/orient/decide/act | `ToolExecution`, `Final`, `Failure` |
//!
//! A driver returns exactly one step and never appends it; the
//! orchestrator does that.

pub mod chat;
pub mod decision;
pub mod ooda;
pub mod react;
pub mod stream;
pub mod tool_dispatch;
pub mod tool_executor;

pub use chat::ChatDriver;
pub use decision::{Decision, DecisionDriver, DecisionStyle};
pub use ooda::{Ooda, OodaDriver};
pub use react::{ReAct, ReActDriver};
pub use stream::{collect_stream, StreamAssembler};
pub use tool_dispatch::ToolDispatchDriver;
pub use tool_executor::{ToolExecutor, ToolOutcome, ToolPolicy};

use async_trait::async_trait;
use stepwise_config::InferenceConfig;
use stepwise_core::{ExecutionState, Inference, InferenceRequest, InferenceResponse, Message, Step};
use tracing::debug;

use crate::error::EngineError;
use crate::processors::context::CACHED_CONTEXT_APPLIED;

#[async_trait]
pub trait StepDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Produce the next step for `state`.
    async fn make_next_step(&self, state: &ExecutionState) -> Result<Step, EngineError>;
}

/// Model call settings shared by every driver.
#[derive(Debug, Clone)]
pub struct InferenceOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Consume `Inference::stream` and assemble the chunks
    pub streaming: bool,
}

impl Default for InferenceOptions {
    fn default() -> Self {
        Self::from(&InferenceConfig::default())
    }
}

impl From<&InferenceConfig> for InferenceOptions {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            streaming: config.streaming,
        }
    }
}

impl InferenceOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// A request for `messages`, carrying the cache hints of an applied
    /// cached context.
    pub fn request(&self, state: &ExecutionState, messages: Vec<Message>) -> InferenceRequest {
        let mut request = InferenceRequest::new(self.model.clone(), messages);
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;
        request.stream = self.streaming;
        if state.metadata().contains_key(CACHED_CONTEXT_APPLIED) {
            if let Some(context) = state.cached_context() {
                request.cache_hints = context.cache_hints.clone();
            }
        }
        request
    }
}

/// Send `request`, through the stream assembler when streaming.
pub async fn infer(
    inference: &dyn Inference,
    request: InferenceRequest,
) -> Result<InferenceResponse, EngineError> {
    debug!(
        backend = inference.name(),
        model = %request.model,
        messages = request.messages.len(),
        tools = request.tools.len(),
        stream = request.stream,
        "Calling inference"
    );
    if request.stream {
        let model = request.model.clone();
        let rx = inference.stream(request).await?;
        Ok(collect_stream(rx, &model).await?)
    } else {
        Ok(inference.complete(request).await?)
    }
}

#[cfg(test)]
pub(crate) mod test_helpers;

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_core::CachedContext;

    #[test]
    fn cache_hints_only_after_context_applied() {
        let mut hints = serde_json::Map::new();
        hints.insert("ttl".into(), serde_json::json!("5m"));
        let state = ExecutionState::new().with_cached_context(CachedContext {
            system: vec!["sys".into()],
            messages: vec![],
            cache_hints: hints,
        });
        let options = InferenceOptions::new("m");
        assert!(options.request(&state, vec![]).cache_hints.is_empty());

        let applied = state.with_metadata(CACHED_CONTEXT_APPLIED, serde_json::json!(true));
        assert_eq!(options.request(&applied, vec![]).cache_hints["ttl"], "5m");
    }

    #[test]
    fn options_follow_config() {
        let config = InferenceConfig {
            model: "local".into(),
            temperature: 0.1,
            max_tokens: Some(256),
            streaming: true,
        };
        let request = InferenceOptions::from(&config).request(&ExecutionState::new(), vec![]);
        assert_eq!(request.model, "local");
        assert_eq!(request.max_tokens, Some(256));
        assert!(request.stream);
    }
}
