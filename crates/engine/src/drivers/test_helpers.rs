//! Shared test helpers for driver tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use stepwise_core::{
    FinishReason, Inference, InferenceRequest, InferenceResponse, Message, MessageToolCall,
    ProviderError, Tool, ToolError, ToolResult, Usage,
};

/// Inference that returns a sequence of scripted responses and records
/// every request it receives.
///
/// Panics if more calls are made than responses provided.
pub struct ScriptedInference {
    responses: Mutex<VecDeque<Result<InferenceResponse, ProviderError>>>,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedInference {
    pub fn new(responses: Vec<Result<InferenceResponse, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(responses: Vec<InferenceResponse>) -> Self {
        Self::new(responses.into_iter().map(Ok).collect())
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Inference for ScriptedInference {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: InferenceRequest) -> Result<InferenceResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("ScriptedInference: no response for call #{call}"))
    }
}

/// A plain text answer.
pub fn text_response(text: &str) -> InferenceResponse {
    InferenceResponse {
        message: Message::assistant(text),
        finish_reason: Some(FinishReason::Stop),
        usage: Usage::new(10, 5),
        model: "mock-model".into(),
    }
}

/// A response requesting tool calls.
pub fn tool_call_response(tool_calls: Vec<MessageToolCall>, thought: &str) -> InferenceResponse {
    InferenceResponse {
        message: Message::assistant(thought).with_tool_calls(tool_calls),
        finish_reason: Some(FinishReason::ToolCalls),
        usage: Usage::new(10, 5),
        model: "mock-model".into(),
    }
}

pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args.to_string(),
    }
}

/// Echoes `text` back and returns its length as structured data.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the given text"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let text = arguments["text"].as_str().unwrap_or_default().to_string();
        let len = text.len();
        Ok(ToolResult::ok("", text).with_data(serde_json::json!({ "length": len })))
    }
}
