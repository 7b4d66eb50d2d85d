//! ReAct: Thought → Action → Observation.
//!
//! Each step the model states a thought and either calls one tool or gives
//! the final answer. The thought and action are written to the transcript as
//! an assistant message, the tool result as an `Observation:` message.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use stepwise_core::Inference;

use super::decision::{Decision, DecisionDriver, DecisionStyle};
use super::{InferenceOptions, ToolExecutor};

const INSTRUCTIONS: &str = "Solve the task step by step. On every turn reply with a single JSON \
object: {\"thought\": \"...\", \"action\": \"call_tool\", \"tool\": \"<name>\", \"arguments\": {...}} \
to use a tool, or {\"thought\": \"...\", \"action\": \"final_answer\", \"answer\": \"...\"} when done.";

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    thought: String,
    #[serde(flatten)]
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum Action {
    CallTool {
        tool: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
    FinalAnswer {
        answer: String,
    },
}

/// The ReAct reply format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReAct;

impl DecisionStyle for ReAct {
    fn name(&self) -> &str {
        "react"
    }

    fn instructions(&self) -> &str {
        INSTRUCTIONS
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "thought": {"type": "string"},
                "action": {"type": "string", "enum": ["call_tool", "final_answer"]},
                "tool": {"type": "string"},
                "arguments": {"type": "object"},
                "answer": {"type": "string"}
            },
            "required": ["thought", "action"]
        })
    }

    fn parse(&self, reply: serde_json::Value) -> Result<Decision, String> {
        let reply: Reply = serde_json::from_value(reply).map_err(|e| e.to_string())?;
        let reasoning = format!("Thought: {}", reply.thought);
        Ok(match reply.action {
            Action::CallTool { tool, arguments } => Decision::CallTool {
                reasoning,
                tool,
                arguments: if arguments.is_null() { json!({}) } else { arguments },
            },
            Action::FinalAnswer { answer } => Decision::Answer { reasoning, answer },
        })
    }
}

pub type ReActDriver = DecisionDriver<ReAct>;

impl DecisionDriver<ReAct> {
    pub fn new(inference: Arc<dyn Inference>, executor: ToolExecutor, options: InferenceOptions) -> Self {
        Self::with_style(ReAct, inference, executor, options)
    }
}
