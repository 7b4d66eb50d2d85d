//! OODA: Observe → Orient → Decide → Act.
//!
//! The model reports what it observes, how it reads the situation and what
//! it decided; the act is either one tool call or the final answer.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use stepwise_core::Inference;

use super::decision::{Decision, DecisionDriver, DecisionStyle};
use super::{InferenceOptions, ToolExecutor};

const INSTRUCTIONS: &str = "Work through the OODA loop. On every turn reply with a single JSON \
object with the fields \"observe\", \"orient\" and \"decide\" (strings), plus either \"act\": \
{\"tool\": \"<name>\", \"arguments\": {...}} to use a tool or \"answer\": \"...\" when the task is done.";

#[derive(Debug, Deserialize)]
struct Reply {
    #[serde(default)]
    observe: String,
    #[serde(default)]
    orient: String,
    #[serde(default)]
    decide: String,
    #[serde(default)]
    act: Option<Act>,
    #[serde(default)]
    answer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Act {
    tool: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ooda;

impl DecisionStyle for Ooda {
    fn name(&self) -> &str {
        "ooda"
    }

    fn instructions(&self) -> &str {
        INSTRUCTIONS
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "observe": {"type": "string"},
                "orient": {"type": "string"},
                "decide": {"type": "string"},
                "act": {
                    "type": ["object", "null"],
                    "properties": {
                        "tool": {"type": "string"},
                        "arguments": {"type": "object"}
                    },
                    "required": ["tool"]
                },
                "answer": {"type": ["string", "null"]}
            },
            "required": ["observe", "orient", "decide"]
        })
    }

    fn parse(&self, reply: serde_json::Value) -> Result<Decision, String> {
        let reply: Reply = serde_json::from_value(reply).map_err(|e| e.to_string())?;
        let reasoning = format!(
            "Observe: {}\nOrient: {}\nDecide: {}",
            reply.observe, reply.orient, reply.decide
        );
        match (reply.act, reply.answer) {
            (Some(act), _) => Ok(Decision::CallTool {
                reasoning,
                tool: act.tool,
                arguments: if act.arguments.is_null() { json!({}) } else { act.arguments },
            }),
            (None, Some(answer)) => Ok(Decision::Answer { reasoning, answer }),
            (None, None) => Err("decision has neither an act nor an answer".into()),
        }
    }
}

pub type OodaDriver = DecisionDriver<Ooda>;

impl DecisionDriver<Ooda> {
    pub fn new(inference: Arc<dyn Inference>, executor: ToolExecutor, options: InferenceOptions) -> Self {
        Self::with_style(Ooda, inference, executor, options)
    }
}
