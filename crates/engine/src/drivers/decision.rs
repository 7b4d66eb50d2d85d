//! Structured decision drivers.
//!
//! The model replies with a JSON decision (constrained through the request's
//! response format). A [`DecisionStyle`] supplies the instructions, the
//! schema and the parser; [`DecisionDriver`] does the rest: call the model,
//! extract the decision, run the chosen tool or record the answer.
//!
//! A reply that cannot be turned into a decision is not an error. It becomes
//! a `Failure` step whose messages tell the model what went wrong, so the
//! next iteration can correct itself.

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::{
    ErrorKind, ExecutionState, Inference, InferenceResponse, Message, ResponseFormat, Step,
    StepError, StepType, ToolCall,
};
use tracing::{debug, info, warn};

use super::{infer, InferenceOptions, StepDriver, ToolExecutor};
use crate::compiler::{AllSections, MessageCompiler};
use crate::error::EngineError;

pub const EXTRACTION_FAILED_THOUGHT: &str = "Thought: Decision extraction failed.";

/// What the model decided to do.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    CallTool {
        /// The model's reasoning, already formatted for the transcript
        reasoning: String,
        tool: String,
        arguments: serde_json::Value,
    },
    Answer {
        reasoning: String,
        answer: String,
    },
}

/// The prompt/schema/parser triple of one reasoning format.
pub trait DecisionStyle: Send + Sync {
    fn name(&self) -> &str;

    /// Instructions placed in the leading system message.
    fn instructions(&self) -> &str;

    /// JSON schema of the reply.
    fn schema(&self) -> serde_json::Value;

    fn parse(&self, reply: serde_json::Value) -> Result<Decision, String>;
}

/// Pull a JSON object out of a model reply. Markdown code fences and text
/// around the object are tolerated.
pub fn extract_json(text: &str) -> Result<serde_json::Value, String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err("model returned an empty reply".into());
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str::<serde_json::Value>(unfenced) {
        return Ok(value);
    }

    let (Some(start), Some(end)) = (unfenced.find('{'), unfenced.rfind('}')) else {
        return Err("no JSON object found in model reply".into());
    };
    if end < start {
        return Err("no JSON object found in model reply".into());
    }
    serde_json::from_str(&unfenced[start..=end]).map_err(|e| format!("invalid JSON: {e}"))
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag on the opening fence line.
    let body = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Drives one decision per step in the given style.
pub struct DecisionDriver<S> {
    inference: Arc<dyn Inference>,
    executor: ToolExecutor,
    compiler: Arc<dyn MessageCompiler>,
    options: InferenceOptions,
    style: S,
}

impl<S: DecisionStyle> DecisionDriver<S> {
    pub fn with_style(
        style: S,
        inference: Arc<dyn Inference>,
        executor: ToolExecutor,
        options: InferenceOptions,
    ) -> Self {
        Self {
            inference,
            executor,
            compiler: Arc::new(AllSections),
            options,
            style,
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn MessageCompiler>) -> Self {
        self.compiler = compiler;
        self
    }

    fn system_prompt(&self) -> String {
        let mut prompt = self.style.instructions().to_string();
        let tools = self.executor.definitions();
        if tools.is_empty() {
            prompt.push_str("\n\nNo tools are available; answer directly.");
        } else {
            prompt.push_str("\n\nAvailable tools:");
            for tool in tools {
                prompt.push_str(&format!(
                    "\n- {}: {} Parameters: {}",
                    tool.name, tool.description, tool.parameters
                ));
            }
        }
        prompt
    }

    fn extraction_failure(&self, input: Vec<Message>, response: InferenceResponse, reason: String) -> Step {
        warn!(style = self.style.name(), reason = %reason, "Decision extraction failed");
        Step::failure(input, StepError::new(ErrorKind::DecisionExtraction, reason.clone()))
            .with_output_messages(vec![
                Message::assistant(EXTRACTION_FAILED_THOUGHT),
                Message::user(format!("[Error] Failed to extract decision: {reason}")),
            ])
            .with_usage(response.usage)
            .with_finish_reason(response.finish_reason)
            .with_metadata("_raw_reply", serde_json::Value::String(response.message.content))
    }
}

#[async_trait]
impl<S: DecisionStyle> StepDriver for DecisionDriver<S> {
    fn name(&self) -> &str {
        self.style.name()
    }

    async fn make_next_step(&self, state: &ExecutionState) -> Result<Step, EngineError> {
        let mut input = vec![Message::system(self.system_prompt())];
        input.extend(self.compiler.compile(state));

        let mut request = self.options.request(state, input.clone());
        request.response_format = Some(ResponseFormat::JsonSchema {
            name: format!("{}_decision", self.style.name()),
            schema: self.style.schema(),
        });

        let response = infer(self.inference.as_ref(), request).await?;
        let decision = extract_json(&response.message.content).and_then(|v| self.style.parse(v));

        let decision = match decision {
            Ok(decision) => decision,
            Err(reason) => return Ok(self.extraction_failure(input, response, reason)),
        };

        match decision {
            Decision::Answer { reasoning, answer } => {
                debug!(style = self.style.name(), "Decision: final answer");
                Ok(Step::new(StepType::Final, input, vec![Message::assistant(answer)])
                    .with_usage(response.usage)
                    .with_finish_reason(response.finish_reason)
                    .with_metadata("_reasoning", serde_json::Value::String(reasoning)))
            }
            Decision::CallTool {
                reasoning,
                tool,
                arguments,
            } => {
                info!(style = self.style.name(), tool = %tool, "Decision: call tool");
                let id = format!("call_{}_{tool}", state.step_count() + 1);
                let call = ToolCall::new(id, tool, arguments);
                let action = Message::assistant(format!(
                    "{reasoning}\nAction: {} {}",
                    call.name,
                    call.arguments_json()
                ));
                let outcome = self.executor.execute(call).await;
                let observation = Message::user(format!("Observation: {}", outcome.observation));

                let mut step = Step::new(StepType::ToolExecution, input, vec![action, observation])
                    .with_tool_calls(vec![outcome.execution.call.clone()])
                    .with_usage(response.usage)
                    .with_finish_reason(response.finish_reason);
                if let Some(data) = outcome.data() {
                    step = step.with_metadata(outcome.execution.call.name.clone(), data.clone());
                }
                Ok(step.with_tool_executions(vec![outcome.execution]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_json_is_extracted() {
        let value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn fenced_json_is_extracted() {
        let value = extract_json("```json\n{\"a\": 1}\n```").unwrap();
        assert_eq!(value["a"], 1);
        let bare = extract_json("```\n{\"b\": 2}\n```").unwrap();
        assert_eq!(bare["b"], 2);
    }

    #[test]
    fn surrounding_text_is_ignored() {
        let value = extract_json("Sure! Here it is: {\"a\": {\"b\": true}} Hope that helps.").unwrap();
        assert_eq!(value, json!({"a": {"b": true}}));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(extract_json("").is_err());
        assert!(extract_json("I think the answer is 42").is_err());
        assert!(extract_json("} oops {").is_err());
        assert!(extract_json("{\"a\": }").unwrap_err().contains("invalid JSON"));
    }
}
