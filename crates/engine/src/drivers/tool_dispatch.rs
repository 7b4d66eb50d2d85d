//! Native tool calling: the model sees the tool definitions and either
//! answers or requests calls, which are executed right away.

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::{ExecutionState, Inference, Step, StepType};
use tracing::{debug, info};

use super::{infer, InferenceOptions, StepDriver, ToolExecutor};
use crate::compiler::{AllSections, MessageCompiler};
use crate::error::EngineError;

pub struct ToolDispatchDriver {
    inference: Arc<dyn Inference>,
    executor: ToolExecutor,
    compiler: Arc<dyn MessageCompiler>,
    options: InferenceOptions,
}

impl ToolDispatchDriver {
    pub fn new(inference: Arc<dyn Inference>, executor: ToolExecutor, options: InferenceOptions) -> Self {
        Self {
            inference,
            executor,
            compiler: Arc::new(AllSections),
            options,
        }
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn MessageCompiler>) -> Self {
        self.compiler = compiler;
        self
    }
}

#[async_trait]
impl StepDriver for ToolDispatchDriver {
    fn name(&self) -> &str {
        "tool_dispatch"
    }

    async fn make_next_step(&self, state: &ExecutionState) -> Result<Step, EngineError> {
        let messages = self.compiler.compile(state);
        let mut request = self.options.request(state, messages.clone());
        request.tools = self.executor.definitions();

        let response = infer(self.inference.as_ref(), request).await?;
        let assistant = response.message;

        if assistant.tool_calls.is_empty() {
            debug!("Model answered without tool calls");
            return Ok(Step::new(StepType::Final, messages, vec![assistant])
                .with_usage(response.usage)
                .with_finish_reason(response.finish_reason));
        }

        info!(count = assistant.tool_calls.len(), "Model requested tool calls");

        let mut outcomes = Vec::with_capacity(assistant.tool_calls.len());
        for raw in &assistant.tool_calls {
            outcomes.push(self.executor.execute_raw(raw).await);
        }

        let mut output = vec![assistant.clone()];
        output.extend(outcomes.iter().map(|o| o.to_message()));

        let mut step = Step::new(StepType::ToolExecution, messages, output)
            .with_tool_calls(outcomes.iter().map(|o| o.execution.call.clone()).collect())
            .with_usage(response.usage)
            .with_finish_reason(response.finish_reason);
        for outcome in &outcomes {
            if let Some(data) = outcome.data() {
                step = step.with_metadata(outcome.execution.call.name.clone(), data.clone());
            }
        }
        Ok(step.with_tool_executions(outcomes.into_iter().map(|o| o.execution).collect()))
    }
}
