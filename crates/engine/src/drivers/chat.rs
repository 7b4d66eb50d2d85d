//! Plain chat turn: one completion, one `Final` step.

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::{ExecutionState, Inference, Step, StepType};
use tracing::debug;

use super::{infer, InferenceOptions, StepDriver};
use crate::compiler::{AllSections, MessageCompiler};
use crate::error::EngineError;

pub struct ChatDriver {
    inference: Arc<dyn Inference>,
    compiler: Arc<dyn MessageCompiler>,
    options: InferenceOptions,
}

impl ChatDriver {
    pub fn new(inference: Arc<dyn Inference>, options: InferenceOptions) -> Self {
        Self {
            inference,
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
impl StepDriver for ChatDriver {
    fn name(&self) -> &str {
        "chat"
    }

    async fn make_next_step(&self, state: &ExecutionState) -> Result<Step, EngineError> {
        let messages = self.compiler.compile(state);
        let request = self.options.request(state, messages.clone());
        let response = infer(self.inference.as_ref(), request).await?;
        debug!(
            chars = response.message.content.len(),
            usage = response.usage.total(),
            "Chat response received"
        );

        Ok(Step::new(StepType::Final, messages, vec![response.message])
            .with_usage(response.usage)
            .with_finish_reason(response.finish_reason))
    }
}
