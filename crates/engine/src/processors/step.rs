//! Post-processors that fold the current step back into the state.

use async_trait::async_trait;
use stepwise_core::state::DEFAULT_SECTION;
use stepwise_core::ExecutionState;

use super::{ProcessorFlow, StateProcessor};
use crate::error::EngineError;

/// Appends the current step's output messages to the active section, so the
/// next step sees the answer or the tool observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendStepMessages;

#[async_trait]
impl StateProcessor for AppendStepMessages {
    fn name(&self) -> &str {
        "append_step_messages"
    }

    fn can_process(&self, state: &ExecutionState) -> bool {
        state
            .current_step()
            .is_some_and(|s| !s.output_messages.is_empty())
    }

    async fn process(&self, state: &ExecutionState) -> Result<ProcessorFlow, EngineError> {
        let Some(step) = state.current_step() else {
            return Ok(ProcessorFlow::Continue(state.clone()));
        };
        let store = state
            .store()
            .clone()
            .with_appended(DEFAULT_SECTION, step.output_messages.iter().cloned());
        Ok(ProcessorFlow::Continue(state.clone().with_store(store)))
    }
}

/// Merges the current step's metadata (structured tool data, decision
/// traces) into the state metadata. Step values win on key collisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeStepMetadata;

#[async_trait]
impl StateProcessor for MergeStepMetadata {
    fn name(&self) -> &str {
        "merge_step_metadata"
    }

    fn can_process(&self, state: &ExecutionState) -> bool {
        state.current_step().is_some_and(|s| !s.metadata.is_empty())
    }

    async fn process(&self, state: &ExecutionState) -> Result<ProcessorFlow, EngineError> {
        let entries: Vec<_> = state
            .current_step()
            .map(|s| s.metadata.clone().into_iter().collect())
            .unwrap_or_default();
        let merged = entries
            .into_iter()
            .fold(state.clone(), |acc, (key, value)| acc.with_metadata(key, value));
        Ok(ProcessorFlow::Continue(merged))
    }
}
