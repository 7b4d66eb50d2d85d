//! State processors: ordered middleware run before and after each step.
//!
//! A [`ProcessorChain`] is folded front to back. Each processor sees the
//! state produced by the one before it; a processor may end the fold early
//! by returning [`ProcessorFlow::Halt`]. Processors whose `can_process`
//! returns `false` are skipped.

pub mod buffer;
pub mod context;
pub mod step;

pub use buffer::{MoveMessagesToBuffer, SummarizeBuffer};
pub use context::{AppendContextMetadata, ApplyCachedContext};
pub use step::{AppendStepMessages, MergeStepMetadata};

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::ExecutionState;
use tracing::debug;

use crate::error::EngineError;

/// What a processor hands back to the chain.
#[derive(Debug, Clone)]
pub enum ProcessorFlow {
    /// Pass the state on to the next processor.
    Continue(ExecutionState),
    /// Skip the remaining processors.
    Halt(ExecutionState),
}

impl ProcessorFlow {
    pub fn into_state(self) -> ExecutionState {
        match self {
            Self::Continue(state) | Self::Halt(state) => state,
        }
    }
}

#[async_trait]
pub trait StateProcessor: Send + Sync {
    fn name(&self) -> &str;

    fn can_process(&self, _state: &ExecutionState) -> bool {
        true
    }

    async fn process(&self, state: &ExecutionState) -> Result<ProcessorFlow, EngineError>;
}

/// An ordered list of processors.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    processors: Vec<Arc<dyn StateProcessor>>,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processor.
    pub fn with(mut self, processor: impl StateProcessor + 'static) -> Self {
        self.processors.push(Arc::new(processor));
        self
    }

    pub fn push(&mut self, processor: Arc<dyn StateProcessor>) {
        self.processors.push(processor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Fold `state` through the chain.
    ///
    /// On error the partially processed state is discarded; the caller
    /// still holds the state it passed in.
    pub async fn run(&self, state: &ExecutionState) -> Result<ExecutionState, EngineError> {
        let mut current = state.clone();
        for processor in &self.processors {
            if !processor.can_process(&current) {
                continue;
            }
            debug!(processor = processor.name(), "Applying state processor");
            match processor.process(&current).await? {
                ProcessorFlow::Continue(next) => current = next,
                ProcessorFlow::Halt(next) => {
                    debug!(processor = processor.name(), "Processor halted the chain");
                    return Ok(next);
                }
            }
        }
        Ok(current)
    }
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("processors", &self.names())
            .finish()
    }
}
