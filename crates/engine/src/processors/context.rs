//! Context seeding: cached system context and serialized metadata.

use async_trait::async_trait;
use stepwise_core::state::{CONTEXT_METADATA_SECTION, SYSTEM_SECTION};
use stepwise_core::{ExecutionState, Message};
use tracing::debug;

use super::{ProcessorFlow, StateProcessor};
use crate::error::EngineError;

/// Metadata marker set once the cached context has been seeded.
pub const CACHED_CONTEXT_APPLIED: &str = "_cached_context_applied";

/// Metadata keys starting with this prefix are engine bookkeeping and are
/// never shown to the model.
pub const INTERNAL_KEY_PREFIX: char = '_';

/// Seeds the cached context into a leading `system` section.
///
/// Runs once per state unless `force` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyCachedContext {
    force: bool,
}

impl ApplyCachedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-apply on every run, even if already applied.
    pub fn forced() -> Self {
        Self { force: true }
    }
}

#[async_trait]
impl StateProcessor for ApplyCachedContext {
    fn name(&self) -> &str {
        "apply_cached_context"
    }

    fn can_process(&self, state: &ExecutionState) -> bool {
        let has_context = state.cached_context().is_some_and(|c| !c.is_empty());
        has_context && (self.force || !state.metadata().contains_key(CACHED_CONTEXT_APPLIED))
    }

    async fn process(&self, state: &ExecutionState) -> Result<ProcessorFlow, EngineError> {
        let Some(context) = state.cached_context() else {
            return Ok(ProcessorFlow::Continue(state.clone()));
        };

        let seeded: Vec<Message> = context
            .system
            .iter()
            .map(Message::system)
            .chain(context.messages.iter().cloned())
            .collect();
        debug!(messages = seeded.len(), "Seeding cached context");

        let store = state.store().clone().with_leading_section(SYSTEM_SECTION, seeded);
        Ok(ProcessorFlow::Continue(
            state
                .clone()
                .with_store(store)
                .with_metadata(CACHED_CONTEXT_APPLIED, serde_json::Value::Bool(true)),
        ))
    }
}

/// Serializes the visible state metadata into one message in its own
/// section, replacing the previous one.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendContextMetadata;

fn visible_metadata(state: &ExecutionState) -> serde_json::Map<String, serde_json::Value> {
    state
        .metadata()
        .iter()
        .filter(|(k, _)| !k.starts_with(INTERNAL_KEY_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[async_trait]
impl StateProcessor for AppendContextMetadata {
    fn name(&self) -> &str {
        "append_context_metadata"
    }

    fn can_process(&self, state: &ExecutionState) -> bool {
        state
            .metadata()
            .keys()
            .any(|k| !k.starts_with(INTERNAL_KEY_PREFIX))
    }

    async fn process(&self, state: &ExecutionState) -> Result<ProcessorFlow, EngineError> {
        let json = serde_json::to_string_pretty(&visible_metadata(state))?;
        let message = Message::user(format!("Context metadata:\n```json\n{json}\n```"));
        let store = state
            .store()
            .clone()
            .with_section(CONTEXT_METADATA_SECTION, vec![message]);
        Ok(ProcessorFlow::Continue(state.clone().with_store(store)))
    }
}
