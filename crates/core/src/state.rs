//! Execution state: the immutable value threaded through the engine.
//!
//! Every `with_*` method consumes the state and returns a new one. The step
//! history sits behind an `Arc` and is copied on write, so a clone taken
//! earlier (for example a snapshot yielded by the engine's iterator) never
//! observes later steps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::message::Message;
use crate::step::Step;
use crate::usage::Usage;

/// Section the conversation lives in.
pub const DEFAULT_SECTION: &str = "messages";
/// Section holding overflowed history.
pub const BUFFER_SECTION: &str = "buffer";
/// Section holding the summary of summarized history.
pub const SUMMARY_SECTION: &str = "summary";
/// Leading section seeded from the cached context.
pub const SYSTEM_SECTION: &str = "system";
/// Section holding the serialized state metadata.
pub const CONTEXT_METADATA_SECTION: &str = "context_metadata";

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// A named, ordered run of messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Section {
    pub fn new(name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            name: name.into(),
            messages,
        }
    }
}

/// Ordered collection of named sections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageStore {
    #[serde(default)]
    sections: Vec<Section>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Messages of a section; empty when the section does not exist.
    pub fn messages(&self, name: &str) -> &[Message] {
        self.section(name).map(|s| s.messages.as_slice()).unwrap_or(&[])
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.section(name).is_some()
    }

    pub fn section_names(&self) -> Vec<&str> {
        self.sections.iter().map(|s| s.name.as_str()).collect()
    }

    /// Every message, section by section.
    pub fn all_messages(&self) -> Vec<Message> {
        self.sections
            .iter()
            .flat_map(|s| s.messages.iter().cloned())
            .collect()
    }

    /// Total number of messages across sections.
    pub fn len(&self) -> usize {
        self.sections.iter().map(|s| s.messages.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.sections.iter().position(|s| s.name == name)
    }

    /// Replace a section's messages, creating it at the end if missing.
    pub fn with_section(mut self, name: &str, messages: Vec<Message>) -> Self {
        match self.position(name) {
            Some(idx) => self.sections[idx].messages = messages,
            None => self.sections.push(Section::new(name, messages)),
        }
        self
    }

    /// Replace a section's messages, creating it right before `anchor` if
    /// missing (or at the end when `anchor` does not exist either).
    pub fn with_section_before(mut self, anchor: &str, name: &str, messages: Vec<Message>) -> Self {
        if let Some(idx) = self.position(name) {
            self.sections[idx].messages = messages;
            return self;
        }
        let at = self.position(anchor).unwrap_or(self.sections.len());
        self.sections.insert(at, Section::new(name, messages));
        self
    }

    /// Replace a section's messages, creating it first in order if missing.
    pub fn with_leading_section(self, name: &str, messages: Vec<Message>) -> Self {
        let first = self.sections.first().map(|s| s.name.clone());
        match first {
            Some(first) => self.with_section_before(&first, name, messages),
            None => self.with_section(name, messages),
        }
    }

    /// Append messages to a section, creating it at the end if missing.
    pub fn with_appended(mut self, name: &str, messages: impl IntoIterator<Item = Message>) -> Self {
        match self.position(name) {
            Some(idx) => self.sections[idx].messages.extend(messages),
            None => self
                .sections
                .push(Section::new(name, messages.into_iter().collect())),
        }
        self
    }

    pub fn without_section(mut self, name: &str) -> Self {
        self.sections.retain(|s| s.name != name);
        self
    }
}

/// Inference context seeded before the first step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CachedContext {
    /// System prompt fragments, one system message each
    #[serde(default)]
    pub system: Vec<String>,
    /// Extra leading messages (examples, fixed instructions)
    #[serde(default)]
    pub messages: Vec<Message>,
    /// Provider-side prompt caching hints
    #[serde(default)]
    pub cache_hints: serde_json::Map<String, serde_json::Value>,
}

impl CachedContext {
    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.messages.is_empty() && self.cache_hints.is_empty()
    }
}

/// Immutable snapshot of conversation and execution progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    id: String,
    #[serde(default)]
    store: MessageStore,
    #[serde(default)]
    steps: Arc<Vec<Step>>,
    #[serde(default)]
    status: ExecutionStatus,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cached_context: Option<CachedContext>,
    started_at: DateTime<Utc>,
}

impl ExecutionState {
    /// A fresh, empty state.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            store: MessageStore::new(),
            steps: Arc::new(Vec::new()),
            status: ExecutionStatus::InProgress,
            usage: Usage::default(),
            metadata: serde_json::Map::new(),
            cached_context: None,
            started_at: Utc::now(),
        }
    }

    /// A fresh state whose conversation starts with the given messages.
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self::new().with_messages(messages)
    }

    // --- projections ---

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The flat conversation (the default section).
    pub fn messages(&self) -> &[Message] {
        self.store.messages(DEFAULT_SECTION)
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn steps(&self) -> std::slice::Iter<'_, Step> {
        self.steps.iter()
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step_at(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.steps.last()
    }

    pub fn status(&self) -> ExecutionStatus {
        self.status
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn metadata(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.metadata
    }

    pub fn cached_context(&self) -> Option<&CachedContext> {
        self.cached_context.as_ref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Number of failed steps at the end of the history with no success in between.
    pub fn consecutive_failures(&self) -> usize {
        self.steps.iter().rev().take_while(|s| s.has_errors()).count()
    }

    pub fn total_failures(&self) -> usize {
        self.steps.iter().filter(|s| s.has_errors()).count()
    }

    // --- mutators ---

    /// Restart the clock that time limits are measured against.
    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }

    /// Replace the default section.
    pub fn with_messages(mut self, messages: Vec<Message>) -> Self {
        self.store = std::mem::take(&mut self.store).with_section(DEFAULT_SECTION, messages);
        self
    }

    /// Append one message to the default section.
    pub fn with_added_message(mut self, message: Message) -> Self {
        self.store = std::mem::take(&mut self.store).with_appended(DEFAULT_SECTION, [message]);
        self
    }

    pub fn with_store(mut self, store: MessageStore) -> Self {
        self.store = store;
        self
    }

    /// Append a step and fold its usage into the running total.
    pub fn with_added_step(mut self, step: Step) -> Self {
        self.usage += step.usage;
        Arc::make_mut(&mut self.steps).push(step);
        self
    }

    /// Replace the current (last) step. Appends when there is none yet.
    pub fn with_current_step(mut self, step: Step) -> Self {
        let steps = Arc::make_mut(&mut self.steps);
        match steps.last_mut() {
            Some(last) => *last = step,
            None => steps.push(step),
        }
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn without_metadata(mut self, key: &str) -> Self {
        self.metadata.remove(key);
        self
    }

    pub fn with_cached_context(mut self, context: CachedContext) -> Self {
        self.cached_context = Some(context);
        self
    }

    /// Move to `status`. A terminal status is kept; use [`reopen`](Self::reopen)
    /// to continue a finished run.
    pub fn with_status(mut self, status: ExecutionStatus) -> Self {
        if self.status.is_terminal() && status != self.status {
            debug!(
                state_id = %self.id,
                current = %self.status,
                requested = %status,
                "Ignoring status change on finished state"
            );
            return self;
        }
        self.status = status;
        self
    }

    /// Reset a finished run to `InProgress`, keeping its history.
    pub fn reopen(mut self) -> Self {
        self.status = ExecutionStatus::InProgress;
        self
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}
