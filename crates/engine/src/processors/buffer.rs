//! History buffering: move overflow out of the active conversation, then
//! condense it into a summary once the buffer grows too large.

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::state::{BUFFER_SECTION, DEFAULT_SECTION, SUMMARY_SECTION};
use stepwise_core::{ExecutionState, Message, Summarizer};
use tracing::{debug, info};

use super::{ProcessorFlow, StateProcessor};
use crate::error::EngineError;
use crate::token::{estimate_message_tokens, estimate_messages_tokens};

/// Keeps the active section under a token threshold.
///
/// The newest messages that fit stay (always at least the last one); the
/// rest are appended, oldest first, to the end of the buffer section, which
/// sits right before the active section.
#[derive(Debug, Clone)]
pub struct MoveMessagesToBuffer {
    max_tokens: usize,
    section: String,
    buffer_section: String,
}

impl MoveMessagesToBuffer {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            max_tokens,
            section: DEFAULT_SECTION.into(),
            buffer_section: BUFFER_SECTION.into(),
        }
    }

    pub fn with_sections(mut self, section: impl Into<String>, buffer_section: impl Into<String>) -> Self {
        self.section = section.into();
        self.buffer_section = buffer_section.into();
        self
    }

    /// Index of the first message that stays in the active section.
    fn split_point(&self, messages: &[Message]) -> usize {
        let mut used = 0;
        let mut split = messages.len();
        for (idx, message) in messages.iter().enumerate().rev() {
            let tokens = estimate_message_tokens(message);
            if split < messages.len() && used + tokens > self.max_tokens {
                break;
            }
            used += tokens;
            split = idx;
        }
        split
    }
}

#[async_trait]
impl StateProcessor for MoveMessagesToBuffer {
    fn name(&self) -> &str {
        "move_messages_to_buffer"
    }

    fn can_process(&self, state: &ExecutionState) -> bool {
        let messages = state.store().messages(&self.section);
        messages.len() > 1 && estimate_messages_tokens(messages) > self.max_tokens
    }

    async fn process(&self, state: &ExecutionState) -> Result<ProcessorFlow, EngineError> {
        let store = state.store();
        let messages = store.messages(&self.section);
        let split = self.split_point(messages);
        if split == 0 {
            return Ok(ProcessorFlow::Continue(state.clone()));
        }

        let (overflow, kept) = messages.split_at(split);
        let mut buffered = store.messages(&self.buffer_section).to_vec();
        buffered.extend_from_slice(overflow);

        debug!(
            moved = overflow.len(),
            kept = kept.len(),
            buffered = buffered.len(),
            "Moving overflow messages to buffer"
        );

        let store = store
            .clone()
            .with_section(&self.section, kept.to_vec())
            .with_section_before(&self.section, &self.buffer_section, buffered);
        Ok(ProcessorFlow::Continue(state.clone().with_store(store)))
    }
}

/// Replaces an oversized buffer with a single summary message.
///
/// A previous summary is fed back to the summarizer together with the
/// buffer, so the summary section always holds one message.
pub struct SummarizeBuffer {
    summarizer: Arc<dyn Summarizer>,
    max_buffer_tokens: usize,
    max_summary_tokens: usize,
    buffer_section: String,
}

impl SummarizeBuffer {
    pub fn new(summarizer: Arc<dyn Summarizer>, max_buffer_tokens: usize, max_summary_tokens: usize) -> Self {
        Self {
            summarizer,
            max_buffer_tokens,
            max_summary_tokens,
            buffer_section: BUFFER_SECTION.into(),
        }
    }
}

#[async_trait]
impl StateProcessor for SummarizeBuffer {
    fn name(&self) -> &str {
        "summarize_buffer"
    }

    fn can_process(&self, state: &ExecutionState) -> bool {
        estimate_messages_tokens(state.store().messages(&self.buffer_section)) > self.max_buffer_tokens
    }

    async fn process(&self, state: &ExecutionState) -> Result<ProcessorFlow, EngineError> {
        let store = state.store();
        let mut input = store.messages(SUMMARY_SECTION).to_vec();
        input.extend_from_slice(store.messages(&self.buffer_section));

        let summary = self
            .summarizer
            .summarize(&input, self.max_summary_tokens)
            .await
            .map_err(|e| EngineError::processor(self.name(), e.to_string()))?;

        info!(
            summarized = input.len(),
            summary_len = summary.len(),
            "Buffer summarized"
        );

        let message = Message::user(format!("Summary of the earlier conversation:\n{summary}"))
            .with_metadata("summary", serde_json::Value::Bool(true));
        let store = store
            .clone()
            .with_section_before(&self.buffer_section, SUMMARY_SECTION, vec![message])
            .without_section(&self.buffer_section);
        Ok(ProcessorFlow::Continue(state.clone().with_store(store)))
    }
}
