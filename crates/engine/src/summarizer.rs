//! A [`Summarizer`] backed by the inference collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use stepwise_core::{Inference, InferenceRequest, Message, ProviderError, Summarizer};
use tracing::debug;

const SUMMARY_INSTRUCTIONS: &str = "Summarize the conversation below. Keep facts, decisions, \
tool results and open questions. Reply with the summary only.";

pub struct InferenceSummarizer {
    inference: Arc<dyn Inference>,
    model: String,
}

impl InferenceSummarizer {
    pub fn new(inference: Arc<dyn Inference>, model: impl Into<String>) -> Self {
        Self {
            inference,
            model: model.into(),
        }
    }
}

/// Renders messages as `role: content` lines.
fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl Summarizer for InferenceSummarizer {
    async fn summarize(&self, messages: &[Message], token_limit: usize) -> Result<String, ProviderError> {
        let mut request = InferenceRequest::new(
            self.model.clone(),
            vec![
                Message::system(SUMMARY_INSTRUCTIONS),
                Message::user(transcript(messages)),
            ],
        );
        request.temperature = 0.0;
        request.max_tokens = Some(u32::try_from(token_limit).unwrap_or(u32::MAX));

        debug!(
            backend = self.inference.name(),
            messages = messages.len(),
            token_limit,
            "Requesting summary"
        );
        let response = self.inference.complete(request).await?;
        Ok(response.message.content.trim().to_string())
    }
}
