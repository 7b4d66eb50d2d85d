//! Stream assembly: merges streamed chunks into one complete response.

use std::collections::BTreeMap;

use stepwise_core::{
    FinishReason, InferenceResponse, Message, MessageToolCall, ProviderError, StreamChunk, Usage,
};
use tokio::sync::mpsc;

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: Option<String>,
    arguments: String,
}

/// Accumulates content and tool-argument deltas.
///
/// Tool call deltas are keyed by their `index`; the first non-empty id and
/// name win, argument fragments are concatenated in arrival order.
#[derive(Debug, Default)]
pub struct StreamAssembler {
    content: String,
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    done: bool,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: StreamChunk) {
        if let Some(content) = chunk.content {
            self.content.push_str(&content);
        }
        for delta in chunk.tool_calls {
            let call = self.tool_calls.entry(delta.index).or_default();
            if call.id.is_none() {
                call.id = delta.id.filter(|id| !id.is_empty());
            }
            if call.name.is_none() {
                call.name = delta.name.filter(|name| !name.is_empty());
            }
            call.arguments.push_str(&delta.arguments);
        }
        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage;
        }
        self.done |= chunk.done;
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Build the complete response. Calls that never received a name are dropped.
    pub fn finish(self, model: impl Into<String>) -> InferenceResponse {
        let tool_calls: Vec<MessageToolCall> = self
            .tool_calls
            .into_iter()
            .filter_map(|(index, call)| {
                let name = call.name?;
                Some(MessageToolCall {
                    id: call.id.unwrap_or_else(|| format!("call_{index}")),
                    name,
                    arguments: call.arguments,
                })
            })
            .collect();

        let message = Message::assistant(self.content).with_tool_calls(tool_calls);
        InferenceResponse {
            message,
            finish_reason: self.finish_reason,
            usage: self.usage.unwrap_or_default(),
            model: model.into(),
        }
    }
}

/// Drain a chunk receiver into one response.
pub async fn collect_stream(
    mut rx: mpsc::Receiver<Result<StreamChunk, ProviderError>>,
    model: &str,
) -> Result<InferenceResponse, ProviderError> {
    let mut assembler = StreamAssembler::new();
    while let Some(chunk) = rx.recv().await {
        assembler.push(chunk?);
        if assembler.is_done() {
            break;
        }
    }
    Ok(assembler.finish(model))
}
