//! Per-chunk summarization through the completion client.

use super::prompts::summarization_messages;
use crate::completion::{CompletionClient, CompletionClientError, CompletionRequest};
use std::sync::Arc;

/// Condenses one chunk through the completion service. No retries.
#[derive(Clone)]
pub struct Summarizer {
    client: Arc<dyn CompletionClient>,
    model: String,
    temperature: f64,
}

impl Summarizer {
    /// Build a summarizer issuing requests with `model` at `temperature`.
    pub fn new(client: Arc<dyn CompletionClient>, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            client,
            model: model.into(),
            temperature,
        }
    }

    /// Summarize a single chunk.
    pub async fn summarize(&self, chunk: &str) -> Result<String, CompletionClientError> {
        self.client
            .complete(CompletionRequest {
                model: self.model.clone(),
                messages: summarization_messages(chunk),
                temperature: self.temperature,
            })
            .await
    }
}
