//! Chat completion clients used for chunk summaries, query expansion, and answer composition.
//!
//! The OpenAI-compatible adapter talks to `/chat/completions`; the Ollama adapter issues the
//! equivalent non-streaming `/api/chat` request. Neither retries: callers decide what a failure
//! means for their unit of work.

use crate::config::{CompletionProvider, Config};
use crate::pinecone::client::{build_http_client, format_endpoint};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced while requesting a completion.
#[derive(Debug, Error)]
pub enum CompletionClientError {
    /// Provider was unreachable or the endpoint does not exist.
    #[error("Completion provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate completion: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed or carried no content.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// One chat message exchanged with the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker role (`system`, `user`, `assistant`).
    pub role: String,
    /// Message body.
    pub content: String,
}

impl ChatMessage {
    /// Build a `system` message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    /// Build a `user` message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Request payload passed to the completion provider.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Ordered conversation sent to the model.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f64,
}

/// Interface implemented by chat completion providers.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Return the assistant text for the supplied conversation.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError>;
}

/// Build a completion client based on configuration.
pub fn get_completion_client(
    config: &Config,
) -> Result<Arc<dyn CompletionClient>, CompletionClientError> {
    let http = build_http_client(config.request_timeout())
        .map_err(|error| CompletionClientError::ProviderUnavailable(error.to_string()))?;
    let client: Arc<dyn CompletionClient> = match config.completion_provider {
        CompletionProvider::OpenAI => Arc::new(OpenAiCompletionClient {
            http,
            base_url: config.openai_base_url.clone(),
            api_key: config.completion_api_key.clone().unwrap_or_default(),
        }),
        CompletionProvider::Ollama => Arc::new(OllamaCompletionClient {
            http,
            base_url: config.ollama_url.clone(),
        }),
    };
    Ok(client)
}

struct OpenAiCompletionClient {
    http: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: ChatMessage,
}

#[async_trait]
impl CompletionClient for OpenAiCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError> {
        let endpoint = format_endpoint(&self.base_url, "chat/completions");
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": false,
        });

        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                CompletionClientError::ProviderUnavailable(format!(
                    "failed to reach {endpoint}: {error}"
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let body: OpenAiResponse = response.json().await.map_err(|error| {
            CompletionClientError::InvalidResponse(format!(
                "failed to decode OpenAI response: {error}"
            ))
        })?;

        body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| CompletionClientError::InvalidResponse("empty choices".into()))
    }
}

struct OllamaCompletionClient {
    http: Client,
    base_url: String,
}

impl OllamaCompletionClient {
    fn endpoint(&self) -> String {
        format_endpoint(&self.base_url, "api/chat")
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
    done: bool,
}

#[async_trait]
impl CompletionClient for OllamaCompletionClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError> {
        let payload = json!({
            "model": request.model,
            "messages": request.messages,
            "stream": false,
            "options": { "temperature": request.temperature },
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                CompletionClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(CompletionClientError::ProviderUnavailable(format!(
                "Ollama endpoint {} returned 404",
                self.endpoint()
            )));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CompletionClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            CompletionClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;

        if !body.done {
            return Err(CompletionClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.message.content.trim().to_string())
    }
}
