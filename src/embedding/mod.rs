//! Embedding client abstraction and HTTP adapters.
//!
//! Every adapter returns exactly one vector per input, in input order. A transport failure or a
//! non-success status fails the whole call; partial results are never returned.

use crate::config::{Config, EmbeddingProvider};
use crate::pinecone::client::{build_http_client, format_endpoint};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

const PINECONE_API_VERSION: &str = "2024-07";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Provider returned a different number of vectors than inputs.
    #[error("Embedding count mismatch: sent {expected} inputs, received {actual} vectors")]
    CountMismatch {
        /// Number of inputs submitted.
        expected: usize,
        /// Number of vectors returned.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, preserving order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    let http = build_http_client(config.request_timeout())
        .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        "Building embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Pinecone => Arc::new(PineconeEmbeddingClient {
            http,
            base_url: config.pinecone_control_url.clone(),
            api_key: config.pinecone_api_key.clone(),
            model: config.embedding_model.clone(),
        }),
        EmbeddingProvider::OpenAI => Arc::new(OpenAiEmbeddingClient {
            http,
            base_url: config.openai_base_url.clone(),
            api_key: config.completion_api_key.clone().unwrap_or_default(),
            model: config.embedding_model.clone(),
        }),
    };
    Ok(client)
}

/// Pinecone hosted inference (`POST /embed`), passage input type, truncating at the end.
struct PineconeEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct PineconeEmbedResponse {
    data: Vec<PineconeEmbedding>,
}

#[derive(Deserialize)]
struct PineconeEmbedding {
    values: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for PineconeEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        let inputs: Vec<_> = texts.into_iter().map(|text| json!({ "text": text })).collect();
        let payload = json!({
            "model": self.model,
            "parameters": { "input_type": "passage", "truncate": "END" },
            "inputs": inputs,
        });

        let response = self
            .http
            .post(format_endpoint(&self.base_url, "embed"))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(&payload)
            .send()
            .await
            .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Pinecone returned {status}: {body}"
            )));
        }

        let body: PineconeEmbedResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingClientError::InvalidResponse(error.to_string()))?;
        let vectors: Vec<Vec<f32>> = body.data.into_iter().map(|item| item.values).collect();
        ensure_count(expected, vectors)
    }
}

/// OpenAI-compatible `/embeddings` endpoint.
struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let expected = texts.len();
        let response = self
            .http
            .post(format_endpoint(&self.base_url, "embeddings"))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| EmbeddingClientError::GenerationFailed(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let mut body: OpenAiEmbedResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingClientError::InvalidResponse(error.to_string()))?;
        // The API documents `index` as the input position; do not rely on response order.
        body.data.sort_by_key(|item| item.index);
        let vectors = body.data.into_iter().map(|item| item.embedding).collect();
        ensure_count(expected, vectors)
    }
}

fn ensure_count(
    expected: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
    if vectors.len() == expected {
        Ok(vectors)
    } else {
        Err(EmbeddingClientError::CountMismatch {
            expected,
            actual: vectors.len(),
        })
    }
}
