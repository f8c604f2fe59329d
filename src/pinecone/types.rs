//! Shared types used by the Pinecone client and the ingestion pipeline.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors returned while interacting with Pinecone.
#[derive(Debug, Error)]
pub enum PineconeError {
    /// Base URL or index host failed to parse or normalize.
    #[error("Invalid Pinecone URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Pinecone responded with an unexpected status code.
    #[error("Unexpected Pinecone response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Pinecone.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Describe-index returned an index that is not ready to serve traffic.
    #[error("Index '{0}' has no data-plane host")]
    MissingHost(String),
}

/// Persisted unit written to the index: one vector per document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorRecord {
    /// Identifier unique within the namespace (the document filename for uploads).
    pub id: String,
    /// Embedding components; length must equal the index dimension.
    pub values: Vec<f32>,
    /// String metadata stored alongside the vector (`filename`, `text`).
    pub metadata: BTreeMap<String, String>,
}

/// Resolved description of a logical index.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexDescription {
    /// Logical index name.
    pub name: String,
    /// Data-plane host serving the index (without scheme in production responses).
    #[serde(default)]
    pub host: String,
    /// Vector dimensionality configured on the index.
    pub dimension: usize,
}

/// A ranked nearest-neighbour match.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryMatch {
    /// Identifier of the matched vector.
    pub id: String,
    /// Similarity score reported by the index.
    #[serde(default)]
    pub score: f32,
    /// Stored metadata, when requested.
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl QueryMatch {
    /// Return the `text` metadata field, or an empty string when missing.
    pub fn text(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|metadata| metadata.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("")
    }
}

#[derive(Serialize)]
pub(crate) struct UpsertRequest<'a> {
    pub(crate) vectors: &'a [VectorRecord],
    pub(crate) namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpsertResponse {
    #[serde(default)]
    pub(crate) upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueryRequest<'a> {
    pub(crate) namespace: &'a str,
    pub(crate) vector: Vec<f32>,
    pub(crate) top_k: usize,
    pub(crate) include_metadata: bool,
    pub(crate) include_values: bool,
}

#[derive(Deserialize)]
pub(crate) struct QueryResponse {
    #[serde(default)]
    pub(crate) matches: Vec<QueryMatch>,
}
