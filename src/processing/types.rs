//! Core data types and error definitions for the ingestion pipeline.

use crate::completion::CompletionClientError;
use crate::config::Config;
use crate::embedding::EmbeddingClientError;
use crate::extraction::ExtractionError;
use crate::pinecone::PineconeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Uploaded input unit, consumed once by extraction.
#[derive(Debug, Clone)]
pub struct Document {
    /// Filename supplied with the upload; doubles as the vector id.
    pub filename: String,
    /// Raw document bytes.
    pub contents: Arc<[u8]>,
    /// Size declared by the uploader (the byte length when not declared separately).
    pub size: u64,
}

impl Document {
    /// Wrap raw bytes, declaring their length as the size.
    pub fn new(filename: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        let contents: Vec<u8> = contents.into();
        let size = contents.len() as u64;
        Self {
            filename: filename.into(),
            contents: Arc::from(contents),
            size,
        }
    }
}

/// Processing stage of a document.
///
/// `Pending → Extracting → Chunking → Summarizing → Embedding → Ready`, with a failure possible at
/// any stage. `Upserting` is only reported for ready documents whose batch was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStage {
    /// Queued, waiting for a worker.
    Pending,
    /// Extracting page text.
    Extracting,
    /// Splitting text into chunks.
    Chunking,
    /// Summarizing chunks sequentially.
    Summarizing,
    /// Embedding the full document text.
    Embedding,
    /// Vector record built.
    Ready,
    /// Writing the record to the index.
    Upserting,
}

impl fmt::Display for DocumentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Summarizing => "summarizing",
            Self::Embedding => "embedding",
            Self::Ready => "ready",
            Self::Upserting => "upserting",
        };
        f.write_str(label)
    }
}

/// Errors produced while splitting text.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A zero chunk size can never make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Failure of a single document's pipeline. Never fatal to sibling documents.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Text extraction failed.
    #[error("text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),
    /// Chunking failed.
    #[error("chunking failed: {0}")]
    Chunking(#[from] ChunkingError),
    /// A chunk summary could not be produced.
    #[error("summarization failed: {0}")]
    Summarization(#[from] CompletionClientError),
    /// The embedding call failed.
    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// The provider returned no vector.
    #[error("embedding provider returned no vector")]
    EmptyEmbedding,
    /// The vector does not fit the index.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured on the index.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },
    /// Another document in the same request already uses this id.
    #[error("duplicate document id '{0}'")]
    DuplicateId(String),
    /// The caller cancelled the ingestion.
    #[error("cancelled while {0}")]
    Cancelled(DocumentStage),
    /// The per-document deadline elapsed.
    #[error("timed out while {0}")]
    TimedOut(DocumentStage),
    /// The worker task panicked.
    #[error("worker task failed: {0}")]
    Worker(String),
}

impl DocumentError {
    /// Stage in which the document failed.
    pub fn stage(&self) -> DocumentStage {
        match self {
            Self::Extraction(_) => DocumentStage::Extracting,
            Self::Chunking(_) => DocumentStage::Chunking,
            Self::Summarization(_) => DocumentStage::Summarizing,
            Self::Embedding(_) | Self::EmptyEmbedding | Self::DimensionMismatch { .. } => {
                DocumentStage::Embedding
            }
            Self::DuplicateId(_) | Self::Worker(_) => DocumentStage::Pending,
            Self::Cancelled(stage) | Self::TimedOut(stage) => *stage,
        }
    }
}

/// Batched upsert failure. Batches before `offset` stay committed.
#[derive(Debug, Error)]
pub enum UpsertError {
    /// A zero batch size can never make progress.
    #[error("batch size must be greater than zero")]
    InvalidBatchSize,
    /// The store rejected the batch starting at `offset`.
    #[error("upsert of batch at offset {offset} failed after {committed} committed records: {source}")]
    Batch {
        /// Index of the first record of the failing batch.
        offset: usize,
        /// Records committed by earlier batches.
        committed: usize,
        /// Store error.
        #[source]
        source: PineconeError,
    },
    /// Cancelled before the batch starting at `offset` was sent.
    #[error("upsert cancelled at offset {offset} after {committed} committed records")]
    Cancelled {
        /// Index of the first record not sent.
        offset: usize,
        /// Records committed by earlier batches.
        committed: usize,
    },
}

impl UpsertError {
    /// Index of the first record that was not committed.
    pub fn offset(&self) -> usize {
        match self {
            Self::InvalidBatchSize => 0,
            Self::Batch { offset, .. } | Self::Cancelled { offset, .. } => *offset,
        }
    }

    /// Records committed before the failure.
    pub fn committed(&self) -> usize {
        match self {
            Self::InvalidBatchSize => 0,
            Self::Batch { committed, .. } | Self::Cancelled { committed, .. } => *committed,
        }
    }
}

/// Errors emitted by operations that fail as a whole (startup, direct text upserts).
#[derive(Debug, Error)]
pub enum ProcessingError {
    /// Index resolution or another store call failed.
    #[error("Pinecone request failed: {0}")]
    Pinecone(#[from] PineconeError),
    /// Embedding provider failed.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Completion provider could not be constructed.
    #[error("Completion client unavailable: {0}")]
    Completion(#[from] CompletionClientError),
    /// A vector does not fit the index.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured on the index.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },
    /// Two records in one request share an id.
    #[error("Duplicate record id '{0}'")]
    DuplicateId(String),
    /// Batched upsert failed part way.
    #[error("Upsert failed: {0}")]
    Upsert(#[from] UpsertError),
}

/// Errors emitted while answering a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Query text was empty.
    #[error("No query provided")]
    EmptyQuery,
    /// Expansion or answer composition failed.
    #[error("Completion failed: {0}")]
    Completion(#[from] CompletionClientError),
    /// Embedding the expanded query failed.
    #[error("Failed to generate embeddings: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// Provider returned no vector.
    #[error("Generated query vector is empty")]
    EmptyEmbedding,
    /// Query vector does not fit the index.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured on the index.
        expected: usize,
        /// Dimension returned by the provider.
        actual: usize,
    },
    /// Nearest-neighbour lookup failed.
    #[error("Failed to fetch vectors: {0}")]
    Pinecone(#[from] PineconeError),
    /// The caller cancelled the query.
    #[error("Query cancelled")]
    Cancelled,
}

/// Per-document result returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentOutcome {
    /// Document filename / vector id.
    pub id: String,
    /// What happened to it.
    #[serde(flatten)]
    pub status: DocumentStatus,
}

/// Terminal status of a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Vector committed to the index.
    Indexed,
    /// Dropped, with the stage and reason.
    Failed {
        /// Stage where processing stopped.
        stage: DocumentStage,
        /// Human-readable cause.
        reason: String,
    },
}

impl DocumentOutcome {
    /// Whether the document's vector was committed.
    pub fn is_indexed(&self) -> bool {
        matches!(self.status, DocumentStatus::Indexed)
    }
}

/// Result of an ingestion call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Vectors the store reported as committed.
    pub committed: usize,
    /// One entry per submitted document, in submission order.
    pub documents: Vec<DocumentOutcome>,
    /// Set when a batch upsert failed; later batches were not attempted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upsert_error: Option<UpsertFailure>,
}

/// Batch upsert failure as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertFailure {
    /// Position, within the upserted records, of the first record not committed.
    pub offset: usize,
    /// Store error message.
    pub message: String,
}

impl From<&UpsertError> for UpsertFailure {
    fn from(error: &UpsertError) -> Self {
        Self {
            offset: error.offset(),
            message: error.to_string(),
        }
    }
}

impl IngestReport {
    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &DocumentOutcome> {
        self.documents.iter().filter(|outcome| !outcome.is_indexed())
    }
}

/// Caller-supplied text for direct upsert.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextRecord {
    /// Vector id.
    pub id: String,
    /// Text embedded and stored as `text` metadata.
    pub data: String,
}

/// Per-page text of one converted upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConvertedDocument {
    /// Upload filename.
    pub file: String,
    /// Page texts in page order; empty when extraction failed.
    pub pages: Vec<String>,
    /// Extraction failure, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Retrieved match used to compose an answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedMatch {
    /// Vector id.
    pub id: String,
    /// Similarity score.
    pub score: f32,
    /// Stored `text` metadata (the document summary).
    pub text: String,
}

/// Composed answer to a user query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    /// Final answer text.
    pub answer: String,
    /// Expanded query used for retrieval.
    pub expanded_query: String,
    /// Matches the answer was composed from.
    pub matches: Vec<RetrievedMatch>,
}

/// Tunables for the ingestion and query paths.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Maximum records per upsert call.
    pub batch_size: usize,
    /// Documents processed concurrently.
    pub max_concurrent_documents: usize,
    /// Pages extracted concurrently per document.
    pub max_concurrent_pages: usize,
    /// End-to-end deadline for one document.
    pub document_timeout: Duration,
    /// Chat model used for summaries, expansion, and answers.
    pub completion_model: String,
    /// Sampling temperature for every completion.
    pub temperature: f64,
    /// Nearest neighbours fetched per query.
    pub top_k: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            chunk_size: 7000,
            batch_size: 10,
            max_concurrent_documents: 4,
            max_concurrent_pages: 8,
            document_timeout: Duration::from_secs(600),
            completion_model: "gpt-4".into(),
            temperature: 0.3,
            top_k: 3,
        }
    }
}

impl IngestSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            batch_size: config.upsert_batch_size,
            max_concurrent_documents: config.max_concurrent_documents,
            max_concurrent_pages: config.max_concurrent_pages,
            document_timeout: Duration::from_secs(config.document_timeout_secs),
            completion_model: config.completion_model.clone(),
            top_k: config.query_top_k,
            ..Self::default()
        }
    }
}
