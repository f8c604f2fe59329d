//! Query path: expand → embed → nearest neighbours → compose answer.

use super::prompts::{answer_messages, expansion_messages};
use super::types::{IngestSettings, QueryAnswer, QueryError, RetrievedMatch};
use crate::completion::{ChatMessage, CompletionClient, CompletionClientError, CompletionRequest};
use crate::embedding::EmbeddingClient;
use crate::pinecone::VectorIndex;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Answers natural-language questions against the index.
pub struct QueryEngine {
    completion: Arc<dyn CompletionClient>,
    embedder: Arc<dyn EmbeddingClient>,
    index: Arc<dyn VectorIndex>,
    model: String,
    temperature: f64,
    top_k: usize,
}

impl QueryEngine {
    /// Build an engine over the given clients.
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        embedder: Arc<dyn EmbeddingClient>,
        index: Arc<dyn VectorIndex>,
        settings: &IngestSettings,
    ) -> Self {
        Self {
            completion,
            embedder,
            index,
            model: settings.completion_model.clone(),
            temperature: settings.temperature,
            top_k: settings.top_k,
        }
    }

    /// Expand the query, retrieve the closest documents, and compose an answer from them.
    pub async fn answer(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryAnswer, QueryError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let expanded_query = guarded(cancel, self.complete(expansion_messages(query))).await?;
        tracing::debug!(expanded = %expanded_query, "Query expanded");

        let vectors = guarded(
            cancel,
            self.embedder.generate_embeddings(vec![expanded_query.clone()]),
        )
        .await?;
        let vector = vectors
            .into_iter()
            .next()
            .filter(|vector| !vector.is_empty())
            .ok_or(QueryError::EmptyEmbedding)?;
        let expected = self.index.dimension();
        if vector.len() != expected {
            return Err(QueryError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let matches: Vec<RetrievedMatch> = guarded(
            cancel,
            self.index.query_by_vector(vector, self.top_k, true),
        )
        .await?
        .into_iter()
        .map(|hit| RetrievedMatch {
            text: hit.text().to_string(),
            id: hit.id,
            score: hit.score,
        })
        .collect();
        tracing::debug!(matches = matches.len(), top_k = self.top_k, "Retrieved matches");

        let answer = guarded(
            cancel,
            self.complete(answer_messages(query, &expanded_query, &matches)),
        )
        .await?;

        Ok(QueryAnswer {
            answer,
            expanded_query,
            matches,
        })
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<String, CompletionClientError> {
        self.completion
            .complete(CompletionRequest {
                model: self.model.clone(),
                messages,
                temperature: self.temperature,
            })
            .await
    }
}

async fn guarded<T, E, F>(cancel: &CancellationToken, work: F) -> Result<T, QueryError>
where
    F: Future<Output = Result<T, E>>,
    QueryError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(QueryError::Cancelled),
        result = work => result.map_err(QueryError::from),
    }
}
