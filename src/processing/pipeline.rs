//! Single-document pipeline: extract → chunk → summarize → embed → record.

use super::chunking::split_text;
use super::summarizer::Summarizer;
use super::types::{Document, DocumentError, DocumentStage, IngestSettings};
use crate::embedding::EmbeddingClient;
use crate::extraction::TextExtractor;
use crate::pinecone::VectorRecord;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Turns one document into one vector record.
///
/// The record embeds the full extracted text while its `text` metadata holds the joined chunk
/// summaries.
pub struct DocumentPipeline {
    extractor: TextExtractor,
    summarizer: Summarizer,
    embedder: Arc<dyn EmbeddingClient>,
    chunk_size: usize,
    dimension: usize,
    document_timeout: Duration,
}

impl DocumentPipeline {
    /// Assemble a pipeline producing vectors of `dimension` components.
    pub fn new(
        extractor: TextExtractor,
        summarizer: Summarizer,
        embedder: Arc<dyn EmbeddingClient>,
        dimension: usize,
        settings: &IngestSettings,
    ) -> Self {
        Self {
            extractor,
            summarizer,
            embedder,
            chunk_size: settings.chunk_size,
            dimension,
            document_timeout: settings.document_timeout,
        }
    }

    /// Extractor used for the first stage.
    pub fn extractor(&self) -> &TextExtractor {
        &self.extractor
    }

    /// Run every stage for `document`.
    ///
    /// Each stage races the caller's cancellation token and the per-document deadline; the
    /// returned error names the stage that was running.
    pub async fn process(
        &self,
        document: Document,
        cancel: &CancellationToken,
    ) -> Result<VectorRecord, DocumentError> {
        let deadline = Instant::now() + self.document_timeout;
        let filename = document.filename.clone();

        let text = run_stage(
            DocumentStage::Extracting,
            deadline,
            cancel,
            self.extractor.extract(&document),
        )
        .await?;
        drop(document);

        if cancel.is_cancelled() {
            return Err(DocumentError::Cancelled(DocumentStage::Chunking));
        }
        let chunks = split_text(&text, self.chunk_size)?;
        tracing::debug!(
            stage = %DocumentStage::Chunking,
            chars = text.chars().count(),
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            "Document chunked"
        );

        let mut summaries = Vec::with_capacity(chunks.len());
        for (position, chunk) in chunks.iter().enumerate() {
            let started = Instant::now();
            let summary = run_stage(
                DocumentStage::Summarizing,
                deadline,
                cancel,
                self.summarizer.summarize(chunk),
            )
            .await?;
            tracing::debug!(
                chunk = position,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Chunk summarized"
            );
            summaries.push(summary);
        }
        let summary_text = summaries.join(" ");

        let started = Instant::now();
        let vectors = run_stage(
            DocumentStage::Embedding,
            deadline,
            cancel,
            self.embedder.generate_embeddings(vec![text]),
        )
        .await?;
        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Document embedded"
        );
        let values = vectors
            .into_iter()
            .next()
            .ok_or(DocumentError::EmptyEmbedding)?;
        if values.len() != self.dimension {
            return Err(DocumentError::DimensionMismatch {
                expected: self.dimension,
                actual: values.len(),
            });
        }

        let metadata = BTreeMap::from([
            ("filename".to_string(), filename.clone()),
            ("text".to_string(), summary_text),
        ]);
        Ok(VectorRecord {
            id: filename,
            values,
            metadata,
        })
    }
}

async fn run_stage<T, E, F>(
    stage: DocumentStage,
    deadline: Instant,
    cancel: &CancellationToken,
    work: F,
) -> Result<T, DocumentError>
where
    F: Future<Output = Result<T, E>>,
    DocumentError: From<E>,
{
    tracing::trace!(stage = %stage, "Entering stage");
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DocumentError::Cancelled(stage)),
        outcome = tokio::time::timeout_at(deadline, work) => match outcome {
            Ok(result) => result.map_err(DocumentError::from),
            Err(_) => Err(DocumentError::TimedOut(stage)),
        },
    }
}
