//! Ingestion service coordinating per-document pipelines, batched upserts, and queries.

use super::batcher::upsert_in_batches;
use super::pipeline::DocumentPipeline;
use super::query::QueryEngine;
use super::summarizer::Summarizer;
use super::types::{
    ConvertedDocument, Document, DocumentError, DocumentOutcome, DocumentStage, DocumentStatus,
    IngestReport, IngestSettings, ProcessingError, QueryAnswer, QueryError, TextRecord,
    UpsertFailure,
};
use crate::completion::{CompletionClient, get_completion_client};
use crate::config::Config;
use crate::embedding::{EmbeddingClient, EmbeddingClientError, get_embedding_client};
use crate::extraction::{DocumentLoader, LopdfLoader, TextExtractor};
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::pinecone::{PineconeService, VectorIndex, VectorRecord};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Abstraction over the ingestion service used by the HTTP surface.
#[async_trait]
pub trait IngestionApi: Send + Sync {
    /// Process every document and upsert the resulting vectors in batches.
    async fn ingest(&self, documents: Vec<Document>, cancel: CancellationToken) -> IngestReport;

    /// Extract per-page text without indexing anything.
    async fn convert(&self, documents: Vec<Document>) -> Vec<ConvertedDocument>;

    /// Embed caller-supplied texts in one call and upsert them.
    async fn upsert_texts(&self, records: Vec<TextRecord>) -> Result<usize, ProcessingError>;

    /// Answer a natural-language question from the indexed summaries.
    async fn answer_query(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<QueryAnswer, QueryError>;

    /// Retrieve the current metrics snapshot.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// External collaborators the service is assembled from.
pub struct ServiceParts {
    /// Parses uploaded bytes into pages.
    pub loader: Arc<dyn DocumentLoader>,
    /// Chat completion backend for summaries and answers.
    pub completion: Arc<dyn CompletionClient>,
    /// Embedding backend.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Resolved vector index.
    pub index: Arc<dyn VectorIndex>,
}

/// Shared sink the document workers append finished records to.
///
/// Records are tagged with their submission position so the upsert order does not depend on
/// which worker finished first.
#[derive(Clone, Default)]
pub struct RecordCollector {
    records: Arc<Mutex<Vec<(usize, VectorRecord)>>>,
}

impl RecordCollector {
    /// Append one record.
    pub fn push(&self, position: usize, record: VectorRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((position, record));
    }

    /// Number of records collected so far.
    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drain the collected records, ordered by submission position.
    pub fn drain_ordered(&self) -> Vec<(usize, VectorRecord)> {
        let mut records =
            std::mem::take(&mut *self.records.lock().unwrap_or_else(PoisonError::into_inner));
        records.sort_by_key(|(position, _)| *position);
        records
    }
}

/// Coordinates ingestion: bounded document workers, batched upserts, and the query path.
///
/// Construct once near process start and share through an `Arc`.
pub struct IngestionService {
    pipeline: Arc<DocumentPipeline>,
    query: QueryEngine,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingClient>,
    settings: IngestSettings,
    metrics: Arc<IngestMetrics>,
}

impl IngestionService {
    /// Resolve the configured index and build provider clients.
    pub async fn connect(config: &Config) -> Result<Self, ProcessingError> {
        let pinecone = PineconeService::new(config)?;
        let description = pinecone.describe_index(&config.pinecone_index).await?;
        let index = pinecone.connect(&description, &config.pinecone_namespace)?;
        tracing::info!(
            index = %config.pinecone_index,
            namespace = %config.pinecone_namespace,
            dimension = description.dimension,
            "Connected to Pinecone index"
        );

        let completion = get_completion_client(config)?;
        let embedder = get_embedding_client(config)?;
        let parts = ServiceParts {
            loader: Arc::new(LopdfLoader),
            completion,
            embedder,
            index: Arc::new(index),
        };
        Ok(Self::from_parts(parts, IngestSettings::from_config(config)))
    }

    /// Assemble a service from already-built collaborators.
    pub fn from_parts(parts: ServiceParts, settings: IngestSettings) -> Self {
        let ServiceParts {
            loader,
            completion,
            embedder,
            index,
        } = parts;
        let extractor = TextExtractor::new(loader, settings.max_concurrent_pages);
        let summarizer = Summarizer::new(
            Arc::clone(&completion),
            settings.completion_model.clone(),
            settings.temperature,
        );
        let pipeline = DocumentPipeline::new(
            extractor,
            summarizer,
            Arc::clone(&embedder),
            index.dimension(),
            &settings,
        );
        let query = QueryEngine::new(
            completion,
            Arc::clone(&embedder),
            Arc::clone(&index),
            &settings,
        );

        Self {
            pipeline: Arc::new(pipeline),
            query,
            index,
            embedder,
            settings,
            metrics: Arc::new(IngestMetrics::new()),
        }
    }

    /// Process `documents` concurrently and upsert every successful record in batches.
    ///
    /// A failing document never aborts its siblings; it is reported with the stage it failed in.
    /// When a batch is rejected, the records of that batch and every later one are reported as
    /// failed while earlier batches stay committed.
    pub async fn ingest(&self, documents: Vec<Document>, cancel: &CancellationToken) -> IngestReport {
        let span = tracing::info_span!(
            "ingest",
            ingest_id = %Uuid::new_v4(),
            documents = documents.len()
        );
        self.ingest_documents(documents, cancel)
            .instrument(span)
            .await
    }

    async fn ingest_documents(
        &self,
        documents: Vec<Document>,
        cancel: &CancellationToken,
    ) -> IngestReport {
        let ids: Vec<String> = documents
            .iter()
            .map(|document| document.filename.clone())
            .collect();
        let mut statuses: Vec<Option<DocumentStatus>> = vec![None; ids.len()];

        let collector = RecordCollector::default();
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_documents.max(1)));
        let mut tasks = JoinSet::new();
        let mut seen = HashSet::new();

        for (position, document) in documents.into_iter().enumerate() {
            if !seen.insert(document.filename.clone()) {
                let error = DocumentError::DuplicateId(document.filename.clone());
                tracing::warn!(document = %document.filename, "Duplicate document id rejected");
                statuses[position] = Some(failed_status(&error));
                continue;
            }

            let span = tracing::info_span!("document", name = %document.filename, position);
            let pipeline = Arc::clone(&self.pipeline);
            let semaphore = Arc::clone(&semaphore);
            let collector = collector.clone();
            let cancel = cancel.clone();
            tasks.spawn(
                async move {
                    let result =
                        run_document(&pipeline, semaphore, &collector, position, document, &cancel)
                            .await;
                    (position, result)
                }
                .instrument(span),
            );
        }

        let mut worker_failure = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((position, Err(error))) => {
                    tracing::warn!(
                        document = %ids[position],
                        stage = %error.stage(),
                        error = %error,
                        "Document dropped"
                    );
                    statuses[position] = Some(failed_status(&error));
                }
                Err(error) => {
                    tracing::error!(error = %error, "Document worker failed");
                    worker_failure = Some(error.to_string());
                }
            }
        }

        let (positions, records): (Vec<usize>, Vec<VectorRecord>) =
            collector.drain_ordered().into_iter().unzip();

        let mut report = IngestReport::default();
        let upserted = if records.is_empty() {
            Ok(0)
        } else {
            upsert_in_batches(
                self.index.as_ref(),
                &records,
                self.settings.batch_size,
                cancel,
            )
            .await
        };
        match upserted {
            Ok(committed) => {
                report.committed = committed;
                for &position in &positions {
                    statuses[position] = Some(DocumentStatus::Indexed);
                }
            }
            Err(error) => {
                report.committed = error.committed();
                let offset = error.offset();
                let reason = error.to_string();
                for (rank, &position) in positions.iter().enumerate() {
                    statuses[position] = Some(if rank < offset {
                        DocumentStatus::Indexed
                    } else {
                        DocumentStatus::Failed {
                            stage: DocumentStage::Upserting,
                            reason: reason.clone(),
                        }
                    });
                }
                report.upsert_error = Some(UpsertFailure::from(&error));
            }
        }

        report.documents = ids
            .into_iter()
            .zip(statuses)
            .map(|(id, status)| DocumentOutcome {
                id,
                status: status.unwrap_or_else(|| DocumentStatus::Failed {
                    stage: DocumentStage::Pending,
                    reason: worker_failure
                        .clone()
                        .unwrap_or_else(|| "worker did not report".to_string()),
                }),
            })
            .collect();

        let indexed = report.documents.iter().filter(|outcome| outcome.is_indexed()).count();
        let failed = report.documents.len() - indexed;
        self.metrics.record_ingest(indexed as u64, failed as u64);
        self.metrics.record_upsert(report.committed as u64);
        tracing::info!(
            indexed,
            failed,
            committed = report.committed,
            upsert_failed = report.upsert_error.is_some(),
            "Ingestion finished"
        );

        report
    }

    /// Extract per-page text for each upload, preserving upload order.
    pub async fn convert(&self, documents: Vec<Document>) -> Vec<ConvertedDocument> {
        let extractor = self.pipeline.extractor();
        futures_util::stream::iter(documents)
            .map(|document| async move {
                match extractor.extract_pages(&document).await {
                    Ok(pages) => ConvertedDocument {
                        file: document.filename,
                        pages: pages.into_iter().map(|page| page.text).collect(),
                        error: None,
                    },
                    Err(error) => {
                        tracing::warn!(document = %document.filename, error = %error, "Conversion failed");
                        ConvertedDocument {
                            file: document.filename,
                            pages: Vec::new(),
                            error: Some(error.to_string()),
                        }
                    }
                }
            })
            .buffered(self.settings.max_concurrent_documents.max(1))
            .collect()
            .await
    }

    /// Embed `records` with a single provider call and upsert them, storing each text as
    /// `text` metadata.
    pub async fn upsert_texts(&self, records: Vec<TextRecord>) -> Result<usize, ProcessingError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut seen = HashSet::new();
        if let Some(duplicate) = records.iter().find(|record| !seen.insert(record.id.as_str())) {
            return Err(ProcessingError::DuplicateId(duplicate.id.clone()));
        }

        let texts: Vec<String> = records.iter().map(|record| record.data.clone()).collect();
        let vectors = self.embedder.generate_embeddings(texts).await?;
        if vectors.len() != records.len() {
            return Err(EmbeddingClientError::CountMismatch {
                expected: records.len(),
                actual: vectors.len(),
            }
            .into());
        }

        let expected = self.index.dimension();
        let mut prepared = Vec::with_capacity(records.len());
        for (record, values) in records.into_iter().zip(vectors) {
            if values.len() != expected {
                return Err(ProcessingError::DimensionMismatch {
                    expected,
                    actual: values.len(),
                });
            }
            prepared.push(VectorRecord {
                id: record.id,
                values,
                metadata: BTreeMap::from([("text".to_string(), record.data)]),
            });
        }

        let committed = upsert_in_batches(
            self.index.as_ref(),
            &prepared,
            self.settings.batch_size,
            &CancellationToken::new(),
        )
        .await?;
        self.metrics.record_upsert(committed as u64);
        tracing::info!(records = prepared.len(), committed, "Texts upserted");
        Ok(committed)
    }

    /// Answer `query` from the closest indexed summaries.
    pub async fn answer_query(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<QueryAnswer, QueryError> {
        let span = tracing::info_span!("query", query_id = %Uuid::new_v4());
        self.query.answer(query, cancel).instrument(span).await
    }

    /// Return the current ingestion metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

async fn run_document(
    pipeline: &DocumentPipeline,
    semaphore: Arc<Semaphore>,
    collector: &RecordCollector,
    position: usize,
    document: Document,
    cancel: &CancellationToken,
) -> Result<(), DocumentError> {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DocumentError::Cancelled(DocumentStage::Pending)),
        permit = semaphore.acquire_owned() => {
            permit.map_err(|error| DocumentError::Worker(error.to_string()))?
        }
    };

    let record = pipeline.process(document, cancel).await?;
    tracing::debug!(stage = %DocumentStage::Ready, "Document ready");
    collector.push(position, record);
    Ok(())
}

fn failed_status(error: &DocumentError) -> DocumentStatus {
    DocumentStatus::Failed {
        stage: error.stage(),
        reason: error.to_string(),
    }
}

#[async_trait]
impl IngestionApi for IngestionService {
    async fn ingest(&self, documents: Vec<Document>, cancel: CancellationToken) -> IngestReport {
        IngestionService::ingest(self, documents, &cancel).await
    }

    async fn convert(&self, documents: Vec<Document>) -> Vec<ConvertedDocument> {
        IngestionService::convert(self, documents).await
    }

    async fn upsert_texts(&self, records: Vec<TextRecord>) -> Result<usize, ProcessingError> {
        IngestionService::upsert_texts(self, records).await
    }

    async fn answer_query(
        &self,
        query: &str,
        cancel: CancellationToken,
    ) -> Result<QueryAnswer, QueryError> {
        IngestionService::answer_query(self, query, &cancel).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        IngestionService::metrics_snapshot(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> VectorRecord {
        VectorRecord {
            id: id.to_string(),
            values: vec![0.5],
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn collector_orders_by_submission_position() {
        let collector = RecordCollector::default();
        collector.push(2, record("c.pdf"));
        collector.push(0, record("a.pdf"));
        collector.push(1, record("b.pdf"));
        assert_eq!(collector.len(), 3);

        let ids: Vec<String> = collector
            .drain_ordered()
            .into_iter()
            .map(|(_, record)| record.id)
            .collect();
        assert_eq!(ids, vec!["a.pdf", "b.pdf", "c.pdf"]);
        assert!(collector.is_empty());
    }

    #[tokio::test]
    async fn concurrent_pushes_are_all_kept() {
        let collector = RecordCollector::default();
        let mut tasks = JoinSet::new();
        for position in 0..32 {
            let collector = collector.clone();
            tasks.spawn(async move { collector.push(position, record(&format!("{position}.pdf"))) });
        }
        while tasks.join_next().await.is_some() {}

        let positions: Vec<usize> = collector
            .drain_ordered()
            .into_iter()
            .map(|(position, _)| position)
            .collect();
        assert_eq!(positions, (0..32).collect::<Vec<_>>());
    }

    #[test]
    fn failed_status_carries_stage_and_reason() {
        let status = failed_status(&DocumentError::TimedOut(DocumentStage::Summarizing));
        assert_eq!(
            status,
            DocumentStatus::Failed {
                stage: DocumentStage::Summarizing,
                reason: "timed out while summarizing".into(),
            }
        );
    }
}
