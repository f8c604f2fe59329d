use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing ingestion activity.
#[derive(Default)]
pub struct IngestMetrics {
    documents_ingested: AtomicU64,
    documents_failed: AtomicU64,
    vectors_upserted: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of one ingestion call.
    pub fn record_ingest(&self, succeeded: u64, failed: u64) {
        self.documents_ingested
            .fetch_add(succeeded, Ordering::Relaxed);
        self.documents_failed.fetch_add(failed, Ordering::Relaxed);
    }

    /// Record vectors committed to the index.
    pub fn record_upsert(&self, vectors: u64) {
        self.vectors_upserted.fetch_add(vectors, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            vectors_upserted: self.vectors_upserted.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Documents that produced a committed vector since startup.
    pub documents_ingested: u64,
    /// Documents dropped by any pipeline stage since startup.
    pub documents_failed: u64,
    /// Total vectors written to the index, including direct text upserts.
    pub vectors_upserted: u64,
}
