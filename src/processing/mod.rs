//! Document processing: chunking, summarization, embedding, batched upserts, and queries.

pub mod batcher;
pub mod chunking;
pub mod pipeline;
mod prompts;
pub mod query;
mod service;
pub mod summarizer;
pub mod types;

pub use service::{IngestionApi, IngestionService, RecordCollector, ServiceParts};
pub use types::{
    ConvertedDocument, Document, DocumentError, DocumentOutcome, DocumentStage, DocumentStatus,
    IngestReport, IngestSettings, ProcessingError, QueryAnswer, QueryError, RetrievedMatch,
    TextRecord, UpsertError, UpsertFailure,
};
