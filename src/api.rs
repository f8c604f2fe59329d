//! HTTP surface for docvec.
//!
//! This module exposes a compact Axum router:
//!
//! - `POST /upload` – Multipart `pdfs[]` uploads. Each PDF is extracted, summarized, embedded, and
//!   upserted; the response is a per-document report plus the committed vector count, sent
//!   with `502` when an upsert batch was rejected.
//! - `POST /convert` – Multipart `pdfs[]` uploads, returning per-page text without indexing.
//! - `POST /upsert` – JSON `[{ "id", "data" }]`; texts are embedded in one call and upserted.
//! - `POST /query` – JSON `{ "query" }`; expands the query, retrieves the closest summaries, and
//!   composes an answer.
//! - `GET /metrics` – Ingestion counters.
//! - `GET /commands` – Machine-readable command catalog for quick discovery by tools/hosts.

use crate::metrics::MetricsSnapshot;
use crate::processing::{
    ConvertedDocument, Document, IngestReport, IngestionApi, ProcessingError, QueryError,
    RetrievedMatch, TextRecord,
};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Multipart field carrying uploaded PDFs.
const UPLOAD_FIELD: &str = "pdfs[]";
const MAX_UPLOAD_BYTES: usize = 256 * 1024 * 1024;

/// Build the HTTP router exposing the ingestion API surface.
pub fn create_router<S>(service: Arc<S>) -> Router
where
    S: IngestionApi + 'static,
{
    Router::new()
        .route("/upload", post(upload_documents::<S>))
        .route("/convert", post(convert_documents::<S>))
        .route("/upsert", post(upsert_texts::<S>))
        .route("/query", post(query::<S>))
        .route("/metrics", get(get_metrics::<S>))
        .route("/commands", get(get_commands))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(service)
}

/// Collect every uploaded PDF from the multipart body.
async fn read_uploads(mut multipart: Multipart) -> Result<Vec<Document>, AppError> {
    let mut documents = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|error| AppError::BadRequest(error.to_string()))?
    {
        if !matches!(field.name(), Some(UPLOAD_FIELD) | Some("pdfs")) {
            continue;
        }
        let filename = match field.file_name() {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                return Err(AppError::BadRequest(
                    "Uploaded file is missing a filename".into(),
                ));
            }
        };
        let contents = field
            .bytes()
            .await
            .map_err(|error| AppError::BadRequest(error.to_string()))?;
        tracing::debug!(file = %filename, bytes = contents.len(), "Received upload");
        documents.push(Document::new(filename, contents.to_vec()));
    }

    if documents.is_empty() {
        return Err(AppError::BadRequest("No files uploaded".into()));
    }
    Ok(documents)
}

/// Ingest uploaded PDFs and report what happened to each one.
///
/// Dropping the request (client disconnect) cancels in-flight documents. A rejected upsert
/// batch turns the response into a `502` that still carries the full report.
async fn upload_documents<S>(
    State(service): State<Arc<S>>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<IngestReport>), AppError>
where
    S: IngestionApi,
{
    let documents = read_uploads(multipart).await?;
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let report = service.ingest(documents, cancel).await;
    let status = if report.upsert_error.is_some() {
        StatusCode::BAD_GATEWAY
    } else {
        StatusCode::OK
    };
    tracing::info!(
        documents = report.documents.len(),
        committed = report.committed,
        status = status.as_u16(),
        "Upload request completed"
    );
    Ok((status, Json(report)))
}

/// Extract per-page text from uploaded PDFs.
async fn convert_documents<S>(
    State(service): State<Arc<S>>,
    multipart: Multipart,
) -> Result<Json<Vec<ConvertedDocument>>, AppError>
where
    S: IngestionApi,
{
    let documents = read_uploads(multipart).await?;
    Ok(Json(service.convert(documents).await))
}

/// Response body for `POST /upsert`.
#[derive(Serialize)]
struct UpsertResponse {
    upserted: usize,
}

/// Embed and upsert caller-supplied texts.
async fn upsert_texts<S>(
    State(service): State<Arc<S>>,
    Json(records): Json<Vec<TextRecord>>,
) -> Result<Json<UpsertResponse>, AppError>
where
    S: IngestionApi,
{
    let upserted = service.upsert_texts(records).await?;
    Ok(Json(UpsertResponse { upserted }))
}

/// Request body for `POST /query`.
#[derive(Deserialize)]
struct QueryRequest {
    #[serde(default)]
    query: String,
}

/// Response body for `POST /query`.
#[derive(Serialize)]
struct QueryResponse {
    results: String,
    expanded_query: String,
    matches: Vec<RetrievedMatch>,
}

/// Answer a question from the indexed document summaries.
async fn query<S>(
    State(service): State<Arc<S>>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError>
where
    S: IngestionApi,
{
    if request.query.trim().is_empty() {
        return Err(QueryError::EmptyQuery.into());
    }
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let answer = service.answer_query(&request.query, cancel).await?;
    Ok(Json(QueryResponse {
        results: answer.answer,
        expanded_query: answer.expanded_query,
        matches: answer.matches,
    }))
}

/// Return the ingestion counters.
async fn get_metrics<S>(State(service): State<Arc<S>>) -> Json<MetricsSnapshot>
where
    S: IngestionApi,
{
    Json(service.metrics_snapshot())
}

/// Descriptor for a single command in the discovery catalog.
#[derive(Serialize)]
struct CommandDescriptor {
    name: &'static str,
    method: &'static str,
    path: &'static str,
    description: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    request_example: Option<serde_json::Value>,
}

/// Response body for `GET /commands`.
#[derive(Serialize)]
struct CommandsResponse {
    commands: Vec<CommandDescriptor>,
}

/// Enumerate supported HTTP commands for discovery/UX in hosts and tools.
async fn get_commands() -> Json<CommandsResponse> {
    Json(CommandsResponse {
        commands: vec![
            CommandDescriptor {
                name: "upload",
                method: "POST",
                path: "/upload",
                description: "Upload PDFs as multipart `pdfs[]`; each is summarized, embedded, and upserted. Returns { \"committed\": number, \"documents\": [...] }; a rejected upsert batch yields 502 with \"upsert_error\" set.",
                request_example: None,
            },
            CommandDescriptor {
                name: "convert",
                method: "POST",
                path: "/convert",
                description: "Upload PDFs as multipart `pdfs[]` and return their text page by page.",
                request_example: None,
            },
            CommandDescriptor {
                name: "upsert",
                method: "POST",
                path: "/upsert",
                description: "Embed the supplied texts in one call and upsert them with the text as metadata.",
                request_example: Some(json!([
                    { "id": "note-1", "data": "First note" },
                    { "id": "note-2", "data": "Second note" }
                ])),
            },
            CommandDescriptor {
                name: "query",
                method: "POST",
                path: "/query",
                description: "Answer a question from the closest indexed document summaries.",
                request_example: Some(json!({ "query": "What did the candidate say about Rust?" })),
            },
            CommandDescriptor {
                name: "metrics",
                method: "GET",
                path: "/metrics",
                description: "Return ingestion counters useful for observability dashboards.",
                request_example: None,
            },
        ],
    })
}

enum AppError {
    BadRequest(String),
    Processing(ProcessingError),
    Query(QueryError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Processing(error @ ProcessingError::DuplicateId(_)) => {
                (StatusCode::BAD_REQUEST, error.to_string())
            }
            Self::Processing(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
            Self::Query(error @ QueryError::EmptyQuery) => {
                (StatusCode::BAD_REQUEST, error.to_string())
            }
            Self::Query(error) => (StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "Request failed");
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<ProcessingError> for AppError {
    fn from(inner: ProcessingError) -> Self {
        Self::Processing(inner)
    }
}

impl From<QueryError> for AppError {
    fn from(inner: QueryError) -> Self {
        Self::Query(inner)
    }
}
