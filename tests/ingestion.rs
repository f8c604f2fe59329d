use async_trait::async_trait;
use docvec::completion::{CompletionClient, CompletionClientError, CompletionRequest};
use docvec::embedding::{EmbeddingClient, EmbeddingClientError};
use docvec::extraction::{DocumentLoader, ExtractionError, LopdfLoader, PageError, PageSource};
use docvec::pinecone::{PineconeError, QueryMatch, VectorIndex, VectorRecord};
use docvec::processing::{
    Document, DocumentStage, DocumentStatus, IngestSettings, IngestionService, ProcessingError,
    QueryError, ServiceParts, TextRecord,
};
use reqwest::StatusCode;
use serde_json::{Map, Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DIMENSION: usize = 2;

/// Pages are separated by form feeds; bytes starting with `BAD` fail to open.
struct FormFeedLoader;

struct FormFeedPages(Vec<String>);

impl DocumentLoader for FormFeedLoader {
    fn open(&self, document: &Document) -> Result<Arc<dyn PageSource>, ExtractionError> {
        let text = String::from_utf8_lossy(&document.contents).into_owned();
        if text.starts_with("BAD") {
            return Err(ExtractionError::Open("not a PDF".into()));
        }
        Ok(Arc::new(FormFeedPages(
            text.split('\x0c').map(str::to_string).collect(),
        )))
    }
}

impl PageSource for FormFeedPages {
    fn page_count(&self) -> u32 {
        self.0.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, PageError> {
        Ok(self.0[(page - 1) as usize].clone())
    }
}

#[derive(Default)]
struct ScriptedCompletion {
    calls: Mutex<Vec<CompletionRequest>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Option<Duration>,
    hang: bool,
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionClientError> {
        let prompt = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
        let call_number = {
            let mut calls = self.calls.lock().expect("lock");
            calls.push(request);
            calls.len()
        };
        if self.hang {
            std::future::pending::<()>().await;
        }

        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if prompt.starts_with("Expand the following query") {
            Ok("X definition meaning".to_string())
        } else if prompt.starts_with("The user asked") {
            Ok("final answer".to_string())
        } else {
            Ok(format!("summary-{call_number}"))
        }
    }
}

#[derive(Default)]
struct FakeEmbedder {
    inputs: Mutex<Vec<Vec<String>>>,
    dimension_override: Option<usize>,
}

#[async_trait]
impl EmbeddingClient for FakeEmbedder {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        let dimension = self.dimension_override.unwrap_or(DIMENSION);
        let vectors = texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; dimension];
                vector[0] = text.len() as f32;
                vector
            })
            .collect();
        self.inputs.lock().expect("lock").push(texts);
        Ok(vectors)
    }
}

#[derive(Default)]
struct FakeIndex {
    batches: Mutex<Vec<Vec<VectorRecord>>>,
    queries: Mutex<Vec<(Vec<f32>, usize, bool)>>,
    fail_on_call: Option<usize>,
}

#[async_trait]
impl VectorIndex for FakeIndex {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn upsert(&self, batch: &[VectorRecord]) -> Result<usize, PineconeError> {
        let mut batches = self.batches.lock().expect("lock");
        batches.push(batch.to_vec());
        if self.fail_on_call == Some(batches.len()) {
            return Err(PineconeError::UnexpectedStatus {
                status: StatusCode::SERVICE_UNAVAILABLE,
                body: "overloaded".into(),
            });
        }
        Ok(batch.len())
    }

    async fn query_by_vector(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>, PineconeError> {
        self.queries
            .lock()
            .expect("lock")
            .push((vector, top_k, include_metadata));
        Ok(vec![matched("a.pdf", 0.91, "alpha summary"), matched("b.pdf", 0.42, "beta summary")])
    }
}

fn matched(id: &str, score: f32, text: &str) -> QueryMatch {
    let mut metadata = Map::new();
    metadata.insert("text".into(), Value::String(text.into()));
    metadata.insert("filename".into(), json!(id));
    QueryMatch {
        id: id.into(),
        score,
        metadata: Some(metadata),
    }
}

struct Harness {
    completion: Arc<ScriptedCompletion>,
    embedder: Arc<FakeEmbedder>,
    index: Arc<FakeIndex>,
    service: IngestionService,
}

fn harness(
    completion: ScriptedCompletion,
    embedder: FakeEmbedder,
    index: FakeIndex,
    settings: IngestSettings,
) -> Harness {
    harness_with_loader(Arc::new(FormFeedLoader), completion, embedder, index, settings)
}

fn harness_with_loader(
    loader: Arc<dyn DocumentLoader>,
    completion: ScriptedCompletion,
    embedder: FakeEmbedder,
    index: FakeIndex,
    settings: IngestSettings,
) -> Harness {
    let completion = Arc::new(completion);
    let embedder = Arc::new(embedder);
    let index = Arc::new(index);
    let service = IngestionService::from_parts(
        ServiceParts {
            loader,
            completion: completion.clone(),
            embedder: embedder.clone(),
            index: index.clone(),
        },
        settings,
    );
    Harness {
        completion,
        embedder,
        index,
        service,
    }
}

fn default_harness() -> Harness {
    harness(
        ScriptedCompletion::default(),
        FakeEmbedder::default(),
        FakeIndex::default(),
        IngestSettings::default(),
    )
}

fn failure_stage(status: &DocumentStatus) -> Option<DocumentStage> {
    match status {
        DocumentStatus::Indexed => None,
        DocumentStatus::Failed { stage, .. } => Some(*stage),
    }
}

#[tokio::test]
async fn single_document_is_summarized_embedded_and_upserted() {
    let h = default_harness();
    let report = h
        .service
        .ingest(
            vec![Document::new("a.pdf", "Hello world")],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.committed, 1);
    assert!(report.upsert_error.is_none());
    assert!(report.documents[0].is_indexed());

    let calls = h.completion.calls.lock().expect("lock");
    assert_eq!(calls.len(), 1, "one chunk, one summary call");
    assert!(calls[0].messages[1].content.contains("Hello world\n"));
    assert_eq!(calls[0].model, "gpt-4");

    // The full text is embedded, not the summary.
    let inputs = h.embedder.inputs.lock().expect("lock");
    assert_eq!(*inputs, vec![vec!["Hello world\n".to_string()]]);

    let batches = h.index.batches.lock().expect("lock");
    assert_eq!(batches.len(), 1);
    let record = &batches[0][0];
    assert_eq!(record.id, "a.pdf");
    assert_eq!(record.values.len(), DIMENSION);
    assert_eq!(record.metadata["filename"], "a.pdf");
    assert_eq!(record.metadata["text"], "summary-1");
}

#[tokio::test]
async fn pages_are_merged_in_order_before_chunking() {
    let settings = IngestSettings {
        chunk_size: 8,
        ..IngestSettings::default()
    };
    let h = harness(
        ScriptedCompletion::default(),
        FakeEmbedder::default(),
        FakeIndex::default(),
        settings,
    );

    let report = h
        .service
        .ingest(
            vec![Document::new("multi.pdf", "first\x0csecond\x0cthird")],
            &CancellationToken::new(),
        )
        .await;
    assert_eq!(report.committed, 1);

    let inputs = h.embedder.inputs.lock().expect("lock");
    assert_eq!(inputs[0], vec!["first\nsecond\nthird\n".to_string()]);

    let calls = h.completion.calls.lock().expect("lock");
    assert_eq!(calls.len(), 3);
    assert!(calls[0].messages[1].content.contains("first\n"));
    assert!(calls[2].messages[1].content.contains("third\n"));

    let batches = h.index.batches.lock().expect("lock");
    assert_eq!(
        batches[0][0].metadata["text"],
        "summary-1 summary-2 summary-3"
    );
}

#[tokio::test]
async fn corrupt_document_does_not_abort_siblings() {
    let h = default_harness();
    let report = h
        .service
        .ingest(
            vec![
                Document::new("a.pdf", "alpha"),
                Document::new("b.pdf", "BAD bytes"),
                Document::new("c.pdf", "gamma"),
            ],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.committed, 2);
    let ids: Vec<&str> = report.documents.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, vec!["a.pdf", "b.pdf", "c.pdf"]);
    assert!(report.documents[0].is_indexed());
    assert_eq!(
        failure_stage(&report.documents[1].status),
        Some(DocumentStage::Extracting)
    );
    assert!(report.documents[2].is_indexed());
    assert_eq!(report.failures().count(), 1);

    let upserted: Vec<String> = h
        .index
        .batches
        .lock()
        .expect("lock")
        .concat()
        .into_iter()
        .map(|record| record.id)
        .collect();
    assert_eq!(upserted, vec!["a.pdf", "c.pdf"]);

    let snapshot = h.service.metrics_snapshot();
    assert_eq!(snapshot.documents_ingested, 2);
    assert_eq!(snapshot.documents_failed, 1);
    assert_eq!(snapshot.vectors_upserted, 2);
}

#[tokio::test]
async fn records_are_split_into_batches() {
    let settings = IngestSettings {
        batch_size: 2,
        ..IngestSettings::default()
    };
    let h = harness(
        ScriptedCompletion::default(),
        FakeEmbedder::default(),
        FakeIndex::default(),
        settings,
    );
    let documents = (0..5)
        .map(|idx| Document::new(format!("doc-{idx}.pdf"), format!("body {idx}")))
        .collect();

    let report = h.service.ingest(documents, &CancellationToken::new()).await;

    assert_eq!(report.committed, 5);
    let sizes: Vec<usize> = h
        .index
        .batches
        .lock()
        .expect("lock")
        .iter()
        .map(Vec::len)
        .collect();
    assert_eq!(sizes, vec![2, 2, 1]);
}

#[tokio::test]
async fn failing_batch_marks_remaining_records_failed() {
    let settings = IngestSettings {
        batch_size: 1,
        ..IngestSettings::default()
    };
    let index = FakeIndex {
        fail_on_call: Some(2),
        ..FakeIndex::default()
    };
    let h = harness(
        ScriptedCompletion::default(),
        FakeEmbedder::default(),
        index,
        settings,
    );

    let report = h
        .service
        .ingest(
            vec![
                Document::new("a.pdf", "alpha"),
                Document::new("b.pdf", "beta"),
                Document::new("c.pdf", "gamma"),
            ],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.committed, 1);
    assert!(report.upsert_error.is_some());
    assert!(report.documents[0].is_indexed());
    assert_eq!(
        failure_stage(&report.documents[1].status),
        Some(DocumentStage::Upserting)
    );
    assert_eq!(
        failure_stage(&report.documents[2].status),
        Some(DocumentStage::Upserting)
    );
    assert_eq!(h.index.batches.lock().expect("lock").len(), 2);
}

#[tokio::test]
async fn duplicate_filenames_are_rejected() {
    let h = default_harness();
    let report = h
        .service
        .ingest(
            vec![
                Document::new("a.pdf", "first"),
                Document::new("a.pdf", "second"),
            ],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.committed, 1);
    assert!(report.documents[0].is_indexed());
    match &report.documents[1].status {
        DocumentStatus::Failed { stage, reason } => {
            assert_eq!(*stage, DocumentStage::Pending);
            assert!(reason.contains("duplicate"));
        }
        DocumentStatus::Indexed => panic!("duplicate should not be indexed"),
    }
}

#[tokio::test]
async fn dimension_mismatch_fails_the_document() {
    let embedder = FakeEmbedder {
        dimension_override: Some(3),
        ..FakeEmbedder::default()
    };
    let h = harness(
        ScriptedCompletion::default(),
        embedder,
        FakeIndex::default(),
        IngestSettings::default(),
    );

    let report = h
        .service
        .ingest(vec![Document::new("a.pdf", "alpha")], &CancellationToken::new())
        .await;

    assert_eq!(report.committed, 0);
    assert_eq!(
        failure_stage(&report.documents[0].status),
        Some(DocumentStage::Embedding)
    );
    assert!(h.index.batches.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn cancelled_ingest_upserts_nothing() {
    let h = default_harness();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = h
        .service
        .ingest(
            vec![Document::new("a.pdf", "alpha"), Document::new("b.pdf", "beta")],
            &cancel,
        )
        .await;

    assert_eq!(report.committed, 0);
    assert!(report.documents.iter().all(|outcome| !outcome.is_indexed()));
    assert!(h.index.batches.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn stalled_summary_times_out() {
    let completion = ScriptedCompletion {
        hang: true,
        ..ScriptedCompletion::default()
    };
    let settings = IngestSettings {
        document_timeout: Duration::from_millis(100),
        ..IngestSettings::default()
    };
    let h = harness(completion, FakeEmbedder::default(), FakeIndex::default(), settings);

    let report = h
        .service
        .ingest(vec![Document::new("a.pdf", "alpha")], &CancellationToken::new())
        .await;

    match &report.documents[0].status {
        DocumentStatus::Failed { stage, reason } => {
            assert_eq!(*stage, DocumentStage::Summarizing);
            assert!(reason.contains("timed out"));
        }
        DocumentStatus::Indexed => panic!("stalled document should fail"),
    }
    assert!(h.embedder.inputs.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn document_concurrency_is_bounded() {
    let completion = ScriptedCompletion {
        delay: Some(Duration::from_millis(20)),
        ..ScriptedCompletion::default()
    };
    let settings = IngestSettings {
        max_concurrent_documents: 2,
        ..IngestSettings::default()
    };
    let h = harness(completion, FakeEmbedder::default(), FakeIndex::default(), settings);
    let documents = (0..6)
        .map(|idx| Document::new(format!("doc-{idx}.pdf"), "text"))
        .collect();

    let report = h.service.ingest(documents, &CancellationToken::new()).await;

    assert_eq!(report.committed, 6);
    let peak = h.completion.peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak concurrency was {peak}");
}

#[tokio::test]
async fn query_expands_embeds_retrieves_and_answers() {
    let h = default_harness();
    let answer = h
        .service
        .answer_query("What is X?", &CancellationToken::new())
        .await
        .expect("answer");

    assert_eq!(answer.answer, "final answer");
    assert_eq!(answer.expanded_query, "X definition meaning");
    assert_eq!(answer.matches.len(), 2);
    assert_eq!(answer.matches[0].text, "alpha summary");

    let inputs = h.embedder.inputs.lock().expect("lock");
    assert_eq!(*inputs, vec![vec!["X definition meaning".to_string()]]);

    let queries = h.index.queries.lock().expect("lock");
    assert_eq!(queries.len(), 1);
    assert_eq!(queries[0].1, 3);
    assert!(queries[0].2);

    let calls = h.completion.calls.lock().expect("lock");
    assert_eq!(calls.len(), 2);
    assert!(calls[0].messages[1].content.contains("\"What is X?\""));
    let final_prompt = &calls[1].messages[1].content;
    assert!(final_prompt.contains("What is X?"));
    assert!(final_prompt.contains("X definition meaning"));
    assert!(final_prompt.contains("alpha summary"));
    assert!(final_prompt.contains("beta summary"));
}

#[tokio::test]
async fn empty_query_is_rejected_without_remote_calls() {
    let h = default_harness();
    let error = h
        .service
        .answer_query("  ", &CancellationToken::new())
        .await
        .expect_err("empty");
    assert!(matches!(error, QueryError::EmptyQuery));
    assert!(h.completion.calls.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn text_upsert_uses_one_embedding_call() {
    let h = default_harness();
    let committed = h
        .service
        .upsert_texts(vec![
            TextRecord {
                id: "x".into(),
                data: "first".into(),
            },
            TextRecord {
                id: "y".into(),
                data: "second text".into(),
            },
        ])
        .await
        .expect("upsert");

    assert_eq!(committed, 2);
    let inputs = h.embedder.inputs.lock().expect("lock");
    assert_eq!(
        *inputs,
        vec![vec!["first".to_string(), "second text".to_string()]]
    );
    let batches = h.index.batches.lock().expect("lock");
    assert_eq!(batches[0][1].id, "y");
    assert_eq!(batches[0][1].metadata["text"], "second text");
}

#[tokio::test]
async fn text_upsert_rejects_duplicate_ids() {
    let h = default_harness();
    let error = h
        .service
        .upsert_texts(vec![
            TextRecord {
                id: "x".into(),
                data: "first".into(),
            },
            TextRecord {
                id: "x".into(),
                data: "again".into(),
            },
        ])
        .await
        .expect_err("duplicate");
    assert!(matches!(error, ProcessingError::DuplicateId(id) if id == "x"));
    assert!(h.embedder.inputs.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn convert_returns_pages_in_order() {
    let h = default_harness();
    let converted = h
        .service
        .convert(vec![
            Document::new("a.pdf", "one\x0ctwo"),
            Document::new("b.pdf", "BAD"),
        ])
        .await;

    assert_eq!(converted[0].file, "a.pdf");
    assert_eq!(converted[0].pages, vec!["one", "two"]);
    assert!(converted[0].error.is_none());
    assert_eq!(converted[1].file, "b.pdf");
    assert!(converted[1].pages.is_empty());
    assert!(converted[1].error.is_some());
}

/// One-page PDF whose only content is `text` in Courier.
fn single_page_pdf(text: &str) -> Vec<u8> {
    use lopdf::content::{Content, Operation};
    use lopdf::{Object, Stream, dictionary};

    let mut pdf = lopdf::Document::with_version("1.5");
    let pages_id = pdf.new_object_id();
    let font_id = pdf.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = pdf.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 24.into()]),
            Operation::new("Td", vec![72.into(), 720.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = pdf.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));
    let page_id = pdf.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
    });
    pdf.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Count" => 1,
            "Kids" => vec![Object::from(page_id)],
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = pdf.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    pdf.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    pdf.save_to(&mut bytes).expect("serialize pdf");
    bytes
}

#[tokio::test]
async fn real_pdf_flows_through_lopdf_into_one_record() {
    let h = harness_with_loader(
        Arc::new(LopdfLoader),
        ScriptedCompletion::default(),
        FakeEmbedder::default(),
        FakeIndex::default(),
        IngestSettings::default(),
    );

    let report = h
        .service
        .ingest(
            vec![Document::new("a.pdf", single_page_pdf("hello world"))],
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.committed, 1);
    assert_eq!(h.completion.calls.lock().expect("lock").len(), 1);
    let inputs = h.embedder.inputs.lock().expect("lock");
    assert_eq!(*inputs, vec![vec!["hello world\n\n".to_string()]]);

    let batches = h.index.batches.lock().expect("lock");
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0][0].id, "a.pdf");
    assert_eq!(batches[0][0].metadata["filename"], "a.pdf");
    assert_eq!(batches[0][0].metadata["text"], "summary-1");
}
