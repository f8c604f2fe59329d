//! Concurrent per-page text extraction.
//!
//! A [`DocumentLoader`] turns uploaded bytes into a [`PageSource`]; the [`TextExtractor`] then
//! fans out one blocking task per page, bounded by a semaphore, and writes each result into a
//! slot indexed by page number. The merged text is therefore always in page order, each page
//! followed by a newline. Any page failure fails the whole document and discards the text
//! gathered so far.

use crate::processing::types::Document;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Error raised by a single page.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct PageError(pub String);

/// Errors produced while extracting text from a document.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The upload could not be spooled to transient storage.
    #[error("failed to spool document to disk: {0}")]
    Spool(#[from] std::io::Error),
    /// The byte stream could not be parsed as a document.
    #[error("failed to open document: {0}")]
    Open(String),
    /// A page failed; the lowest failing page number is reported.
    #[error("failed to extract text from page {page}: {source}")]
    Page {
        /// One-based page number.
        page: u32,
        /// Underlying page failure.
        #[source]
        source: PageError,
    },
    /// A page task panicked or was aborted.
    #[error("page extraction task failed: {0}")]
    Task(String),
}

/// Opened document exposing random access to page text.
pub trait PageSource: Send + Sync {
    /// Number of pages; pages are numbered `1..=page_count`.
    fn page_count(&self) -> u32;

    /// Plain text of one page. May block.
    fn page_text(&self, page: u32) -> Result<String, PageError>;
}

/// Parses raw document bytes into a [`PageSource`].
pub trait DocumentLoader: Send + Sync {
    /// Open the document. May block.
    fn open(&self, document: &Document) -> Result<Arc<dyn PageSource>, ExtractionError>;
}

/// Plain text of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// One-based page number.
    pub number: u32,
    /// Extracted text.
    pub text: String,
}

/// Extracts per-page text concurrently.
#[derive(Clone)]
pub struct TextExtractor {
    loader: Arc<dyn DocumentLoader>,
    max_concurrent_pages: usize,
}

impl TextExtractor {
    /// Build an extractor running at most `max_concurrent_pages` page tasks at once.
    pub fn new(loader: Arc<dyn DocumentLoader>, max_concurrent_pages: usize) -> Self {
        Self {
            loader,
            max_concurrent_pages: max_concurrent_pages.max(1),
        }
    }

    /// Extractor backed by [`LopdfLoader`].
    pub fn pdf(max_concurrent_pages: usize) -> Self {
        Self::new(Arc::new(LopdfLoader), max_concurrent_pages)
    }

    /// Extract the document and merge its pages into a single text.
    pub async fn extract(&self, document: &Document) -> Result<String, ExtractionError> {
        let pages = self.extract_pages(document).await?;
        let mut text = String::with_capacity(pages.iter().map(|page| page.text.len() + 1).sum());
        for page in &pages {
            text.push_str(&page.text);
            text.push('\n');
        }
        Ok(text)
    }

    /// Extract every page, returned in page order.
    pub async fn extract_pages(&self, document: &Document) -> Result<Vec<PageText>, ExtractionError> {
        let loader = Arc::clone(&self.loader);
        let owned = document.clone();
        let source = tokio::task::spawn_blocking(move || loader.open(&owned))
            .await
            .map_err(|error| ExtractionError::Task(error.to_string()))??;

        let page_count = source.page_count();
        tracing::debug!(document = %document.filename, pages = page_count, "Extracting pages");

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_pages));
        let mut tasks = JoinSet::new();
        for page in 1..=page_count {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|error| ExtractionError::Task(error.to_string()))?;
            let source = Arc::clone(&source);
            tasks.spawn_blocking(move || {
                let _permit = permit;
                (page, source.page_text(page))
            });
        }

        let mut slots: Vec<Option<String>> = vec![None; page_count as usize];
        let mut failures: BTreeMap<u32, PageError> = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((page, Ok(text))) => slots[(page - 1) as usize] = Some(text),
                Ok((page, Err(error))) => {
                    tracing::debug!(document = %document.filename, page, error = %error, "Page extraction failed");
                    failures.insert(page, error);
                }
                Err(error) => return Err(ExtractionError::Task(error.to_string())),
            }
        }

        if let Some((page, source)) = failures.into_iter().next() {
            return Err(ExtractionError::Page { page, source });
        }

        Ok(slots
            .into_iter()
            .zip(1..)
            .map(|(text, number)| PageText {
                number,
                text: text.unwrap_or_default(),
            })
            .collect())
    }
}

/// Loads PDFs with `lopdf`, spooling the upload to a temporary file that lives exactly as long
/// as the returned page source.
pub struct LopdfLoader;

struct LopdfPages {
    document: lopdf::Document,
    pages: Vec<u32>,
    _spool: tempfile::NamedTempFile,
}

impl DocumentLoader for LopdfLoader {
    fn open(&self, document: &Document) -> Result<Arc<dyn PageSource>, ExtractionError> {
        let mut spool = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(".pdf")
            .tempfile()?;
        spool.write_all(&document.contents)?;
        spool.flush()?;

        let parsed = lopdf::Document::load(spool.path())
            .map_err(|error| ExtractionError::Open(error.to_string()))?;
        let pages = parsed.get_pages().keys().copied().collect();

        Ok(Arc::new(LopdfPages {
            document: parsed,
            pages,
            _spool: spool,
        }))
    }
}

impl PageSource for LopdfPages {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_text(&self, page: u32) -> Result<String, PageError> {
        let Some(&number) = self.pages.get((page as usize).saturating_sub(1)) else {
            return Err(PageError(format!("page {page} out of range")));
        };
        self.document
            .extract_text(&[number])
            .map_err(|error| PageError(error.to_string()))
    }
}
