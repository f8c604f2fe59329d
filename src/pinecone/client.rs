//! HTTP client wrapper for the Pinecone control and data planes.

use crate::config::Config;
use crate::pinecone::types::{
    IndexDescription, PineconeError, QueryMatch, QueryRequest, QueryResponse, UpsertRequest,
    UpsertResponse, VectorRecord,
};
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use std::time::Duration;

const API_VERSION: &str = "2024-07";

/// Write/query surface of a resolved index connection.
///
/// The ingestion pipeline only depends on this trait so that batching and retrieval can be
/// exercised without a live index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Dimensionality every upserted vector must match.
    fn dimension(&self) -> usize;

    /// Write a batch of records, returning the number the store reports as committed.
    async fn upsert(&self, batch: &[VectorRecord]) -> Result<usize, PineconeError>;

    /// Return the `top_k` nearest neighbours of `vector`.
    async fn query_by_vector(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>, PineconeError>;
}

/// Control-plane client used to resolve logical index names into data-plane connections.
pub struct PineconeService {
    client: Client,
    control_url: String,
    api_key: String,
}

impl PineconeService {
    /// Construct a control-plane client from configuration.
    pub fn new(config: &Config) -> Result<Self, PineconeError> {
        let client = build_http_client(config.request_timeout())?;
        let control_url =
            normalize_base_url(&config.pinecone_control_url).map_err(PineconeError::InvalidUrl)?;
        tracing::debug!(url = %control_url, "Initialized Pinecone HTTP client");

        Ok(Self {
            client,
            control_url,
            api_key: config.pinecone_api_key.clone(),
        })
    }

    /// Look up the host and dimension of a logical index.
    pub async fn describe_index(&self, name: &str) -> Result<IndexDescription, PineconeError> {
        let url = format_endpoint(&self.control_url, &format!("indexes/{name}"));
        let response = authorized(self.client.request(Method::GET, url), &self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = PineconeError::UnexpectedStatus { status, body };
            tracing::error!(index = name, error = %error, "Failed to describe index");
            return Err(error);
        }

        let description: IndexDescription = response.json().await?;
        if description.host.trim().is_empty() {
            return Err(PineconeError::MissingHost(name.to_string()));
        }
        tracing::debug!(
            index = name,
            host = %description.host,
            dimension = description.dimension,
            "Resolved index"
        );
        Ok(description)
    }

    /// Open a data-plane connection to the described index within `namespace`.
    pub fn connect(
        &self,
        description: &IndexDescription,
        namespace: &str,
    ) -> Result<IndexConnection, PineconeError> {
        let base_url = normalize_host(&description.host)?;
        Ok(IndexConnection {
            client: self.client.clone(),
            base_url,
            api_key: self.api_key.clone(),
            namespace: namespace.to_string(),
            dimension: description.dimension,
        })
    }
}

/// Data-plane connection bound to one index host and namespace.
pub struct IndexConnection {
    client: Client,
    base_url: String,
    api_key: String,
    namespace: String,
    dimension: usize,
}

impl IndexConnection {
    async fn post<B: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, PineconeError> {
        let url = format_endpoint(&self.base_url, path);
        let response = authorized(self.client.request(Method::POST, url), &self.api_key)
            .json(body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let error = PineconeError::UnexpectedStatus { status, body };
            tracing::error!(path, error = %error, "Pinecone request failed");
            Err(error)
        }
    }
}

#[async_trait]
impl VectorIndex for IndexConnection {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn upsert(&self, batch: &[VectorRecord]) -> Result<usize, PineconeError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let request = UpsertRequest {
            vectors: batch,
            namespace: &self.namespace,
        };
        let response: UpsertResponse = self.post("vectors/upsert", &request).await?.json().await?;
        tracing::debug!(
            namespace = %self.namespace,
            sent = batch.len(),
            upserted = response.upserted_count,
            "Vectors upserted"
        );
        Ok(response.upserted_count)
    }

    async fn query_by_vector(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>, PineconeError> {
        let request = QueryRequest {
            namespace: &self.namespace,
            vector,
            top_k,
            include_metadata,
            include_values: false,
        };
        let response: QueryResponse = self.post("query", &request).await?.json().await?;
        Ok(response.matches)
    }
}

/// Build the shared reqwest client with the configured request deadline.
pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent("docvec/0.1")
        .timeout(timeout)
        .build()
}

fn authorized(request: reqwest::RequestBuilder, api_key: &str) -> reqwest::RequestBuilder {
    request
        .header("Api-Key", api_key)
        .header("X-Pinecone-API-Version", API_VERSION)
}

/// Index hosts come back without a scheme; tests and proxies may supply one.
fn normalize_host(host: &str) -> Result<String, PineconeError> {
    let host = host.trim();
    let candidate = if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    };
    normalize_base_url(&candidate).map_err(PineconeError::InvalidUrl)
}

pub(crate) fn normalize_base_url(url: &str) -> Result<String, String> {
    let mut parsed = Url::parse(url).map_err(|err| err.to_string())?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}

pub(crate) fn format_endpoint(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}
