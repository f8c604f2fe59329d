use std::env;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_NAMESPACE: &str = "example-namespace";
const DEFAULT_PINECONE_CONTROL_URL: &str = "https://api.pinecone.io";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_PINECONE_EMBEDDING_MODEL: &str = "multilingual-e5-large";
const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-ada-002";
const DEFAULT_COMPLETION_MODEL: &str = "gpt-4";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docvec server.
#[derive(Debug, Clone)]
pub struct Config {
    /// API key sent to both the Pinecone control plane and data plane.
    pub pinecone_api_key: String,
    /// Logical index name resolved to a data-plane host at startup.
    pub pinecone_index: String,
    /// Namespace that receives every upserted vector.
    pub pinecone_namespace: String,
    /// Base URL of the Pinecone control plane (describe-index, inference).
    pub pinecone_control_url: String,
    /// Embedding backend used for documents and queries.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Completion backend used for summaries, query expansion and answers.
    pub completion_provider: CompletionProvider,
    /// Chat model identifier passed to the completion provider.
    pub completion_model: String,
    /// Bearer token for OpenAI-compatible endpoints.
    pub completion_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API.
    pub openai_base_url: String,
    /// Base URL of a local Ollama runtime.
    pub ollama_url: String,
    /// Maximum chunk length, in characters, handed to the summarizer.
    pub chunk_size: usize,
    /// Maximum number of vectors written per upsert call.
    pub upsert_batch_size: usize,
    /// Number of documents processed concurrently during ingestion.
    pub max_concurrent_documents: usize,
    /// Number of pages extracted concurrently within one document.
    pub max_concurrent_pages: usize,
    /// Timeout applied to every outbound HTTP request, in seconds.
    pub request_timeout_secs: u64,
    /// Deadline for processing a single document end to end, in seconds.
    pub document_timeout_secs: u64,
    /// Number of nearest neighbours fetched for a query.
    pub query_top_k: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Pinecone hosted inference (`/embed`).
    Pinecone,
    /// OpenAI-compatible `/embeddings` endpoint.
    OpenAI,
}

/// Supported chat completion backends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionProvider {
    /// OpenAI-compatible `/chat/completions` endpoint.
    OpenAI,
    /// Local Ollama runtime (`/api/chat`).
    Ollama,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Blank values are treated as absent so that an empty line in `.env` falls back to the
    /// default rather than failing to parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Lookup(lookup);

        let embedding_provider = vars
            .optional("EMBEDDING_PROVIDER")
            .map(|value| {
                value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("EMBEDDING_PROVIDER".into()))
            })
            .transpose()?
            .unwrap_or(EmbeddingProvider::Pinecone);
        let completion_provider = vars
            .optional("COMPLETION_PROVIDER")
            .map(|value| {
                value
                    .parse()
                    .map_err(|()| ConfigError::InvalidValue("COMPLETION_PROVIDER".into()))
            })
            .transpose()?
            .unwrap_or(CompletionProvider::OpenAI);

        let completion_api_key = vars.optional("COMPLETION_API_KEY");
        let needs_openai_key = completion_provider == CompletionProvider::OpenAI
            || embedding_provider == EmbeddingProvider::OpenAI;
        if needs_openai_key && completion_api_key.is_none() {
            return Err(ConfigError::MissingVariable("COMPLETION_API_KEY".into()));
        }

        let embedding_model = vars.optional("EMBEDDING_MODEL").unwrap_or_else(|| {
            match embedding_provider {
                EmbeddingProvider::Pinecone => DEFAULT_PINECONE_EMBEDDING_MODEL,
                EmbeddingProvider::OpenAI => DEFAULT_OPENAI_EMBEDDING_MODEL,
            }
            .to_string()
        });

        Ok(Self {
            pinecone_api_key: vars.required("PINECONE_API_KEY")?,
            pinecone_index: vars.required("PINECONE_INDEX")?,
            pinecone_namespace: vars
                .optional("PINECONE_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            pinecone_control_url: vars
                .optional("PINECONE_CONTROL_URL")
                .unwrap_or_else(|| DEFAULT_PINECONE_CONTROL_URL.to_string()),
            embedding_provider,
            embedding_model,
            completion_provider,
            completion_model: vars
                .optional("COMPLETION_MODEL")
                .unwrap_or_else(|| DEFAULT_COMPLETION_MODEL.to_string()),
            completion_api_key,
            openai_base_url: vars
                .optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            ollama_url: vars
                .optional("OLLAMA_URL")
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            chunk_size: vars.positive("CHUNK_SIZE", 7000)?,
            upsert_batch_size: vars.positive("UPSERT_BATCH_SIZE", 10)?,
            max_concurrent_documents: vars.positive("INGEST_MAX_CONCURRENT_DOCUMENTS", 4)?,
            max_concurrent_pages: vars.positive("EXTRACT_MAX_CONCURRENT_PAGES", 8)?,
            request_timeout_secs: vars.positive("REQUEST_TIMEOUT_SECS", 60)?,
            document_timeout_secs: vars.positive("DOCUMENT_TIMEOUT_SECS", 600)?,
            query_top_k: vars.positive("QUERY_TOP_K", 3)?,
            server_port: vars
                .optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
        })
    }

    /// Timeout applied to each outbound HTTP request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

struct Lookup<F>(F);

impl<F> Lookup<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|value| !value.trim().is_empty())
    }

    fn positive<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + Default,
    {
        let Some(raw) = self.optional(key) else {
            return Ok(default);
        };
        let value: T = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string()))?;
        if value <= T::default() {
            return Err(ConfigError::InvalidValue(key.to_string()));
        }
        Ok(value)
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pinecone" => Ok(Self::Pinecone),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl FromStr for CompletionProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "ollama" => Ok(Self::Ollama),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
///
/// Missing or malformed settings are fatal: the error is returned to the entrypoint, which
/// refuses to start.
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        index = %config.pinecone_index,
        namespace = %config.pinecone_namespace,
        embedding_provider = ?config.embedding_provider,
        completion_provider = ?config.completion_provider,
        chunk_size = config.chunk_size,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
