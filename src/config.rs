use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

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

/// Runtime configuration for the ingestion service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Qdrant instance. When absent an in-memory store is used.
    pub qdrant_url: Option<String>,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Collection holding free-text chunks.
    pub chunk_collection: String,
    /// Collection holding structured JSON records.
    pub record_collection: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the Ollama runtime.
    pub ollama_url: Option<String>,
    /// API key for the OpenAI-compatible embeddings endpoint.
    pub openai_api_key: Option<String>,
    /// Override for the OpenAI-compatible base URL.
    pub openai_base_url: Option<String>,
    /// Token budgets and chunk cap applied by the chunker.
    pub chunking: ChunkingPolicy,
    /// Text recognition settings for image-only PDFs.
    pub ocr: OcrSettings,
    /// Whether uploads are processed inline or handed to the queue worker.
    pub dispatch_mode: DispatchMode,
    /// Capacity of the in-process task queue.
    pub queue_capacity: usize,
    /// SQLite database holding task records.
    pub database_path: PathBuf,
    /// Root directory for locally stored uploads.
    pub upload_dir: PathBuf,
    /// Optional object-store base URL; when set uploads are stored remotely.
    pub object_store_url: Option<String>,
    /// Maximum accepted upload size in bytes.
    pub file_size_limit: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Age after which a task stuck in `processing` is considered abandoned.
    pub task_stale_after: Option<Duration>,
}

/// Chunk budget policy.
///
/// Short documents get a smaller token budget so that they still produce several chunks; long
/// documents get a larger one so that more of the text fits under `max_chunks`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingPolicy {
    /// Hard cap on chunks produced per document.
    pub max_chunks: usize,
    /// Token budget for documents below `long_document_tokens`.
    pub short_chunk_tokens: usize,
    /// Token budget for documents at or above `long_document_tokens`.
    pub long_chunk_tokens: usize,
    /// Word count at which a document is treated as long.
    pub long_document_tokens: usize,
}

impl Default for ChunkingPolicy {
    fn default() -> Self {
        Self {
            max_chunks: 200,
            short_chunk_tokens: 100,
            long_chunk_tokens: 200,
            long_document_tokens: 2000,
        }
    }
}

/// OCR fallback configuration.
#[derive(Debug, Clone)]
pub struct OcrSettings {
    /// Engine used when a PDF has no usable text layer.
    pub provider: OcrProvider,
    /// Minimum count of non-whitespace characters for a PDF text layer to be used as-is.
    pub min_chars: usize,
    /// Rasterisation resolution for OCR page images.
    pub dpi: u32,
    /// Endpoint of the cloud text-detection service.
    pub cloud_url: Option<String>,
    /// API key for the cloud text-detection service.
    pub cloud_api_key: Option<String>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self {
            provider: OcrProvider::Tesseract,
            min_chars: 100,
            dpi: 300,
            cloud_url: None,
            cloud_api_key: None,
        }
    }
}

/// Supported embedding backends for the processing pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbeddingProvider {
    /// Deterministic offline hashing embedder.
    Hashing,
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible embeddings API.
    OpenAI,
}

/// Supported OCR engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OcrProvider {
    /// Local `tesseract` binary (development).
    Tesseract,
    /// Cloud document-text-detection API (production).
    Cloud,
    /// OCR disabled; image-only PDFs fail to parse.
    None,
}

/// How accepted uploads are executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// Run the pipeline in the request and return after it finishes.
    Inline,
    /// Enqueue a message and let the worker run the pipeline.
    Queued,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ChunkingPolicy::default();
        let chunking = ChunkingPolicy {
            max_chunks: parse_or("MAX_CHUNKS_PER_DOCUMENT", defaults.max_chunks)?,
            short_chunk_tokens: parse_or("SHORT_CHUNK_TOKENS", defaults.short_chunk_tokens)?,
            long_chunk_tokens: parse_or("LONG_CHUNK_TOKENS", defaults.long_chunk_tokens)?,
            long_document_tokens: parse_or("LONG_DOCUMENT_TOKENS", defaults.long_document_tokens)?,
        };
        if chunking.max_chunks == 0 {
            return Err(ConfigError::InvalidValue("MAX_CHUNKS_PER_DOCUMENT".into()));
        }
        if chunking.short_chunk_tokens == 0 {
            return Err(ConfigError::InvalidValue("SHORT_CHUNK_TOKENS".into()));
        }
        if chunking.long_chunk_tokens == 0 {
            return Err(ConfigError::InvalidValue("LONG_CHUNK_TOKENS".into()));
        }

        let ocr_defaults = OcrSettings::default();
        let ocr = OcrSettings {
            provider: parse_or("OCR_PROVIDER", ocr_defaults.provider)?,
            min_chars: parse_or("OCR_MIN_CHARS", ocr_defaults.min_chars)?,
            dpi: parse_or("OCR_DPI", ocr_defaults.dpi)?,
            cloud_url: load_env_optional("CLOUD_OCR_URL"),
            cloud_api_key: load_env_optional("CLOUD_OCR_API_KEY"),
        };
        if ocr.provider == OcrProvider::Cloud && ocr.cloud_url.is_none() {
            return Err(ConfigError::MissingVariable("CLOUD_OCR_URL".into()));
        }

        let embedding_provider = parse_or("EMBEDDING_PROVIDER", EmbeddingProvider::Hashing)?;
        let openai_api_key = load_env_optional("OPENAI_API_KEY");
        if embedding_provider == EmbeddingProvider::OpenAI && openai_api_key.is_none() {
            return Err(ConfigError::MissingVariable("OPENAI_API_KEY".into()));
        }
        let embedding_dimension: usize = parse_or("EMBEDDING_DIMENSION", 768)?;
        if embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }

        Ok(Self {
            qdrant_url: load_env_optional("QDRANT_URL"),
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            chunk_collection: load_env_optional("QDRANT_CHUNK_COLLECTION")
                .unwrap_or_else(|| "DocumentChunk".into()),
            record_collection: load_env_optional("QDRANT_RECORD_COLLECTION")
                .unwrap_or_else(|| "StructuredRecord".into()),
            embedding_provider,
            embedding_model: load_env_optional("EMBEDDING_MODEL")
                .unwrap_or_else(|| "nomic-embed-text".into()),
            embedding_dimension,
            ollama_url: load_env_optional("OLLAMA_URL"),
            openai_api_key,
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            chunking,
            ocr,
            dispatch_mode: parse_or("DISPATCH_MODE", DispatchMode::Inline)?,
            queue_capacity: parse_or("QUEUE_CAPACITY", 64)?,
            database_path: load_env_optional("DATABASE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("app.db")),
            upload_dir: load_env_optional("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("uploaded_files")),
            object_store_url: load_env_optional("OBJECT_STORE_URL"),
            file_size_limit: parse_or("FILE_SIZE_LIMIT", 5 * 1024 * 1024)?,
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            task_stale_after: load_env_optional("TASK_STALE_AFTER_SECS")
                .map(|value| {
                    value
                        .parse()
                        .map(Duration::from_secs)
                        .map_err(|_| ConfigError::InvalidValue("TASK_STALE_AFTER_SECS".into()))
                })
                .transpose()?,
        })
    }

    /// Configuration suited to tests and local experiments: in-memory vector store, hashing
    /// embeddings, inline dispatch, and OCR disabled.
    pub fn local(database_path: PathBuf, upload_dir: PathBuf) -> Self {
        Self {
            qdrant_url: None,
            qdrant_api_key: None,
            chunk_collection: "DocumentChunk".into(),
            record_collection: "StructuredRecord".into(),
            embedding_provider: EmbeddingProvider::Hashing,
            embedding_model: "hashing".into(),
            embedding_dimension: 64,
            ollama_url: None,
            openai_api_key: None,
            openai_base_url: None,
            chunking: ChunkingPolicy::default(),
            ocr: OcrSettings {
                provider: OcrProvider::None,
                ..OcrSettings::default()
            },
            dispatch_mode: DispatchMode::Inline,
            queue_capacity: 16,
            database_path,
            upload_dir,
            object_store_url: None,
            file_size_limit: 5 * 1024 * 1024,
            server_port: None,
            task_stale_after: None,
        }
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

impl FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hashing" | "local" => Ok(Self::Hashing),
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            _ => Err(()),
        }
    }
}

impl FromStr for OcrProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "tesseract" | "local" => Ok(Self::Tesseract),
            "cloud" => Ok(Self::Cloud),
            "none" | "off" => Ok(Self::None),
            _ => Err(()),
        }
    }
}

impl FromStr for DispatchMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "inline" | "sync" => Ok(Self::Inline),
            "queued" | "queue" | "async" => Ok(Self::Queued),
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
pub fn init_config() -> Result<&'static Config, ConfigError> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    tracing::debug!(
        qdrant_url = ?config.qdrant_url,
        chunk_collection = %config.chunk_collection,
        record_collection = %config.record_collection,
        embedding_provider = ?config.embedding_provider,
        dispatch_mode = ?config.dispatch_mode,
        ocr_provider = ?config.ocr.provider,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}
