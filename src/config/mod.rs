//! Configuration management for docchat
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Environment variable name for Qdrant API key
    #[serde(default = "default_qdrant_api_key_env")]
    pub qdrant_api_key_env: String,

    /// Which vector store implementation to use
    #[serde(default = "default_vector_backend")]
    pub vector_backend: VectorBackend,

    /// User identity used by the CLI when `--user` is not given
    #[serde(default = "default_user")]
    pub default_user: String,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Completion provider configuration
    #[serde(default)]
    pub completion: CompletionConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Per-conversation collection configuration
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Upload and ingestion configuration
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Retrieval and answer configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Message history cache configuration
    #[serde(default)]
    pub history: HistoryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Vector store implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorBackend {
    /// Remote Qdrant over gRPC
    Qdrant,
    /// In-process store; vectors are lost when the process exits
    Memory,
}

/// What a single failed document does to its conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Any failed document fails the whole conversation
    Strict,
    /// Failed documents are skipped; the conversation becomes ready if any document completed
    Partial,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings API
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Environment variable holding the bearer token
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Retries for transient failures
    #[serde(default = "default_embedding_retries")]
    pub retries: usize,
}

/// Completion provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    /// Base URL of an OpenAI-compatible chat completions API
    #[serde(default = "default_completion_url")]
    pub url: String,

    #[serde(default = "default_completion_model")]
    pub model: String,

    /// Environment variable holding the bearer token
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Caller-visible timeout for one completion call
    #[serde(default = "default_completion_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_completion_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_completion_temperature")]
    pub temperature: f32,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Maximum chunk size, in UTF-8 bytes
    #[serde(default = "default_chunk_max_chars")]
    pub max_chars: usize,

    /// Overlap between consecutive chunks, in UTF-8 bytes
    #[serde(default = "default_chunk_overlap")]
    pub overlap_chars: usize,
}

/// Per-conversation vector collection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Prefix of every generated collection name
    #[serde(default = "default_collection_prefix")]
    pub prefix: String,

    /// Maximum length of the title slug
    #[serde(default = "default_max_slug_len")]
    pub max_slug_len: usize,

    /// HNSW graph degree
    #[serde(default = "default_hnsw_m")]
    pub hnsw_m: u64,

    /// HNSW construction beam width
    #[serde(default = "default_hnsw_ef_construct")]
    pub hnsw_ef_construct: u64,

    /// How long to wait for a new collection to become queryable
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,

    /// Delay between readiness checks (milliseconds)
    #[serde(default = "default_ready_poll_interval")]
    pub ready_poll_interval_ms: u64,
}

/// Upload and ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,

    /// Accepted file extensions (lowercase, without dot)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Number of documents processed concurrently
    #[serde(default = "default_ingest_workers")]
    pub workers: usize,

    /// Effect of a failed document on its conversation
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
}

/// Retrieval and answer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of chunks retrieved per question
    #[serde(default = "default_retrieval_top_k")]
    pub top_k: usize,

    /// Minimum similarity score (0.0 - 1.0)
    #[serde(default = "default_retrieval_min_score")]
    pub min_score: f32,

    /// Context messages used when the caller does not ask for a number
    #[serde(default = "default_context_size")]
    pub default_context_size: usize,

    /// Upper clamp for requested context messages
    #[serde(default = "default_max_context_size")]
    pub max_context_size: usize,

    #[serde(default = "default_max_question_chars")]
    pub max_question_chars: usize,

    /// Length of the excerpt attached to each source citation
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
}

/// Message history cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_enabled")]
    pub enabled: bool,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for docchat data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Root of the local blob store
    pub blob_dir: PathBuf,
}

impl PathsConfig {
    fn under(base: PathBuf, config_file: PathBuf) -> Self {
        Self {
            config_file,
            db_file: base.join("metadata.db"),
            blob_dir: base.join("blobs"),
            base_dir: base,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            qdrant_api_key_env: default_qdrant_api_key_env(),
            vector_backend: default_vector_backend(),
            default_user: default_user(),
            embedding: EmbeddingConfig::default(),
            completion: CompletionConfig::default(),
            chunk: ChunkConfig::default(),
            collection: CollectionConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            history: HistoryConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: default_embedding_url(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            batch_size: default_embedding_batch_size(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_embedding_timeout(),
            retries: default_embedding_retries(),
        }
    }
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            url: default_completion_url(),
            model: default_completion_model(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_completion_timeout(),
            max_tokens: default_completion_max_tokens(),
            temperature: default_completion_temperature(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: default_chunk_max_chars(),
            overlap_chars: default_chunk_overlap(),
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            prefix: default_collection_prefix(),
            max_slug_len: default_max_slug_len(),
            hnsw_m: default_hnsw_m(),
            hnsw_ef_construct: default_hnsw_ef_construct(),
            ready_timeout_secs: default_ready_timeout(),
            ready_poll_interval_ms: default_ready_poll_interval(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            allowed_extensions: default_allowed_extensions(),
            workers: default_ingest_workers(),
            failure_policy: default_failure_policy(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_retrieval_top_k(),
            min_score: default_retrieval_min_score(),
            default_context_size: default_context_size(),
            max_context_size: default_max_context_size(),
            max_question_chars: default_max_question_chars(),
            excerpt_chars: default_excerpt_chars(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_history_enabled(),
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

impl EmbeddingConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok()
    }
}

impl CollectionConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms)
    }
}

impl Config {
    /// Get the default base directory for docchat (~/.docchat)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docchat")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig::under(base.clone(), base.join("config.toml"));
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Data lives next to the config file
        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig::under(base, config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory, falling back to defaults
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Get the Qdrant API key from environment
    pub fn qdrant_api_key(&self) -> Option<String> {
        if self.qdrant_api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.qdrant_api_key_env).ok()
    }

    /// Check if docchat is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk.max_chars == 0 {
            return Err(Error::Config("chunk.max_chars must be positive".to_string()));
        }

        if self.chunk.overlap_chars >= self.chunk.max_chars {
            return Err(Error::Config(
                "chunk.overlap_chars must be < chunk.max_chars".to_string(),
            ));
        }

        if self.embedding.dimension == 0 {
            return Err(Error::Config(
                "embedding.dimension must be positive".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        if self.retrieval.min_score < 0.0 || self.retrieval.min_score > 1.0 {
            return Err(Error::Config(
                "retrieval.min_score must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.retrieval.top_k == 0 {
            return Err(Error::Config("retrieval.top_k must be positive".to_string()));
        }

        if self.retrieval.default_context_size > self.retrieval.max_context_size {
            return Err(Error::Config(
                "retrieval.default_context_size must be <= retrieval.max_context_size"
                    .to_string(),
            ));
        }

        if self.ingest.workers == 0 {
            return Err(Error::Config("ingest.workers must be positive".to_string()));
        }

        if self.ingest.allowed_extensions.is_empty() {
            return Err(Error::Config(
                "ingest.allowed_extensions must not be empty".to_string(),
            ));
        }

        if self.collection.prefix.is_empty()
            || !self
                .collection
                .prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(Error::Config(
                "collection.prefix must be non-empty and use [a-z0-9_]".to_string(),
            ));
        }

        if self.collection.ready_poll_interval_ms == 0 {
            return Err(Error::Config(
                "collection.ready_poll_interval_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
