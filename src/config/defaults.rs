//! Default values for configuration

use super::{FailurePolicy, VectorBackend};

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default environment variable name for Qdrant API key
pub fn default_qdrant_api_key_env() -> String {
    "QDRANT_API_KEY".to_string()
}

/// Default vector backend
pub fn default_vector_backend() -> VectorBackend {
    VectorBackend::Qdrant
}

/// Default user identity for the CLI
pub fn default_user() -> String {
    std::env::var("USER").unwrap_or_else(|_| "local".to_string())
}

/// Default embedding endpoint (OpenAI-compatible)
pub fn default_embedding_url() -> String {
    std::env::var("DOCCHAT_EMBEDDING_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

/// Default embedding model
pub fn default_embedding_model() -> String {
    "text-embedding-3-large".to_string()
}

/// Default embedding dimension (text-embedding-3-large)
pub fn default_embedding_dimension() -> usize {
    3072
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    16
}

/// Default environment variable holding the provider API key
pub fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

pub fn default_embedding_timeout() -> u64 {
    30
}

pub fn default_embedding_retries() -> usize {
    2
}

/// Default completion endpoint (OpenAI-compatible)
pub fn default_completion_url() -> String {
    std::env::var("DOCCHAT_COMPLETION_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string())
}

/// Default completion model
pub fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}

pub fn default_completion_timeout() -> u64 {
    60
}

pub fn default_completion_max_tokens() -> u32 {
    1024
}

pub fn default_completion_temperature() -> f32 {
    0.2
}

/// Default maximum bytes per chunk
pub fn default_chunk_max_chars() -> usize {
    1000
}

/// Default overlap bytes between chunks (20%)
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default collection name prefix
pub fn default_collection_prefix() -> String {
    "chat".to_string()
}

/// Default maximum slug length inside a collection name
pub fn default_max_slug_len() -> usize {
    40
}

pub fn default_hnsw_m() -> u64 {
    16
}

pub fn default_hnsw_ef_construct() -> u64 {
    100
}

/// Default readiness timeout for new collections
pub fn default_ready_timeout() -> u64 {
    30
}

pub fn default_ready_poll_interval() -> u64 {
    500
}

/// Default upload size cap (50 MB)
pub fn default_max_file_bytes() -> u64 {
    50 * 1024 * 1024
}

pub fn default_allowed_extensions() -> Vec<String> {
    vec!["pdf".to_string()]
}

/// Default number of concurrent ingestion workers
pub fn default_ingest_workers() -> usize {
    4
}

/// Default failure policy: one failed document fails the conversation
pub fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::Strict
}

/// Default number of chunks retrieved per question
pub fn default_retrieval_top_k() -> usize {
    5
}

/// Default minimum similarity score
pub fn default_retrieval_min_score() -> f32 {
    0.5
}

pub fn default_context_size() -> usize {
    5
}

pub fn default_max_context_size() -> usize {
    20
}

pub fn default_max_question_chars() -> usize {
    2000
}

/// Default excerpt length for source citations
pub fn default_excerpt_chars() -> usize {
    240
}

pub fn default_history_enabled() -> bool {
    true
}
