//! Error types for docchat
//!
//! Domain failures (validation, ownership, state, collaborator outages) get their own
//! variants so callers can map them to a structured [`ErrorReport`]. Infrastructure
//! errors convert in with `#[from]` and are reported as internal.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// External collaborator that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalService {
    BlobStore,
    TextExtractor,
    Embedding,
    Completion,
    VectorStore,
}

impl std::fmt::Display for ExternalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExternalService::BlobStore => write!(f, "blob store"),
            ExternalService::TextExtractor => write!(f, "text extractor"),
            ExternalService::Embedding => write!(f, "embedding provider"),
            ExternalService::Completion => write!(f, "completion provider"),
            ExternalService::VectorStore => write!(f, "vector store"),
        }
    }
}

/// Why an upload was refused before processing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UploadRejection {
    Empty,
    UnsupportedType { extension: String },
    TooLarge { size_bytes: u64, max_bytes: u64 },
}

impl std::fmt::Display for UploadRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadRejection::Empty => write!(f, "file is empty"),
            UploadRejection::UnsupportedType { extension } if extension.is_empty() => {
                write!(f, "file has no extension, only PDF files are accepted")
            }
            UploadRejection::UnsupportedType { extension } => {
                write!(f, "'.{}' files are not accepted, only PDF", extension)
            }
            UploadRejection::TooLarge {
                size_bytes,
                max_bytes,
            } => write!(
                f,
                "file is {} bytes, the limit is {} bytes",
                size_bytes, max_bytes
            ),
        }
    }
}

/// Main error type for docchat operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Rejected upload '{filename}': {reason}")]
    InvalidUpload {
        filename: String,
        reason: UploadRejection,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Not authorized to access {entity} {id}")]
    Unauthorized { entity: &'static str, id: String },

    #[error("{service} error: {message}")]
    ExternalService {
        service: ExternalService,
        message: String,
    },

    #[error("Invalid state ({status}): {message}")]
    InvalidState { status: String, message: String },

    #[error("Vector store unavailable: {0}")]
    VectorStoreUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn external(service: ExternalService, message: impl Into<String>) -> Self {
        Error::ExternalService {
            service,
            message: message.into(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn unauthorized(entity: &'static str, id: impl Into<String>) -> Self {
        Error::Unauthorized {
            entity,
            id: id.into(),
        }
    }

    /// Classify this error for callers
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::InvalidUpload { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Unauthorized { .. } => ErrorKind::Unauthorized,
            Error::ExternalService { .. } | Error::VectorStoreUnavailable(_) => {
                ErrorKind::ExternalService
            }
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            _ => ErrorKind::Internal,
        }
    }

    /// Build the user-facing report. Internal failures get a generic message so
    /// database paths or driver output never leak to the caller.
    pub fn to_report(&self) -> ErrorReport {
        let kind = self.kind();
        let message = match self {
            Error::ExternalService { service, .. } => {
                format!("The {} is currently unavailable", service)
            }
            Error::VectorStoreUnavailable(_) => {
                "The vector store did not become ready in time".to_string()
            }
            Error::Config(message) => format!("Configuration problem: {}", message),
            _ if kind == ErrorKind::Internal => "An internal error occurred".to_string(),
            other => other.to_string(),
        };
        ErrorReport { kind, message }
    }
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Unauthorized,
    ExternalService,
    InvalidState,
    Internal,
}

/// Structured, safe failure result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result type alias for docchat
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::external(ExternalService::VectorStore, err.to_string())
    }
}
