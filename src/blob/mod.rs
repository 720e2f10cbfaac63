//! Blob storage for original uploads

use crate::error::{Error, ExternalService, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Durable storage for uploaded bytes, addressed by relative path
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Deleting a missing blob succeeds
    async fn delete(&self, path: &str) -> Result<()>;
}

/// Deterministic blob path for an upload:
/// `users/{user}/conversations/{conversation}/{timestamp}_{document}_{filename}`
///
/// The document id keeps same-named files in one conversation apart.
pub fn blob_path(
    user_id: &str,
    conversation_id: &str,
    timestamp_millis: i64,
    document_id: &str,
    filename: &str,
) -> String {
    format!(
        "users/{}/conversations/{}/{}_{}_{}",
        sanitize_component(user_id),
        sanitize_component(conversation_id),
        timestamp_millis,
        sanitize_component(document_id),
        sanitize_component(filename)
    )
}

/// Keep the final path segment and replace anything outside `[A-Za-z0-9._-]`
fn sanitize_component(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Blob store on the local filesystem
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let valid = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid {
            return Err(Error::external(
                ExternalService::BlobStore,
                format!("invalid blob path '{}'", path),
            ));
        }
        Ok(self.root.join(relative))
    }

    fn io_error(op: &str, path: &str, err: std::io::Error) -> Error {
        Error::external(ExternalService::BlobStore, format!("{} {}: {}", op, path, err))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, path: &str, bytes: &[u8], content_type: &str) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::io_error("put", path, e))?;
        }
        tokio::fs::write(&full, bytes)
            .await
            .map_err(|e| Self::io_error("put", path, e))?;
        debug!(path, content_type, bytes = bytes.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|e| Self::io_error("get", path, e))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error("delete", path, e)),
        }
    }
}
