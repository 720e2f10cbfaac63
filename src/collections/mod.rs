//! Per-conversation vector collections
//!
//! Every conversation searches its own collection, so a question can never retrieve
//! another conversation's chunks. The manager owns:
//! - collection naming (title slug + timestamp + random suffix)
//! - synchronous create-and-poll until the collection is queryable
//! - the registry of live handles, shared by ingestion and retrieval

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{ChunkPoint, CollectionSpec, CollectionStatus, SearchFilter, SearchResult, VectorStore};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Hex characters of the random suffix on generated names
const NAME_SUFFIX_LEN: usize = 8;

/// A usable collection: its name plus the store that serves it
#[derive(Clone)]
pub struct CollectionHandle {
    name: String,
    store: Arc<dyn VectorStore>,
}

impl std::fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("name", &self.name)
            .field("backend", &self.store.backend_name())
            .finish()
    }
}

impl CollectionHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn upsert(&self, points: Vec<ChunkPoint>) -> Result<()> {
        self.store.upsert(&self.name, points).await
    }

    pub async fn search(
        &self,
        vector: Vec<f32>,
        limit: usize,
        min_score: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>> {
        self.store
            .search(&self.name, vector, limit, min_score, filter)
            .await
    }

    /// Remove every chunk belonging to one document
    pub async fn delete_document(&self, doc_id: &str) -> Result<()> {
        self.store.delete_by_field(&self.name, "doc_id", doc_id).await
    }

    pub async fn count(&self) -> Result<u64> {
        self.store.count(&self.name).await
    }
}

/// Registry and factory for conversation collections
pub struct CollectionManager {
    store: Arc<dyn VectorStore>,
    spec: CollectionSpec,
    prefix: String,
    max_slug_len: usize,
    ready_timeout: Duration,
    poll_interval: Duration,
    handles: DashMap<String, CollectionHandle>,
}

impl CollectionManager {
    pub fn new(config: &Config, store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            spec: CollectionSpec::from_config(config),
            prefix: config.collection.prefix.clone(),
            max_slug_len: config.collection.max_slug_len,
            ready_timeout: config.collection.ready_timeout(),
            poll_interval: config.collection.ready_poll_interval(),
            handles: DashMap::new(),
        }
    }

    /// Generate a fresh collection name for a conversation title.
    ///
    /// Two titles created in the same millisecond still differ by the suffix.
    pub fn collection_name_for(&self, title: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}_{}_{}",
            self.prefix,
            slugify(title, self.max_slug_len),
            Utc::now().timestamp_millis(),
            &suffix[..NAME_SUFFIX_LEN]
        )
    }

    /// Create a new collection for a conversation and wait until it is queryable.
    ///
    /// Never hands back a collection that is already registered to someone else.
    pub async fn create_collection(&self, title: &str) -> Result<CollectionHandle> {
        let name = self.collection_name_for(title);
        self.create_named(&name).await
    }

    /// Like [`ensure_collection`](Self::ensure_collection), but fails if `name` is already live
    pub async fn create_named(&self, name: &str) -> Result<CollectionHandle> {
        if self.handles.contains_key(name) {
            return Err(Error::Other(format!(
                "collection name '{}' is already in use",
                name
            )));
        }
        self.ensure_collection(name).await
    }

    /// Create (if needed) and await readiness of a named collection.
    /// Calling this again for the same name returns the same handle.
    pub async fn ensure_collection(&self, name: &str) -> Result<CollectionHandle> {
        if let Some(handle) = self.handles.get(name) {
            return Ok(handle.clone());
        }

        self.store.create_collection(name, &self.spec).await?;
        self.wait_until_ready(name).await?;

        info!(collection = %name, backend = self.store.backend_name(), "Collection ready");
        Ok(self.cache(name))
    }

    /// Return the cached handle, reconnecting or recreating the collection if needed
    pub async fn get_handle(&self, name: &str) -> Result<CollectionHandle> {
        if let Some(handle) = self.handles.get(name) {
            return Ok(handle.clone());
        }

        if self.store.collection_exists(name).await? {
            debug!(collection = %name, "Reconnected to existing collection");
            self.wait_until_ready(name).await?;
            return Ok(self.cache(name));
        }

        warn!(collection = %name, "Collection missing on the vector store, recreating");
        self.ensure_collection(name).await
    }

    /// Forget the in-process handle; the remote collection is left alone
    pub fn drop_from_cache(&self, name: &str) -> bool {
        self.handles.remove(name).is_some()
    }

    /// Delete the remote collection and its cache entry
    pub async fn delete_collection(&self, name: &str) -> Result<bool> {
        self.handles.remove(name);
        match self.store.delete_collection(name).await {
            Ok(existed) => {
                info!(collection = %name, existed, "Collection deleted");
                Ok(existed)
            }
            Err(e) => {
                warn!(collection = %name, "Failed to delete collection: {}", e);
                Err(e)
            }
        }
    }

    pub fn is_cached(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    fn cache(&self, name: &str) -> CollectionHandle {
        self.handles
            .entry(name.to_string())
            .or_insert_with(|| CollectionHandle {
                name: name.to_string(),
                store: Arc::clone(&self.store),
            })
            .clone()
    }

    async fn wait_until_ready(&self, name: &str) -> Result<()> {
        let deadline = Instant::now() + self.ready_timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.store.collection_status(name).await {
                Ok(status) if status.is_queryable() => {
                    debug!(collection = %name, attempts, "Collection queryable");
                    return Ok(());
                }
                Ok(CollectionStatus::Failed) => {
                    return Err(Error::VectorStoreUnavailable(format!(
                        "collection '{}' reported an error state",
                        name
                    )));
                }
                Ok(status) => debug!(collection = %name, ?status, "Collection not ready yet"),
                Err(e) => debug!(collection = %name, "Readiness check failed: {}", e),
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(Error::VectorStoreUnavailable(format!(
                    "collection '{}' not queryable after {:?} ({} checks)",
                    name, self.ready_timeout, attempts
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Reduce a title to `[a-z0-9_]`, collapsing separators and bounding the length
pub fn slugify(title: &str, max_len: usize) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_was_sep = true;

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }

    slug.truncate(max_len);
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug.to_string()
    }
}
