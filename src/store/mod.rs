//! Vector store integration
//!
//! This module defines the wire-level contract every vector backend implements:
//! - Collection create / status / delete
//! - Point upsert and delete-by-field
//! - Similarity search with a score floor
//!
//! Two backends ship: [`QdrantStore`] and the in-process [`MemoryVectorStore`].

mod memory;
mod payload;
mod qdrant;

pub use memory::*;
pub use payload::*;
pub use qdrant::*;

use crate::config::{Config, VectorBackend};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Distance metric for a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
}

/// Parameters for creating a collection
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSpec {
    pub dimension: usize,
    pub distance: DistanceMetric,
    pub hnsw_m: u64,
    pub hnsw_ef_construct: u64,
}

impl CollectionSpec {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dimension: config.embedding.dimension,
            distance: DistanceMetric::Cosine,
            hnsw_m: config.collection.hnsw_m,
            hnsw_ef_construct: config.collection.hnsw_ef_construct,
        }
    }
}

/// Queryability of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    /// Fully indexed
    Ready,
    /// Queryable while the index is being optimized
    Optimizing,
    /// Created but not yet queryable
    Pending,
    /// The backend reported an error state
    Failed,
    /// No such collection
    Missing,
}

impl CollectionStatus {
    pub fn is_queryable(&self) -> bool {
        matches!(self, CollectionStatus::Ready | CollectionStatus::Optimizing)
    }
}

/// Search result
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Search filter options
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    /// Restrict matches to these documents
    pub document_ids: Option<Vec<String>>,
}

impl SearchFilter {
    pub fn documents(ids: Vec<String>) -> Option<Self> {
        if ids.is_empty() {
            None
        } else {
            Some(Self {
                document_ids: Some(ids),
            })
        }
    }

    pub fn matches(&self, payload: &ChunkPayload) -> bool {
        match &self.document_ids {
            Some(ids) => ids.iter().any(|id| *id == payload.doc_id),
            None => true,
        }
    }
}

/// Contract for a vector database holding one collection per conversation
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create a collection; succeeds if it already exists
    async fn create_collection(&self, name: &str, spec: &CollectionSpec) -> Result<()>;

    async fn collection_exists(&self, name: &str) -> Result<bool>;

    async fn collection_status(&self, name: &str) -> Result<CollectionStatus>;

    async fn upsert(&self, name: &str, points: Vec<ChunkPoint>) -> Result<()>;

    /// Top `limit` matches scoring at least `min_score`, best first
    async fn search(
        &self,
        name: &str,
        vector: Vec<f32>,
        limit: usize,
        min_score: f32,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<SearchResult>>;

    /// Delete every point whose payload `field` equals `value`
    async fn delete_by_field(&self, name: &str, field: &str, value: &str) -> Result<()>;

    /// Returns false when the collection did not exist
    async fn delete_collection(&self, name: &str) -> Result<bool>;

    async fn count(&self, name: &str) -> Result<u64>;

    fn backend_name(&self) -> &'static str;
}

/// Create the vector store selected in configuration
pub fn create_vector_store(config: &Config) -> Result<Arc<dyn VectorStore>> {
    match config.vector_backend {
        VectorBackend::Qdrant => Ok(Arc::new(QdrantStore::new(
            &config.qdrant_url,
            config.qdrant_api_key(),
        )?)),
        VectorBackend::Memory => Ok(Arc::new(MemoryVectorStore::new())),
    }
}
