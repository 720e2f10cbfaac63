//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for different embedding backends
//! - An OpenAI-compatible HTTP backend
//! - Count-checked batch helpers

mod http_backend;

pub use http_backend::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, ExternalService, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedder based on configuration
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let embedder = HttpEmbedder::new(config)?;
    Ok(Arc::new(embedder))
}

/// Embed a single query string
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed(vec![text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| {
            Error::external(
                ExternalService::Embedding,
                "provider returned no vector for the query",
            )
        })
}

/// Embed one batch, failing if the provider drops or adds vectors
pub async fn embed_batch(embedder: &dyn Embedder, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
    let expected = texts.len();
    let embeddings = embedder.embed(texts).await?;
    if embeddings.len() != expected {
        return Err(Error::external(
            ExternalService::Embedding,
            format!("expected {} vectors, got {}", expected, embeddings.len()),
        ));
    }
    Ok(embeddings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
        short: bool,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = if self.short { texts.len() - 1 } else { texts.len() };
            Ok(vec![vec![1.0, 0.0]; n])
        }

        fn dimension(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn test_embed_batch() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            short: false,
        };
        let texts: Vec<String> = (0..3).map(|i| format!("text {}", i)).collect();

        let vectors = embed_batch(&embedder, texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_batch_is_an_error() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            short: true,
        };
        let texts = vec!["a".to_string(), "b".to_string()];
        assert!(embed_batch(&embedder, texts).await.is_err());
    }

    #[tokio::test]
    async fn test_embed_query() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
            short: false,
        };
        assert_eq!(embed_query(&embedder, "q").await.unwrap(), vec![1.0, 0.0]);
    }
}
