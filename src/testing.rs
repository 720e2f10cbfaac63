//! In-process fakes for the external collaborators, shared by unit tests

use crate::blob::FsBlobStore;
use crate::chat::{ChatService, Collaborators};
use crate::config::{Config, FailurePolicy, VectorBackend};
use crate::embed::Embedder;
use crate::error::{Error, ExternalService, Result};
use crate::extract::TextExtractor;
use crate::llm::{ChatMessage, Completion, CompletionProvider};
use crate::meta::MetaDb;
use crate::store::MemoryVectorStore;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Words the fake embedder knows; each is one vector dimension
pub const VOCABULARY: &[&str] = &[
    "revenue",
    "profit",
    "growth",
    "employees",
    "office",
    "berlin",
    "turbine",
    "maintenance",
    "pizza",
    "volcano",
];

/// Marker the fake extractor expects at the start of a "PDF"
pub const FAKE_PDF_MAGIC: &[u8] = b"%PDF-";

/// Bytes that the fake extractor will turn back into `text`
pub fn fake_pdf(text: &str) -> Vec<u8> {
    let mut bytes = FAKE_PDF_MAGIC.to_vec();
    bytes.extend_from_slice(text.as_bytes());
    bytes
}

/// Config wired for tests: memory vector store, tiny chunks, fast polling
pub fn test_config(base: &Path) -> Config {
    let mut config = Config::default();
    config.init_paths(Some(base.to_path_buf()));
    config.vector_backend = VectorBackend::Memory;
    config.default_user = "alice".to_string();
    config.embedding.dimension = VOCABULARY.len();
    config.embedding.batch_size = 4;
    config.chunk.max_chars = 200;
    config.chunk.overlap_chars = 40;
    config.collection.ready_poll_interval_ms = 5;
    config.collection.ready_timeout_secs = 2;
    config.ingest.failure_policy = FailurePolicy::Strict;
    config.retrieval.min_score = 0.5;
    config
}

/// Bag-of-keywords embedder: one dimension per [`VOCABULARY`] word
#[derive(Default)]
pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    VOCABULARY
        .iter()
        .map(|word| lower.matches(word).count() as f32)
        .collect()
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    fn model_name(&self) -> &str {
        "keyword"
    }
}

/// Embedder that goes offline after `healthy_batches` successful calls
pub struct FailingEmbedder {
    healthy_batches: usize,
    calls: AtomicUsize,
}

impl FailingEmbedder {
    /// Fails on the very first batch
    pub fn new() -> Self {
        Self::after(0)
    }

    pub fn after(healthy_batches: usize) -> Self {
        Self {
            healthy_batches,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.healthy_batches {
            return Ok(texts.iter().map(|t| keyword_vector(t)).collect());
        }
        Err(Error::external(ExternalService::Embedding, "model offline"))
    }

    fn dimension(&self) -> usize {
        VOCABULARY.len()
    }

    fn model_name(&self) -> &str {
        "failing"
    }
}

/// Reads back text written by [`fake_pdf`]; anything else is unreadable
pub struct FakeExtractor;

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract_text(&self, bytes: Vec<u8>) -> Result<String> {
        match bytes.strip_prefix(FAKE_PDF_MAGIC) {
            Some(body) => Ok(String::from_utf8_lossy(body).into_owned()),
            None => Err(Error::external(
                ExternalService::TextExtractor,
                "unreadable PDF",
            )),
        }
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Completion provider that records every call
pub struct RecordingCompletion {
    pub reply: String,
    pub delay: Option<Duration>,
    pub fail: bool,
    calls: AtomicUsize,
    last_prompt: Mutex<Option<(String, Vec<ChatMessage>)>>,
}

impl RecordingCompletion {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: None,
            fail: false,
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new("late")
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<(String, Vec<ChatMessage>)> {
        self.last_prompt.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for RecordingCompletion {
    async fn complete(&self, system_prompt: &str, messages: &[ChatMessage]) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = Some((system_prompt.to_string(), messages.to_vec()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(Error::external(ExternalService::Completion, "rate limited"));
        }
        Ok(Completion {
            text: self.reply.clone(),
            tokens_used: Some(42),
        })
    }

    fn model_name(&self) -> &str {
        "recording"
    }
}

/// A full service over [`test_config`] with in-process fakes
pub async fn test_service(base: &Path, completion: Arc<RecordingCompletion>) -> ChatService {
    let config = test_config(base);
    let db = MetaDb::connect(&config).await.unwrap();
    let collaborators = Collaborators {
        blobs: Arc::new(FsBlobStore::new(&config.paths.blob_dir)),
        extractor: Arc::new(FakeExtractor),
        embedder: Arc::new(KeywordEmbedder::default()),
        completion,
        vector_store: Arc::new(MemoryVectorStore::new()),
    };
    ChatService::new(config, db, collaborators)
}
