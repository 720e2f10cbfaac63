//! Document ingestion pipeline
//!
//! One background task per uploaded file runs
//! blob store -> validation -> text extraction -> chunking -> embedding -> vector upsert,
//! writing progress to the document row as it goes and reporting exactly one
//! terminal event to the [`ConversationStateMachine`]. Tasks are bounded by a
//! shared semaphore; callers get an [`IngestTicket`] but normally just poll the
//! persisted status.

mod worker;

use crate::blob::{blob_path, BlobStore};
use crate::chunk::Chunker;
use crate::collections::CollectionManager;
use crate::config::{Config, IngestConfig};
use crate::embed::Embedder;
use crate::error::{Error, Result, UploadRejection};
use crate::extract::TextExtractor;
use crate::meta::{Conversation, Document, MetaDb};
use crate::state::ConversationStateMachine;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// An uploaded file, fully buffered
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: content_type.into(),
            bytes,
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// How a document's processing ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    Completed { chars: usize, chunks: usize },
    Failed { reason: String },
}

/// Handle to a scheduled document task
#[derive(Debug)]
pub struct IngestTicket {
    pub document_id: String,
    pub handle: JoinHandle<DocumentOutcome>,
}

/// Check an upload against the configured limits
pub fn validate_upload(
    config: &IngestConfig,
    filename: &str,
    size_bytes: u64,
) -> std::result::Result<(), UploadRejection> {
    if size_bytes == 0 {
        return Err(UploadRejection::Empty);
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !config
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
    {
        return Err(UploadRejection::UnsupportedType { extension });
    }

    if size_bytes > config.max_file_bytes {
        return Err(UploadRejection::TooLarge {
            size_bytes,
            max_bytes: config.max_file_bytes,
        });
    }

    Ok(())
}

/// Same check, as a crate error naming the file
pub fn check_upload(config: &IngestConfig, upload: &Upload) -> Result<()> {
    validate_upload(config, &upload.filename, upload.size()).map_err(|reason| {
        Error::InvalidUpload {
            filename: upload.filename.clone(),
            reason,
        }
    })
}

/// SHA-256 of the upload, hex encoded
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Everything a worker needs for one document
#[derive(Debug, Clone)]
pub(crate) struct DocumentJob {
    pub document_id: String,
    pub conversation_id: String,
    pub collection_name: String,
    pub filename: String,
    pub content_type: String,
    pub blob_path: String,
    pub content_hash: String,
    pub bytes: Vec<u8>,
}

/// Schedules and runs document workers
#[derive(Clone)]
pub struct IngestionPipeline {
    db: MetaDb,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    collections: Arc<CollectionManager>,
    state: Arc<ConversationStateMachine>,
    chunker: Chunker,
    ingest: IngestConfig,
    batch_size: usize,
    permits: Arc<Semaphore>,
}

impl IngestionPipeline {
    pub fn new(
        config: &Config,
        db: MetaDb,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        collections: Arc<CollectionManager>,
        state: Arc<ConversationStateMachine>,
    ) -> Self {
        let workers = config.ingest.workers.max(1);
        debug!(workers, extractor = extractor.name(), "Ingestion pipeline configured");
        Self {
            db,
            blobs,
            extractor,
            embedder,
            collections,
            state,
            chunker: Chunker::new(&config.chunk),
            ingest: config.ingest.clone(),
            batch_size: config.embedding.batch_size.max(1),
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    pub fn ingest_config(&self) -> &IngestConfig {
        &self.ingest
    }

    /// Record a PENDING document for `upload` and start its worker.
    ///
    /// Returns as soon as the row exists; the bytes move into the task.
    pub async fn submit(&self, conversation: &Conversation, upload: Upload) -> Result<IngestTicket> {
        let document_id = Uuid::new_v4().to_string();
        let path = blob_path(
            &conversation.user_id,
            &conversation.id,
            Utc::now().timestamp_millis(),
            &document_id,
            &upload.filename,
        );
        let hash = content_hash(&upload.bytes);

        let mut document = Document::new(
            document_id.clone(),
            conversation.id.clone(),
            upload.filename.clone(),
            path.clone(),
            hash.clone(),
            upload.size(),
        );
        document.content_type = Some(upload.content_type.clone());
        self.db.insert_document(&document).await?;

        info!(
            conversation_id = %conversation.id,
            document_id = %document_id,
            filename = %upload.filename,
            bytes = upload.bytes.len(),
            "Document accepted"
        );

        let job = DocumentJob {
            document_id: document_id.clone(),
            conversation_id: conversation.id.clone(),
            collection_name: conversation.collection_name.clone(),
            filename: upload.filename,
            content_type: upload.content_type,
            blob_path: path,
            content_hash: hash,
            bytes: upload.bytes,
        };

        let pipeline = self.clone();
        let handle = tokio::spawn(async move { pipeline.run(job).await });

        Ok(IngestTicket {
            document_id,
            handle,
        })
    }
}
