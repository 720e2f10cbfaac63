use super::{validate_upload, DocumentJob, DocumentOutcome, IngestionPipeline};
use crate::collections::CollectionHandle;
use crate::embed::embed_batch;
use crate::error::{Error, ErrorKind, Result};
use crate::extract::has_usable_text;
use crate::store::{ChunkPayload, ChunkPoint};
use chrono::Utc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Progress checkpoints; embedding and storage share the rest
const PROGRESS_STORED: u8 = 5;
const PROGRESS_VALIDATED: u8 = 8;
const PROGRESS_CHUNKED: u8 = 10;

/// What a failed run left behind
#[derive(Default)]
struct Residue {
    collection: Option<CollectionHandle>,
    vectors_written: bool,
}

impl IngestionPipeline {
    pub(super) async fn run(self, mut job: DocumentJob) -> DocumentOutcome {
        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                let reason = format!("{}: worker pool closed ({})", job.filename, e);
                return self.fail(&job, reason, Residue::default()).await;
            }
        };

        let start = Instant::now();
        let mut residue = Residue::default();

        match self.process(&mut job, &mut residue).await {
            Ok((chars, chunks)) => {
                if let Err(e) = self.state.on_document_completed(&job.conversation_id).await {
                    error!(conversation_id = %job.conversation_id, "Failed to record completion: {}", e);
                }
                info!(
                    document_id = %job.document_id,
                    filename = %job.filename,
                    chunks,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Document processed"
                );
                DocumentOutcome::Completed { chars, chunks }
            }
            Err(e) => {
                let reason = failure_reason(&job.filename, &e);
                self.fail(&job, reason, residue).await
            }
        }
    }

    async fn process(&self, job: &mut DocumentJob, residue: &mut Residue) -> Result<(usize, usize)> {
        let bytes = std::mem::take(&mut job.bytes);
        self.db.mark_document_processing(&job.document_id).await?;

        self.blobs.put(&job.blob_path, &bytes, &job.content_type).await?;
        self.progress(job, PROGRESS_STORED).await?;

        let duplicates = self
            .db
            .count_duplicates(&job.conversation_id, &job.content_hash, &job.document_id)
            .await?;
        if duplicates > 0 {
            info!(
                document_id = %job.document_id,
                content_hash = %job.content_hash,
                duplicates,
                "Document content already uploaded to this conversation"
            );
        }

        validate_upload(&self.ingest, &job.filename, bytes.len() as u64).map_err(|reason| {
            Error::InvalidUpload {
                filename: job.filename.clone(),
                reason,
            }
        })?;
        self.progress(job, PROGRESS_VALIDATED).await?;

        let text = self.extractor.extract_text(bytes).await?;
        if !has_usable_text(&text) {
            return Err(Error::Validation("no extractable text".to_string()));
        }
        let char_count = text.chars().count();

        let chunks = self.chunker.chunk(&text, &job.content_hash);
        self.db
            .set_document_chunk_count(&job.document_id, chunks.len())
            .await?;
        self.progress(job, PROGRESS_CHUNKED).await?;
        debug!(document_id = %job.document_id, chars = char_count, chunks = chunks.len(), "Chunked document");

        let collection = self.collections.get_handle(&job.collection_name).await?;
        residue.collection = Some(collection.clone());

        let total = chunks.len();
        let mut done = 0usize;
        let updated_at = Utc::now().to_rfc3339();

        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = embed_batch(self.embedder.as_ref(), texts).await?;

            let points: Vec<ChunkPoint> = batch
                .iter()
                .zip(vectors)
                .map(|(chunk, vector)| ChunkPoint {
                    id: ChunkPoint::point_id(&job.document_id, chunk.index),
                    vector,
                    payload: ChunkPayload {
                        conversation_id: job.conversation_id.clone(),
                        doc_id: job.document_id.clone(),
                        doc_name: job.filename.clone(),
                        chunk_index: chunk.index as i64,
                        chunk_hash: chunk.hash.clone(),
                        text: chunk.text.clone(),
                        updated_at: updated_at.clone(),
                    },
                })
                .collect();

            residue.vectors_written = true;
            collection.upsert(points).await?;

            done += batch.len();
            self.progress(job, embedding_progress(done, total)).await?;
        }

        self.db
            .complete_document(&job.document_id, char_count, total)
            .await?;
        Ok((char_count, total))
    }

    async fn progress(&self, job: &DocumentJob, value: u8) -> Result<()> {
        self.db.update_document_progress(&job.document_id, value).await
    }

    /// Record the failure, undo partial writes, then report the terminal event
    async fn fail(&self, job: &DocumentJob, reason: String, residue: Residue) -> DocumentOutcome {
        warn!(document_id = %job.document_id, reason = %reason, "Document failed");

        if let Err(e) = self.db.fail_document(&job.document_id, &reason).await {
            error!(document_id = %job.document_id, "Failed to mark document failed: {}", e);
        }

        if let Err(e) = self.blobs.delete(&job.blob_path).await {
            warn!(path = %job.blob_path, "Blob cleanup failed: {}", e);
        }

        if let (Some(collection), true) = (&residue.collection, residue.vectors_written) {
            if let Err(e) = collection.delete_document(&job.document_id).await {
                warn!(document_id = %job.document_id, "Vector cleanup failed: {}", e);
            }
        }

        if let Err(e) = self
            .state
            .on_document_failed(&job.conversation_id, &reason)
            .await
        {
            error!(conversation_id = %job.conversation_id, "Failed to record failure: {}", e);
        }

        DocumentOutcome::Failed { reason }
    }
}

/// 10..=99 across embedding batches; 100 is written only on completion
fn embedding_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 99;
    }
    let span = (100 - PROGRESS_CHUNKED) as usize;
    let value = PROGRESS_CHUNKED as usize + span * done / total;
    value.min(99) as u8
}

/// Human-readable reason stored on the document and conversation
fn failure_reason(filename: &str, err: &Error) -> String {
    let detail = match err.kind() {
        ErrorKind::Internal => err.to_report().message,
        _ => err.to_string(),
    };
    format!("{}: {}", filename, detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExternalService;

    #[test]
    fn test_embedding_progress_bounds() {
        assert_eq!(embedding_progress(0, 10), 10);
        assert_eq!(embedding_progress(5, 10), 55);
        assert_eq!(embedding_progress(10, 10), 99);
        assert_eq!(embedding_progress(0, 0), 99);
    }

    #[test]
    fn test_embedding_progress_monotonic() {
        let total = 37;
        let values: Vec<u8> = (0..=total).map(|d| embedding_progress(d, total)).collect();
        assert!(values.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_failure_reason_hides_internal_detail() {
        let internal = Error::Other("disk /dev/sda1 full".to_string());
        assert_eq!(
            failure_reason("a.pdf", &internal),
            "a.pdf: An internal error occurred"
        );

        let external = Error::external(ExternalService::TextExtractor, "unreadable PDF");
        assert_eq!(
            failure_reason("a.pdf", &external),
            "a.pdf: text extractor error: unreadable PDF"
        );
    }
}
