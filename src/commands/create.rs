//! Create command: start a conversation over local PDF files

use crate::chat::ChatService;
use crate::config::IngestConfig;
use crate::error::{Error, Result};
use crate::ingest::{DocumentOutcome, IngestTicket, Upload};
use crate::meta::{Conversation, Document, DocumentStatus};
use crate::progress::document_bar;
use futures::future::join_all;
use indicatif::ProgressBar;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Final state of a created conversation
#[derive(Debug, Clone, Serialize)]
pub struct CreateReport {
    pub conversation: Conversation,
    pub documents: Vec<Document>,
}

/// Expand the given files and directories into uploads
///
/// Directories contribute every file whose extension is allowed by the ingest
/// config; files named explicitly are passed through so the service can reject them.
pub fn collect_uploads(paths: &[PathBuf], config: &IngestConfig) -> Result<Vec<Upload>> {
    let mut files = Vec::new();

    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).sort_by_file_name() {
                let entry = entry.map_err(|e| Error::Other(e.to_string()))?;
                if entry.file_type().is_file() && has_allowed_extension(entry.path(), config) {
                    files.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(Error::not_found("file", path.display().to_string()));
        }
    }

    debug!("Collected {} files", files.len());

    files
        .into_iter()
        .map(|file| {
            let bytes = std::fs::read(&file)?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());
            let content_type = mime_guess::from_path(&file)
                .first_or_octet_stream()
                .essence_str()
                .to_string();
            Ok(Upload::new(filename, content_type, bytes))
        })
        .collect()
}

fn has_allowed_extension(path: &Path, config: &IngestConfig) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            config
                .allowed_extensions
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Create the conversation and stay up until every document is terminal
pub async fn cmd_create(
    service: &ChatService,
    user_id: &str,
    title: &str,
    paths: &[PathBuf],
    show_progress: bool,
) -> Result<CreateReport> {
    let uploads = collect_uploads(paths, &service.config().ingest)?;
    if uploads.is_empty() {
        return Err(Error::Validation(
            "no PDF files found in the given paths".to_string(),
        ));
    }

    info!("Creating conversation '{}' with {} files", title, uploads.len());
    let created = service.create_conversation(user_id, title, uploads).await?;
    let conversation_id = created.conversation.id.clone();

    let bars = if show_progress {
        let documents = service.list_documents(user_id, &conversation_id).await?;
        progress_bars(&documents)
    } else {
        HashMap::new()
    };

    wait_for_tickets(service, user_id, &conversation_id, created.tickets, &bars).await?;

    let details = service.conversation_details(user_id, &conversation_id).await?;
    for doc in &details.documents {
        if let Some(bar) = bars.get(&doc.id) {
            finish_bar(bar, doc);
        }
    }

    Ok(CreateReport {
        conversation: details.conversation,
        documents: details.documents,
    })
}

async fn wait_for_tickets(
    service: &ChatService,
    user_id: &str,
    conversation_id: &str,
    tickets: Vec<IngestTicket>,
    bars: &HashMap<String, ProgressBar>,
) -> Result<()> {
    while !tickets.iter().all(|t| t.handle.is_finished()) {
        if !bars.is_empty() {
            for doc in service.list_documents(user_id, conversation_id).await? {
                if let Some(bar) = bars.get(&doc.id) {
                    bar.set_position(doc.progress.clamp(0, 100) as u64);
                }
            }
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    let (ids, handles): (Vec<String>, Vec<_>) = tickets
        .into_iter()
        .map(|t| (t.document_id, t.handle))
        .unzip();

    for (document_id, outcome) in ids.iter().zip(join_all(handles).await) {
        match outcome {
            Ok(DocumentOutcome::Completed { chunks, .. }) => {
                debug!(document_id = %document_id, chunks, "Worker finished");
            }
            Ok(DocumentOutcome::Failed { reason }) => {
                debug!(document_id = %document_id, reason = %reason, "Worker failed");
            }
            Err(e) => warn!(document_id = %document_id, "Worker task aborted: {}", e),
        }
    }
    Ok(())
}

fn progress_bars(documents: &[Document]) -> HashMap<String, ProgressBar> {
    documents
        .iter()
        .map(|doc| {
            let bar = document_bar(&doc.filename);
            bar.enable_steady_tick(Duration::from_millis(120));
            (doc.id.clone(), bar)
        })
        .collect()
}

fn finish_bar(bar: &ProgressBar, doc: &Document) {
    match doc.status {
        DocumentStatus::Completed => {
            bar.set_position(100);
            bar.finish_with_message(format!("✓ {} chunks", doc.chunk_count.unwrap_or(0)));
        }
        _ => bar.abandon_with_message("✗ failed"),
    }
}

/// Print the outcome of `create`
pub fn print_create(report: &CreateReport) {
    let conv = &report.conversation;
    println!("\n💬 Conversation '{}'", conv.title);
    println!("  ID: {}", conv.id);
    println!("  Status: {}", conv.status);
    println!("  Collection: {}", conv.collection_name);

    for doc in &report.documents {
        match doc.status {
            DocumentStatus::Completed => println!(
                "  ✓ {} ({} chunks)",
                doc.filename,
                doc.chunk_count.unwrap_or(0)
            ),
            _ => println!(
                "  ✗ {}: {}",
                doc.filename,
                doc.error_message.as_deref().unwrap_or("not processed")
            ),
        }
    }

    if let Some(reason) = &conv.error_message {
        println!("\n  Error: {}", reason);
    }
    if conv.is_ready() {
        println!("\nAsk away: docchat ask {} \"your question\"", conv.id);
    }
}
