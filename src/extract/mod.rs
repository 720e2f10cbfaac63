//! Text extraction
//!
//! Turns uploaded bytes into plain text. The PDF implementation wraps
//! `pdf-extract`, which is synchronous and may panic on malformed input, so it
//! runs on the blocking pool and a panic surfaces as an unreadable-document error.

use crate::error::{Error, ExternalService, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// Trait for text extractors
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from raw document bytes
    async fn extract_text(&self, bytes: Vec<u8>) -> Result<String>;

    fn name(&self) -> &'static str;
}

/// PDF text extractor
#[derive(Debug, Default, Clone)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "pdf")]
#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_text(&self, bytes: Vec<u8>) -> Result<String> {
        let size = bytes.len();
        let raw = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|e| {
                Error::external(
                    ExternalService::TextExtractor,
                    format!("PDF parser aborted: {}", e),
                )
            })?
            .map_err(|e| {
                Error::external(ExternalService::TextExtractor, format!("unreadable PDF: {}", e))
            })?;

        let text = normalize_text(&raw);
        debug!(bytes = size, chars = text.len(), "Extracted PDF text");
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "pdf-extract"
    }
}

#[cfg(not(feature = "pdf"))]
#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract_text(&self, _bytes: Vec<u8>) -> Result<String> {
        Err(Error::Config(
            "PDF support not compiled in. Rebuild with --features pdf".to_string(),
        ))
    }

    fn name(&self) -> &'static str {
        "pdf-disabled"
    }
}

fn horizontal_space_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t\u{a0}]+").ok()).as_ref()
}

fn blank_lines_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").ok()).as_ref()
}

/// Normalize extracted text: unify line endings, turn page breaks into paragraph
/// breaks, collapse horizontal whitespace and runs of blank lines.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{c}', "\n\n");

    let collapsed = match horizontal_space_re() {
        Some(re) => re.replace_all(&unified, " ").into_owned(),
        None => unified,
    };

    let trimmed_lines = collapsed
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");

    let paragraphs = match blank_lines_re() {
        Some(re) => re.replace_all(&trimmed_lines, "\n\n").into_owned(),
        None => trimmed_lines,
    };

    paragraphs.trim().to_string()
}

/// Whether extracted text contains anything worth embedding
pub fn has_usable_text(text: &str) -> bool {
    text.chars().any(char::is_alphanumeric)
}
