//! Text chunking
//!
//! Splits extracted document text into overlapping windows for embedding:
//! - windows end at the nearest preceding sentence or paragraph break when one
//!   falls in the back half of the window, otherwise at a hard cut
//! - consecutive windows share exactly `overlap_chars` bytes
//! - output depends only on the input text and configuration
//!
//! Window and overlap sizes are measured in UTF-8 bytes of the text, with cuts
//! moved back to the nearest character boundary.

mod boundaries;

pub use boundaries::*;

use crate::config::ChunkConfig;
use blake3::Hasher;

/// A text chunk with its position in the source text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chunk text (a verbatim slice of the source)
    pub text: String,

    /// Byte offset of the first character in the source text
    pub byte_start: usize,

    /// Byte offset one past the last character
    pub byte_end: usize,

    /// Chunk index (0-based)
    pub index: usize,

    /// Blake3 hash of the document hash and chunk text
    pub hash: String,
}

impl TextChunk {
    /// Compute the hash for this chunk
    pub fn compute_hash(text: &str, doc_hash: &str) -> String {
        let mut hasher = Hasher::new();
        hasher.update(doc_hash.as_bytes());
        hasher.update(text.as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Sentence-aware sliding-window chunker
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    pub fn new(config: &ChunkConfig) -> Self {
        Self::with_sizes(config.max_chars, config.overlap_chars)
    }

    /// Sizes are clamped so every window advances: `max >= 1`, `overlap < max`
    pub fn with_sizes(max_chars: usize, overlap_chars: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap_chars: overlap_chars.min(max_chars - 1),
        }
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Split `text` into chunks. Whitespace-only windows are skipped.
    pub fn chunk(&self, text: &str, doc_hash: &str) -> Vec<TextChunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let len = text.len();
        let break_points = find_break_points(text);
        // A sentence break must leave the window at least half full and past the
        // overlap, otherwise the next window would not move forward
        let min_fill = (self.max_chars / 2).max(self.overlap_chars + 1);

        let mut chunks = Vec::new();
        let mut start = 0;

        loop {
            let mut hard_end = floor_char_boundary(text, start + self.max_chars);
            if hard_end <= start {
                hard_end = ceil_char_boundary(text, start + 1);
            }

            let end = if hard_end >= len {
                len
            } else {
                nearest_break_before(&break_points, start + min_fill, hard_end).unwrap_or(hard_end)
            };

            let slice = &text[start..end];
            if !slice.trim().is_empty() {
                chunks.push(TextChunk {
                    text: slice.to_string(),
                    byte_start: start,
                    byte_end: end,
                    index: chunks.len(),
                    hash: TextChunk::compute_hash(slice, doc_hash),
                });
            }

            if end >= len {
                break;
            }

            let next = floor_char_boundary(text, end.saturating_sub(self.overlap_chars));
            start = if next > start { next } else { end };
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentences(n: usize) -> String {
        (0..n)
            .map(|i| format!("Sentence number {} talks about topic {}.", i, i % 7))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunker = Chunker::with_sizes(1000, 200);
        let chunks = chunker.chunk("Short document.", "doc");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Short document.");
        assert_eq!(chunks[0].byte_start, 0);
        assert_eq!(chunks[0].byte_end, 15);
    }

    #[test]
    fn test_empty_and_blank_text() {
        let chunker = Chunker::with_sizes(100, 20);
        assert!(chunker.chunk("", "doc").is_empty());
        assert!(chunker.chunk("  \n\t ", "doc").is_empty());
    }

    #[test]
    fn test_chunks_cover_text_with_fixed_overlap() {
        let text = sentences(120);
        let chunker = Chunker::with_sizes(500, 100);
        let chunks = chunker.chunk(&text, "doc");

        assert!(chunks.len() > 3);
        assert_eq!(chunks[0].byte_start, 0);
        assert_eq!(chunks.last().unwrap().byte_end, text.len());

        for pair in chunks.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            assert_eq!(prev.byte_end - next.byte_start, 100);
            assert!(next.byte_start > prev.byte_start);
        }

        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
            assert!(!chunk.text.trim().is_empty());
            assert!(chunk.text.len() <= 500);
            assert_eq!(&text[chunk.byte_start..chunk.byte_end], chunk.text);
        }

        // Dropping each overlap and concatenating gives back the source
        let mut rebuilt = chunks[0].text.clone();
        for pair in chunks.windows(2) {
            rebuilt.push_str(&text[pair[0].byte_end..pair[1].byte_end]);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_prefers_sentence_boundaries() {
        let text = sentences(40);
        let chunker = Chunker::with_sizes(300, 60);
        let chunks = chunker.chunk(&text, "doc");

        for chunk in &chunks[..chunks.len() - 1] {
            assert!(
                chunk.text.ends_with(". "),
                "chunk should end at a sentence: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn test_hard_cut_without_terminators() {
        let text = "x".repeat(250);
        let chunker = Chunker::with_sizes(100, 20);
        let chunks = chunker.chunk(&text, "doc");

        assert_eq!(chunks[0].byte_end, 100);
        assert_eq!(chunks[1].byte_start, 80);
        assert_eq!(chunks.last().unwrap().byte_end, 250);
    }

    #[test]
    fn test_deterministic() {
        let text = sentences(60);
        let chunker = Chunker::with_sizes(400, 120);
        assert_eq!(chunker.chunk(&text, "h"), chunker.chunk(&text, "h"));
    }

    #[test]
    fn test_multibyte_text_stays_on_char_boundaries() {
        let text = "Ünïcödé tëxt wïth äccents. ".repeat(40);
        let chunker = Chunker::with_sizes(97, 31);
        let chunks = chunker.chunk(&text, "doc");

        assert!(chunks.len() > 1);
        assert_eq!(chunks.last().unwrap().byte_end, text.len());
        for chunk in &chunks {
            // Limits count bytes, so a window holds fewer than 97 accented characters
            assert!(chunk.byte_end - chunk.byte_start <= 97);
            assert_eq!(chunk.text.len(), chunk.byte_end - chunk.byte_start);
            assert!(chunk.text.chars().count() < 97);
        }
    }

    #[test]
    fn test_overlap_clamped_below_max() {
        let chunker = Chunker::with_sizes(10, 50);
        assert_eq!(chunker.overlap_chars(), 9);
        let chunks = chunker.chunk(&"y".repeat(40), "doc");
        assert_eq!(chunks.last().unwrap().byte_end, 40);
    }

    #[test]
    fn test_hash_depends_on_document() {
        let a = TextChunk::compute_hash("same text", "doc-a");
        let b = TextChunk::compute_hash("same text", "doc-b");
        assert_ne!(a, b);
        assert_eq!(a, TextChunk::compute_hash("same text", "doc-a"));
    }
}
