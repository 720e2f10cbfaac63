//! docchat: chat with your PDF documents
//!
//! Each conversation owns a dedicated vector collection. Uploaded PDFs are
//! processed by background workers (blob store, text extraction, chunking,
//! embedding, vector upsert) while a synchronized state machine tracks when the
//! conversation becomes ready. Questions are answered from the top matching
//! chunks with source citations, or with a fixed fallback when nothing matches.

pub mod answer;
pub mod blob;
pub mod chat;
pub mod chunk;
pub mod collections;
pub mod commands;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod history;
pub mod ingest;
pub mod llm;
pub mod meta;
pub mod progress;
pub mod state;
pub mod store;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
