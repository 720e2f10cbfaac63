//! Prompt assembly for grounded answers

use crate::llm::ChatMessage;
use crate::meta::{Message, MessageRole};
use crate::store::SearchResult;

/// Returned verbatim when no chunk clears the score floor
pub const FALLBACK_ANSWER: &str = "I could not find relevant information in the uploaded documents to answer this question.";

const SYSTEM_PROMPT: &str = r#"You are an assistant that answers questions about a set of uploaded documents.

RULES:
1. Use ONLY the information in the DOCUMENT EXCERPTS supplied with the question
2. If the excerpts do not contain the answer, say plainly that the documents do not cover it
3. Do not use outside knowledge and do not guess
4. Answer in the same language as the question
5. When you use an excerpt, name its source document, e.g. (source: report.pdf)"#;

/// Prompt builder for retrieval-augmented answers
pub struct PromptBuilder;

impl PromptBuilder {
    pub fn system_prompt() -> &'static str {
        SYSTEM_PROMPT
    }

    /// Number each excerpt and label it with its document
    pub fn build_context(results: &[SearchResult]) -> String {
        let mut context = String::new();

        for (i, result) in results.iter().enumerate() {
            context.push_str(&format!(
                "[{}] Source: {} (section {})\n{}\n\n---\n\n",
                i + 1,
                result.payload.doc_name,
                result.payload.chunk_index + 1,
                result.payload.text.trim()
            ));
        }

        context
    }

    /// Prior turns in chronological order, then one user turn carrying the excerpts and question
    pub fn build_messages(
        history: &[Message],
        results: &[SearchResult],
        question: &str,
    ) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = history
            .iter()
            .filter(|m| m.role != MessageRole::System)
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content.clone(),
            })
            .collect();

        messages.push(ChatMessage::user(format!(
            "DOCUMENT EXCERPTS:\n\n{context}QUESTION: {question}",
            context = Self::build_context(results),
            question = question.trim()
        )));

        messages
    }

    /// Rephrasing hints returned with the fallback answer
    pub fn suggestions(question: &str, document_names: &[String]) -> Vec<String> {
        let mut suggestions = vec![
            "Rephrase the question using terms that appear in the documents".to_string(),
            "Ask about one specific fact, figure or section at a time".to_string(),
        ];

        if question.split_whitespace().count() <= 3 {
            suggestions.push("Add more detail to the question".to_string());
        }

        if !document_names.is_empty() {
            suggestions.push(format!(
                "Ask about topics covered in: {}",
                document_names.join(", ")
            ));
        }

        suggestions
    }
}

/// Rough token count for providers that do not report usage
pub fn estimate_tokens(texts: &[&str]) -> i64 {
    let chars: usize = texts.iter().map(|t| t.chars().count()).sum();
    chars.div_ceil(4) as i64
}
