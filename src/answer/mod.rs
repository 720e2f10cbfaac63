//! Retrieval and answer synthesis
//!
//! A question runs strictly in sequence: persist it, read recent context, embed,
//! search the conversation's collection, then either return the fixed fallback
//! (nothing cleared the score floor, no completion call) or ask the completion
//! provider once and persist the grounded answer with its citations.

mod prompt;

pub use prompt::*;

use crate::collections::CollectionManager;
use crate::config::RetrievalConfig;
use crate::embed::{embed_query, Embedder};
use crate::error::{Error, ExternalService, Result};
use crate::history::MessageHistoryCache;
use crate::llm::CompletionProvider;
use crate::meta::{Conversation, DocumentStatus, Message, MessageRole, MetaDb, SourceCitation};
use crate::store::{SearchFilter, SearchResult};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of one question
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceCitation>,
    pub confidence: f64,
    pub message_id: String,
    pub question_message_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub suggestions: Vec<String>,
    pub tokens_used: Option<i64>,
    pub latency_ms: i64,
}

impl Answer {
    pub fn is_fallback(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Parameters for [`AnswerEngine::answer`]
#[derive(Debug, Clone, Default)]
pub struct Question {
    pub text: String,
    /// Number of prior messages to include; defaults and clamps per config
    pub context_size: Option<usize>,
    /// Restrict retrieval to these documents of the conversation
    pub document_ids: Vec<String>,
}

impl Question {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

pub struct AnswerEngine {
    db: MetaDb,
    history: Arc<MessageHistoryCache>,
    collections: Arc<CollectionManager>,
    embedder: Arc<dyn Embedder>,
    completion: Arc<dyn CompletionProvider>,
    retrieval: RetrievalConfig,
    completion_timeout: Duration,
}

impl AnswerEngine {
    pub fn new(
        db: MetaDb,
        history: Arc<MessageHistoryCache>,
        collections: Arc<CollectionManager>,
        embedder: Arc<dyn Embedder>,
        completion: Arc<dyn CompletionProvider>,
        retrieval: RetrievalConfig,
        completion_timeout: Duration,
    ) -> Self {
        Self {
            db,
            history,
            collections,
            embedder,
            completion,
            retrieval,
            completion_timeout,
        }
    }

    /// Answer a question about a ready conversation
    pub async fn answer(&self, conversation_id: &str, question: Question) -> Result<Answer> {
        let start = Instant::now();

        let conversation = self
            .db
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", conversation_id))?;
        let conversation = &conversation;

        if conversation.is_deleted() {
            return Err(Error::not_found("conversation", &conversation.id));
        }
        if !conversation.is_ready() {
            return Err(Error::InvalidState {
                status: conversation.status.to_string(),
                message: format!(
                    "conversation '{}' is not ready for questions",
                    conversation.title
                ),
            });
        }

        let text = self.validate_question(&question.text)?;
        let context_size = self.context_size(question.context_size);
        let filter = self
            .document_filter(&conversation.id, question.document_ids)
            .await?;

        let question_msg = Message::new(conversation.id.clone(), MessageRole::User, text.clone());
        self.db.insert_message(&question_msg).await?;
        self.history.invalidate(&conversation.id);

        let result = self
            .respond(conversation, &question_msg, context_size, filter.as_ref(), start)
            .await;

        // The question stays persisted even when answering failed
        self.history.invalidate(&conversation.id);
        if let Err(e) = &result {
            warn!(conversation_id = %conversation.id, "Answer failed: {}", e);
        }
        result
    }

    async fn respond(
        &self,
        conversation: &Conversation,
        question: &Message,
        context_size: usize,
        filter: Option<&SearchFilter>,
        start: Instant,
    ) -> Result<Answer> {
        let context: Vec<Message> = self
            .history
            .recent(&conversation.id, context_size + 1)
            .await?
            .iter()
            .filter(|m| m.id != question.id)
            .cloned()
            .collect();
        let context = tail(context, context_size);

        let query_vector = embed_query(self.embedder.as_ref(), &question.content).await?;
        let collection = self.collections.get_handle(&conversation.collection_name).await?;
        let results = collection
            .search(
                query_vector,
                self.retrieval.top_k,
                self.retrieval.min_score,
                filter,
            )
            .await?;

        debug!(
            conversation_id = %conversation.id,
            matches = results.len(),
            context = context.len(),
            "Retrieved chunks"
        );

        if results.is_empty() {
            return self.fallback(conversation, question, start).await;
        }

        let messages = PromptBuilder::build_messages(&context, &results, &question.content);
        let system_prompt = PromptBuilder::system_prompt();

        let completion = tokio::time::timeout(
            self.completion_timeout,
            self.completion.complete(system_prompt, &messages),
        )
        .await
        .map_err(|_| {
            Error::external(
                ExternalService::Completion,
                format!("no response within {:?}", self.completion_timeout),
            )
        })??;

        let confidence = confidence(&results);
        let sources = self.citations(&results);
        let tokens_used = match completion.tokens_used {
            Some(tokens) => tokens as i64,
            None => {
                let mut texts: Vec<&str> = vec![system_prompt, &completion.text];
                texts.extend(messages.iter().map(|m| m.content.as_str()));
                estimate_tokens(&texts)
            }
        };
        let latency_ms = start.elapsed().as_millis() as i64;

        let mut reply = Message::new(
            conversation.id.clone(),
            MessageRole::Assistant,
            completion.text,
        )
        .with_sources(&sources);
        reply.confidence = Some(confidence);
        reply.tokens_used = Some(tokens_used);
        reply.latency_ms = Some(latency_ms);
        reply.parent_id = Some(question.id.clone());

        self.db.insert_message(&reply).await?;
        self.db.touch_conversation(&conversation.id).await?;

        info!(
            conversation_id = %conversation.id,
            sources = sources.len(),
            confidence,
            latency_ms,
            model = self.completion.model_name(),
            "Answered question"
        );

        Ok(Answer {
            answer: reply.content,
            sources,
            confidence,
            message_id: reply.id,
            question_message_id: question.id.clone(),
            suggestions: Vec::new(),
            tokens_used: Some(tokens_used),
            latency_ms,
        })
    }

    /// Persist and return the fixed "nothing found" answer
    async fn fallback(
        &self,
        conversation: &Conversation,
        question: &Message,
        start: Instant,
    ) -> Result<Answer> {
        let names: Vec<String> = self
            .db
            .list_documents(&conversation.id)
            .await?
            .into_iter()
            .filter(|d| d.status == DocumentStatus::Completed)
            .map(|d| d.filename)
            .collect();
        let suggestions = PromptBuilder::suggestions(&question.content, &names);
        let latency_ms = start.elapsed().as_millis() as i64;

        let mut reply = Message::new(
            conversation.id.clone(),
            MessageRole::Assistant,
            FALLBACK_ANSWER.to_string(),
        );
        reply.confidence = Some(0.0);
        reply.tokens_used = Some(0);
        reply.latency_ms = Some(latency_ms);
        reply.parent_id = Some(question.id.clone());

        self.db.insert_message(&reply).await?;
        self.db.touch_conversation(&conversation.id).await?;

        info!(conversation_id = %conversation.id, "No chunk above score floor, returned fallback");

        Ok(Answer {
            answer: reply.content,
            sources: Vec::new(),
            confidence: 0.0,
            message_id: reply.id,
            question_message_id: question.id.clone(),
            suggestions,
            tokens_used: Some(0),
            latency_ms,
        })
    }

    fn validate_question(&self, text: &str) -> Result<String> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::Validation("question must not be blank".to_string()));
        }
        let chars = trimmed.chars().count();
        if chars > self.retrieval.max_question_chars {
            return Err(Error::Validation(format!(
                "question is {} characters, the limit is {}",
                chars, self.retrieval.max_question_chars
            )));
        }
        Ok(trimmed.to_string())
    }

    fn context_size(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.retrieval.default_context_size)
            .min(self.retrieval.max_context_size)
    }

    /// Every requested document must belong to the conversation
    async fn document_filter(
        &self,
        conversation_id: &str,
        document_ids: Vec<String>,
    ) -> Result<Option<SearchFilter>> {
        for id in &document_ids {
            match self.db.get_document(id).await? {
                Some(doc) if doc.conversation_id == conversation_id => {}
                _ => return Err(Error::not_found("document", id)),
            }
        }
        Ok(SearchFilter::documents(document_ids))
    }

    fn citations(&self, results: &[SearchResult]) -> Vec<SourceCitation> {
        results
            .iter()
            .enumerate()
            .map(|(i, r)| SourceCitation {
                document_id: r.payload.doc_id.clone(),
                document_name: r.payload.doc_name.clone(),
                chunk_index: r.payload.chunk_index,
                excerpt: excerpt(&r.payload.text, self.retrieval.excerpt_chars),
                score: r.score,
                is_primary: i == 0,
            })
            .collect()
    }
}

/// Mean similarity of the matches, clamped to [0, 1]; 0 with no matches
pub fn confidence(results: &[SearchResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let sum: f64 = results.iter().map(|r| r.score as f64).sum();
    (sum / results.len() as f64).clamp(0.0, 1.0)
}

/// Leading `max_chars` characters on a word boundary, with an ellipsis when cut
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.chars().count() <= max_chars {
        return normalized;
    }

    let cut: String = normalized.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(' ') {
        Some(idx) if idx > max_chars / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}…", trimmed.trim_end())
}

fn tail<T>(mut items: Vec<T>, n: usize) -> Vec<T> {
    if items.len() > n {
        items.drain(..items.len() - n);
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChunkPayload;

    fn scored(score: f32) -> SearchResult {
        SearchResult {
            id: "p".into(),
            score,
            payload: ChunkPayload::default(),
        }
    }

    #[test]
    fn test_confidence_is_mean_score() {
        let results = vec![scored(0.9), scored(0.7), scored(0.5)];
        assert!((confidence(&results) - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_confidence_bounds() {
        assert_eq!(confidence(&[]), 0.0);
        assert_eq!(confidence(&[scored(1.4)]), 1.0);
        assert_eq!(confidence(&[scored(-0.2)]), 0.0);
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short   text\nhere", 50), "short text here");

        let long = "alpha beta gamma delta epsilon zeta eta theta";
        let cut = excerpt(long, 20);
        assert_eq!(cut, "alpha beta gamma…");
        assert!(cut.chars().count() <= 21);
    }

    #[test]
    fn test_tail_keeps_latest() {
        assert_eq!(tail(vec![1, 2, 3, 4], 2), vec![3, 4]);
        assert_eq!(tail(vec![1], 5), vec![1]);
        assert!(tail(vec![1, 2], 0).is_empty());
    }
}
