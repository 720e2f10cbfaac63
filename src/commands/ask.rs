//! Ask, history and delete command implementations

use crate::answer::{Answer, Question};
use crate::chat::ChatService;
use crate::error::Result;
use crate::meta::{Message, MessageRole};
use serde::Serialize;
use tracing::info;

/// Options for asking a question
#[derive(Debug, Clone, Default)]
pub struct AskOptions {
    pub context_size: Option<usize>,
    pub document_ids: Vec<String>,
}

/// Ask a question about a ready conversation
pub async fn cmd_ask(
    service: &ChatService,
    user_id: &str,
    conversation_id: &str,
    question: &str,
    options: AskOptions,
) -> Result<Answer> {
    info!("Asking conversation {}", conversation_id);
    service
        .ask(
            user_id,
            conversation_id,
            Question {
                text: question.to_string(),
                context_size: options.context_size,
                document_ids: options.document_ids,
            },
        )
        .await
}

pub async fn cmd_history(
    service: &ChatService,
    user_id: &str,
    conversation_id: &str,
    limit: Option<usize>,
) -> Result<Vec<Message>> {
    service.history(user_id, conversation_id, limit).await
}

/// Result of `delete`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteReport {
    pub conversation_id: String,
    pub purged: bool,
}

pub async fn cmd_delete(
    service: &ChatService,
    user_id: &str,
    conversation_id: &str,
    purge: bool,
) -> Result<DeleteReport> {
    service
        .delete_conversation(user_id, conversation_id, purge)
        .await?;
    Ok(DeleteReport {
        conversation_id: conversation_id.to_string(),
        purged: purge,
    })
}

/// Print an answer with its sources
pub fn print_answer(answer: &Answer) {
    println!("\n{}\n", answer.answer);

    if answer.is_fallback() {
        if !answer.suggestions.is_empty() {
            println!("Suggestions:");
            for suggestion in &answer.suggestions {
                println!("  • {}", suggestion);
            }
        }
        return;
    }

    println!("Sources (confidence {:.0}%):", answer.confidence * 100.0);
    for (i, source) in answer.sources.iter().enumerate() {
        let marker = if source.is_primary { "★" } else { " " };
        println!(
            "{} [{}] {} (section {}, score {:.3})",
            marker,
            i + 1,
            source.document_name,
            source.chunk_index + 1,
            source.score
        );
        println!("      {}", source.excerpt);
    }

    if let Some(tokens) = answer.tokens_used {
        println!("\n{} tokens, {} ms", tokens, answer.latency_ms);
    }
}

/// Print message history, oldest first
pub fn print_history(messages: &[Message]) {
    if messages.is_empty() {
        println!("No messages yet.");
        return;
    }

    for msg in messages {
        let who = match msg.role {
            MessageRole::User => "You",
            MessageRole::Assistant => "Assistant",
            MessageRole::System => "System",
        };
        println!("[{}] {}:", msg.created_at, who);
        println!("{}", msg.content);

        let sources = msg.sources();
        if !sources.is_empty() {
            let names: Vec<&str> = sources.iter().map(|s| s.document_name.as_str()).collect();
            println!("  (sources: {})", names.join(", "));
        }
        println!();
    }
}

pub fn print_delete(report: &DeleteReport) {
    if report.purged {
        println!(
            "✓ Conversation '{}' deleted and its vectors and files purged",
            report.conversation_id
        );
    } else {
        println!("✓ Conversation '{}' deleted", report.conversation_id);
    }
}
