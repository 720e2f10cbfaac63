//! Status and list command implementations

use crate::chat::{ChatService, ConversationDetails};
use crate::error::Result;
use crate::meta::{Conversation, DocumentStatus};
use clap_complete::Shell;
use tracing::info;

/// Conversation state with per-document progress
pub async fn cmd_status(
    service: &ChatService,
    user_id: &str,
    conversation_id: &str,
) -> Result<ConversationDetails> {
    info!("Getting status of conversation {}", conversation_id);
    service.conversation_details(user_id, conversation_id).await
}

/// Live conversations of a user, newest first
pub async fn cmd_list(service: &ChatService, user_id: &str) -> Result<Vec<Conversation>> {
    info!("Listing conversations for {}", user_id);
    service.list_conversations(user_id).await
}

/// Print conversation status to console
pub fn print_status(details: &ConversationDetails) {
    let conv = &details.conversation;
    println!("\n📊 {}\n", conv.title);
    println!("ID: {}", conv.id);
    println!("Status: {}", conv.status);
    println!("Pending documents: {}", conv.pending_documents);
    println!("Collection: {}", conv.collection_name);
    println!("Messages: {}", details.message_count);
    println!("Created: {}", conv.created_at);
    if let Some(at) = &conv.last_activity_at {
        println!("Last activity: {}", at);
    }
    if let Some(reason) = &conv.error_message {
        println!("Error: {}", reason);
    }

    println!("\nDocuments:");
    for doc in &details.documents {
        let marker = match doc.status {
            DocumentStatus::Completed => "✓",
            DocumentStatus::Failed => "✗",
            _ => "…",
        };
        println!("  {} {} [{}] {}%", marker, doc.filename, doc.status, doc.progress);
        if let Some(chunks) = doc.chunk_count {
            println!("    Chunks: {}", chunks);
        }
        if let Some(reason) = &doc.error_message {
            println!("    Error: {}", reason);
        }
    }
}

/// Print conversation list to console
pub fn print_conversations(conversations: &[Conversation]) {
    println!("\n💬 Conversations\n");

    if conversations.is_empty() {
        println!("No conversations yet. Use 'docchat create' to start one.");
        return;
    }

    for conv in conversations {
        println!("• {} [{}]", conv.title, conv.status);
        println!("  ID: {}", conv.id);
        println!(
            "  Last activity: {}",
            conv.last_activity_at.as_deref().unwrap_or(&conv.created_at)
        );
        println!();
    }
}

/// Print conversation ids with titles for shell completions
pub fn print_conversation_completions(conversations: &[Conversation], shell: Shell) {
    for conv in conversations {
        let description = format!("{} ({})", conv.title, conv.status).replace('\n', " ");

        match shell {
            Shell::Zsh => println!("{}:{}", conv.id, description.replace(':', "\\:")),
            Shell::Fish => println!("{}\t{}", conv.id, description.replace('\t', " ")),
            _ => println!("{}", conv.id),
        }
    }
}
