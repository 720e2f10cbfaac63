//! Metadata storage using SQLite
//!
//! This module handles all relational state:
//! - Conversations (status, pending document counter, owning collection)
//! - Documents (uploaded files and their processing progress)
//! - Messages (append-only question/answer history)

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Conversation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ConversationStatus {
    Creating,
    Processing,
    Ready,
    Failed,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Creating => "creating",
            ConversationStatus::Processing => "processing",
            ConversationStatus::Ready => "ready",
            ConversationStatus::Failed => "failed",
        }
    }

    /// Ready and failed do not change during ingestion
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversationStatus::Ready | ConversationStatus::Failed)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "creating" => Ok(ConversationStatus::Creating),
            "processing" => Ok(ConversationStatus::Processing),
            "ready" => Ok(ConversationStatus::Ready),
            "failed" => Ok(ConversationStatus::Failed),
            _ => Err(Error::Validation(format!(
                "Unknown conversation status: {}",
                s
            ))),
        }
    }
}

/// Document processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Processing => "processing",
            DocumentStatus::Completed => "completed",
            DocumentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Completed | DocumentStatus::Failed)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A conversation (chat) over a set of uploaded documents
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub status: ConversationStatus,
    pub collection_name: String,
    pub pending_documents: i64,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub last_activity_at: Option<String>,
    pub deleted_at: Option<String>,
}

impl Conversation {
    pub fn new(user_id: String, title: String, collection_name: String, file_count: usize) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            title,
            status: ConversationStatus::Creating,
            collection_name,
            pending_documents: file_count as i64,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
            last_activity_at: None,
            deleted_at: None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Questions may only be asked of a live, fully ingested conversation
    pub fn is_ready(&self) -> bool {
        self.status == ConversationStatus::Ready && !self.is_deleted()
    }
}

/// An uploaded document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub conversation_id: String,
    pub filename: String,
    pub blob_path: String,
    pub content_hash: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub progress: i64,
    pub char_count: Option<i64>,
    pub chunk_count: Option<i64>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Document {
    pub fn new(
        id: String,
        conversation_id: String,
        filename: String,
        blob_path: String,
        content_hash: String,
        size_bytes: u64,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id,
            conversation_id,
            filename,
            blob_path,
            content_hash,
            content_type: None,
            size_bytes: size_bytes as i64,
            status: DocumentStatus::Pending,
            progress: 0,
            char_count: None,
            chunk_count: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

/// A document passage cited by an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCitation {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: i64,
    pub excerpt: String,
    pub score: f32,
    pub is_primary: bool,
}

/// A single message in a conversation
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub sources_json: Option<String>,
    pub confidence: Option<f64>,
    pub tokens_used: Option<i64>,
    pub latency_ms: Option<i64>,
    pub parent_id: Option<String>,
    pub created_at: String,
}

impl Message {
    pub fn new(conversation_id: String, role: MessageRole, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id,
            role,
            content,
            sources_json: None,
            confidence: None,
            tokens_used: None,
            latency_ms: None,
            parent_id: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_sources(mut self, sources: &[SourceCitation]) -> Self {
        self.sources_json = serde_json::to_string(sources).ok();
        self
    }

    pub fn sources(&self) -> Vec<SourceCitation> {
        self.sources_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database configured for this installation
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::new(&config.paths.db_file).await
    }

    /// Open (creating if needed) a database file and apply the schema
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Close the pool; later queries fail
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        debug!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    // ===== Conversation Operations =====

    pub async fn insert_conversation(&self, conv: &Conversation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversations (id, user_id, title, status, collection_name, pending_documents,
                error_message, created_at, updated_at, last_activity_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&conv.id)
        .bind(&conv.user_id)
        .bind(&conv.title)
        .bind(conv.status)
        .bind(&conv.collection_name)
        .bind(conv.pending_documents)
        .bind(&conv.error_message)
        .bind(&conv.created_at)
        .bind(&conv.updated_at)
        .bind(&conv.last_activity_at)
        .bind(&conv.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get conversation by ID (soft-deleted rows included)
    pub async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conv = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(conv)
    }

    /// List a user's live conversations, newest first
    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        let convs = sqlx::query_as::<_, Conversation>(
            "SELECT * FROM conversations WHERE user_id = ? AND deleted_at IS NULL ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(convs)
    }

    /// Persist the lifecycle fields of a conversation
    pub async fn update_conversation_state(
        &self,
        id: &str,
        status: ConversationStatus,
        pending_documents: i64,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET status = ?, pending_documents = ?, error_message = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(status)
        .bind(pending_documents)
        .bind(error_message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_conversation(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE conversations SET last_activity_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn soft_delete_conversation(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query("UPDATE conversations SET deleted_at = ?, updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        info!(conversation_id = %id, "Conversation soft-deleted");
        Ok(())
    }

    // ===== Document Operations =====

    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, conversation_id, filename, blob_path, content_hash, content_type,
                size_bytes, status, progress, char_count, chunk_count, error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.conversation_id)
        .bind(&doc.filename)
        .bind(&doc.blob_path)
        .bind(&doc.content_hash)
        .bind(&doc.content_type)
        .bind(doc.size_bytes)
        .bind(doc.status)
        .bind(doc.progress)
        .bind(doc.char_count)
        .bind(doc.chunk_count)
        .bind(&doc.error_message)
        .bind(&doc.created_at)
        .bind(&doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    pub async fn list_documents(&self, conversation_id: &str) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE conversation_id = ? ORDER BY created_at, rowid",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    /// Count other documents in the conversation with the same content
    pub async fn count_duplicates(
        &self,
        conversation_id: &str,
        content_hash: &str,
        exclude_id: &str,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM documents WHERE conversation_id = ? AND content_hash = ? AND id != ?",
        )
        .bind(conversation_id)
        .bind(content_hash)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn mark_document_processing(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
            .bind(DocumentStatus::Processing)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .bind(DocumentStatus::Pending)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Raise processing progress; never lowers it
    pub async fn update_document_progress(&self, id: &str, progress: u8) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET progress = MAX(progress, ?), updated_at = ? WHERE id = ?",
        )
        .bind(progress.min(100) as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_document_chunk_count(&self, id: &str, chunk_count: usize) -> Result<()> {
        sqlx::query("UPDATE documents SET chunk_count = ?, updated_at = ? WHERE id = ?")
            .bind(chunk_count as i64)
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn complete_document(
        &self,
        id: &str,
        char_count: usize,
        chunk_count: usize,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE documents
            SET status = ?, progress = 100, char_count = ?, chunk_count = ?, error_message = NULL, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(DocumentStatus::Completed)
        .bind(char_count as i64)
        .bind(chunk_count as i64)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail_document(&self, id: &str, reason: &str) -> Result<()> {
        sqlx::query(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(DocumentStatus::Failed)
        .bind(reason)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ===== Message Operations =====

    pub async fn insert_message(&self, msg: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO messages (id, conversation_id, role, content, sources_json, confidence,
                tokens_used, latency_ms, parent_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&msg.id)
        .bind(&msg.conversation_id)
        .bind(msg.role)
        .bind(&msg.content)
        .bind(&msg.sources_json)
        .bind(msg.confidence)
        .bind(msg.tokens_used)
        .bind(msg.latency_ms)
        .bind(&msg.parent_id)
        .bind(&msg.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Full history, oldest first
    pub async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let msgs = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY rowid",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(msgs)
    }

    /// The last `limit` messages, oldest first
    pub async fn recent_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let mut msgs = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE conversation_id = ? ORDER BY rowid DESC LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        msgs.reverse();
        Ok(msgs)
    }

    pub async fn count_messages(&self, conversation_id: &str) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup_test_db() -> (MetaDb, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("test.db")).await.unwrap();
        (db, tmp)
    }

    fn conversation() -> Conversation {
        Conversation::new(
            "alice".to_string(),
            "Quarterly reports".to_string(),
            format!("chat_quarterly_reports_{}", Uuid::new_v4().simple()),
            2,
        )
    }

    #[tokio::test]
    async fn test_conversation_crud() {
        let (db, _tmp) = setup_test_db().await;
        let conv = conversation();
        db.insert_conversation(&conv).await.unwrap();

        let loaded = db.get_conversation(&conv.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ConversationStatus::Creating);
        assert_eq!(loaded.pending_documents, 2);
        assert!(!loaded.is_ready());

        db.update_conversation_state(&conv.id, ConversationStatus::Ready, 0, None)
            .await
            .unwrap();
        let loaded = db.get_conversation(&conv.id).await.unwrap().unwrap();
        assert!(loaded.is_ready());

        db.soft_delete_conversation(&conv.id).await.unwrap();
        let loaded = db.get_conversation(&conv.id).await.unwrap().unwrap();
        assert!(!loaded.is_ready());
        assert!(db.list_conversations("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_document_progress_is_monotonic() {
        let (db, _tmp) = setup_test_db().await;
        let conv = conversation();
        db.insert_conversation(&conv).await.unwrap();

        let doc = Document::new(
            Uuid::new_v4().to_string(),
            conv.id.clone(),
            "report.pdf".to_string(),
            "users/alice/report.pdf".to_string(),
            "abc".to_string(),
            1024,
        );
        db.insert_document(&doc).await.unwrap();
        db.mark_document_processing(&doc.id).await.unwrap();

        db.update_document_progress(&doc.id, 40).await.unwrap();
        db.update_document_progress(&doc.id, 20).await.unwrap();

        let loaded = db.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Processing);
        assert_eq!(loaded.progress, 40);

        db.complete_document(&doc.id, 5000, 7).await.unwrap();
        let loaded = db.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, DocumentStatus::Completed);
        assert_eq!(loaded.progress, 100);
        assert_eq!(loaded.chunk_count, Some(7));
    }

    #[tokio::test]
    async fn test_duplicate_count() {
        let (db, _tmp) = setup_test_db().await;
        let conv = conversation();
        db.insert_conversation(&conv).await.unwrap();

        for _ in 0..2 {
            let doc = Document::new(
                Uuid::new_v4().to_string(),
                conv.id.clone(),
                "same.pdf".to_string(),
                "p".to_string(),
                "hash-1".to_string(),
                10,
            );
            db.insert_document(&doc).await.unwrap();
        }

        assert_eq!(db.count_duplicates(&conv.id, "hash-1", "none").await.unwrap(), 2);
        assert_eq!(db.count_duplicates(&conv.id, "hash-2", "none").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recent_messages_oldest_first() {
        let (db, _tmp) = setup_test_db().await;
        let conv = conversation();
        db.insert_conversation(&conv).await.unwrap();

        for i in 0..5 {
            let msg = Message::new(conv.id.clone(), MessageRole::User, format!("q{}", i));
            db.insert_message(&msg).await.unwrap();
        }

        let recent = db.recent_messages(&conv.id, 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "q3", "q4"]);
        assert_eq!(db.count_messages(&conv.id).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_message_sources_roundtrip_through_db() {
        let (db, _tmp) = setup_test_db().await;
        let conv = conversation();
        db.insert_conversation(&conv).await.unwrap();

        let citation = SourceCitation {
            document_id: "d1".to_string(),
            document_name: "report.pdf".to_string(),
            chunk_index: 3,
            excerpt: "Revenue grew".to_string(),
            score: 0.82,
            is_primary: true,
        };
        let msg = Message::new(conv.id.clone(), MessageRole::Assistant, "answer".to_string())
            .with_sources(std::slice::from_ref(&citation));
        db.insert_message(&msg).await.unwrap();

        let stored = db.list_messages(&conv.id).await.unwrap();
        assert_eq!(stored[0].role, MessageRole::Assistant);
        assert_eq!(stored[0].sources(), vec![citation]);
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!(
            "READY".parse::<ConversationStatus>().unwrap(),
            ConversationStatus::Ready
        );
        assert!("done".parse::<ConversationStatus>().is_err());
        assert!(ConversationStatus::Failed.is_terminal());
        assert!(!DocumentStatus::Processing.is_terminal());
    }
}
