//! Conversation service
//!
//! Wires the collaborators, ingestion, state machine and answer engine behind the
//! operations a front end needs. Every operation that names a conversation checks
//! that it exists (`NotFound`) and belongs to the caller (`Unauthorized`).

use crate::answer::{Answer, AnswerEngine, Question};
use crate::blob::{BlobStore, FsBlobStore};
use crate::collections::CollectionManager;
use crate::config::Config;
use crate::embed::{create_embedder, Embedder};
use crate::error::{Error, Result};
use crate::extract::{PdfTextExtractor, TextExtractor};
use crate::history::MessageHistoryCache;
use crate::ingest::{check_upload, IngestTicket, IngestionPipeline, Upload};
use crate::llm::{create_completion_provider, CompletionProvider};
use crate::meta::{Conversation, Document, Message, MetaDb};
use crate::state::ConversationStateMachine;
use crate::store::{create_vector_store, VectorStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// External services the core consumes
#[derive(Clone)]
pub struct Collaborators {
    pub blobs: Arc<dyn BlobStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub completion: Arc<dyn CompletionProvider>,
    pub vector_store: Arc<dyn VectorStore>,
}

impl Collaborators {
    /// Production wiring from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            blobs: Arc::new(FsBlobStore::new(&config.paths.blob_dir)),
            extractor: Arc::new(PdfTextExtractor::new()),
            embedder: create_embedder(&config.embedding)?,
            completion: create_completion_provider(&config.completion)?,
            vector_store: create_vector_store(config)?,
        })
    }
}

/// A conversation whose documents are being ingested
#[derive(Debug)]
pub struct NewConversation {
    pub conversation: Conversation,
    pub tickets: Vec<IngestTicket>,
}

/// Conversation plus its documents
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetails {
    pub conversation: Conversation,
    pub documents: Vec<Document>,
    pub message_count: i64,
}

pub struct ChatService {
    config: Config,
    db: MetaDb,
    blobs: Arc<dyn BlobStore>,
    collections: Arc<CollectionManager>,
    state: Arc<ConversationStateMachine>,
    history: Arc<MessageHistoryCache>,
    pipeline: IngestionPipeline,
    answers: AnswerEngine,
    vector_backend: &'static str,
}

impl ChatService {
    /// Open the database and connect production collaborators
    pub async fn open(config: Config) -> Result<Self> {
        let db = MetaDb::connect(&config).await?;
        let collaborators = Collaborators::from_config(&config)?;
        Ok(Self::new(config, db, collaborators))
    }

    pub fn new(config: Config, db: MetaDb, collaborators: Collaborators) -> Self {
        let vector_backend = collaborators.vector_store.backend_name();
        let collections = Arc::new(CollectionManager::new(
            &config,
            collaborators.vector_store,
        ));
        let state = Arc::new(ConversationStateMachine::new(
            db.clone(),
            config.ingest.failure_policy,
        ));
        let history = Arc::new(MessageHistoryCache::new(db.clone(), &config.history));

        let pipeline = IngestionPipeline::new(
            &config,
            db.clone(),
            Arc::clone(&collaborators.blobs),
            collaborators.extractor,
            Arc::clone(&collaborators.embedder),
            Arc::clone(&collections),
            Arc::clone(&state),
        );

        let answers = AnswerEngine::new(
            db.clone(),
            Arc::clone(&history),
            Arc::clone(&collections),
            collaborators.embedder,
            collaborators.completion,
            config.retrieval.clone(),
            config.completion.timeout(),
        );

        Self {
            config,
            db,
            blobs: collaborators.blobs,
            collections,
            state,
            history,
            pipeline,
            answers,
            vector_backend,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn vector_backend(&self) -> &'static str {
        self.vector_backend
    }

    /// Validate all uploads, create the collection, persist the conversation and
    /// start one worker per file. Nothing is created when any upload is rejected.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        title: &str,
        uploads: Vec<Upload>,
    ) -> Result<NewConversation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::Validation("title must not be blank".to_string()));
        }
        if uploads.is_empty() {
            return Err(Error::Validation(
                "a conversation needs at least one document".to_string(),
            ));
        }
        for upload in &uploads {
            check_upload(&self.config.ingest, upload)?;
        }

        let collection = self.collections.create_collection(title).await?;
        let mut conversation = Conversation::new(
            user_id.to_string(),
            title.to_string(),
            collection.name().to_string(),
            uploads.len(),
        );
        if let Err(e) = self.db.insert_conversation(&conversation).await {
            if let Err(cleanup) = self.collections.delete_collection(collection.name()).await {
                warn!(collection = %collection.name(), "Orphaned collection not removed: {}", cleanup);
            }
            return Err(e);
        }
        self.state.start_processing(&conversation.id).await?;

        info!(
            conversation_id = %conversation.id,
            collection = %collection.name(),
            files = uploads.len(),
            "Conversation created"
        );

        let mut tickets = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let filename = upload.filename.clone();
            match self.pipeline.submit(&conversation, upload).await {
                Ok(ticket) => tickets.push(ticket),
                Err(e) => {
                    warn!(conversation_id = %conversation.id, filename = %filename, "Could not schedule document: {}", e);
                    let reason = format!("{}: could not be scheduled", filename);
                    self.state
                        .on_document_failed(&conversation.id, &reason)
                        .await?;
                }
            }
        }

        if let Some(current) = self.db.get_conversation(&conversation.id).await? {
            conversation = current;
        }

        Ok(NewConversation {
            conversation,
            tickets,
        })
    }

    pub async fn get_conversation(&self, user_id: &str, conversation_id: &str) -> Result<Conversation> {
        self.owned_conversation(user_id, conversation_id).await
    }

    /// Conversation, documents with progress, and message count
    pub async fn conversation_details(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<ConversationDetails> {
        let conversation = self.owned_conversation(user_id, conversation_id).await?;
        let documents = self.db.list_documents(conversation_id).await?;
        let message_count = self.db.count_messages(conversation_id).await?;
        Ok(ConversationDetails {
            conversation,
            documents,
            message_count,
        })
    }

    pub async fn list_conversations(&self, user_id: &str) -> Result<Vec<Conversation>> {
        self.db.list_conversations(user_id).await
    }

    pub async fn list_documents(&self, user_id: &str, conversation_id: &str) -> Result<Vec<Document>> {
        self.owned_conversation(user_id, conversation_id).await?;
        self.db.list_documents(conversation_id).await
    }

    /// Message history, oldest first; `limit` keeps only the latest messages
    pub async fn history(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        self.owned_conversation(user_id, conversation_id).await?;
        let messages = match limit {
            Some(limit) => self.history.recent(conversation_id, limit).await?,
            None => self.history.all(conversation_id).await?,
        };
        Ok(messages.as_ref().clone())
    }

    pub async fn ask(&self, user_id: &str, conversation_id: &str, question: Question) -> Result<Answer> {
        self.owned_conversation(user_id, conversation_id).await?;
        self.answers.answer(conversation_id, question).await
    }

    /// Soft-delete a conversation and forget its collection handle. With `purge`
    /// the remote collection and stored blobs are removed as well.
    pub async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        purge: bool,
    ) -> Result<()> {
        let conversation = self.owned_conversation(user_id, conversation_id).await?;

        self.db.soft_delete_conversation(conversation_id).await?;
        self.collections.drop_from_cache(&conversation.collection_name);
        self.history.invalidate(conversation_id);

        if purge {
            for doc in self.db.list_documents(conversation_id).await? {
                if let Err(e) = self.blobs.delete(&doc.blob_path).await {
                    warn!(document_id = %doc.id, "Blob purge failed: {}", e);
                }
            }
            self.collections
                .delete_collection(&conversation.collection_name)
                .await?;
        }

        info!(conversation_id, purge, "Conversation deleted");
        Ok(())
    }

    async fn owned_conversation(&self, user_id: &str, conversation_id: &str) -> Result<Conversation> {
        let conversation = self
            .db
            .get_conversation(conversation_id)
            .await?
            .filter(|c| !c.is_deleted())
            .ok_or_else(|| Error::not_found("conversation", conversation_id))?;

        if conversation.user_id != user_id {
            return Err(Error::unauthorized("conversation", conversation_id));
        }
        Ok(conversation)
    }
}
