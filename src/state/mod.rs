//! Conversation lifecycle
//!
//! `CREATING -> PROCESSING -> READY | FAILED`, driven by one terminal event per
//! document. The transition rules live on [`ConversationAggregate`], a plain value
//! with no I/O. [`ConversationStateMachine`] loads the aggregate, applies one event
//! and writes it back while holding a lock, so two workers finishing at the same
//! moment cannot both read the same pending counter.

use crate::config::FailurePolicy;
use crate::error::{Error, Result};
use crate::meta::{Conversation, ConversationStatus, DocumentStatus, MetaDb};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// What an event did to the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The event was ignored (conversation already terminal)
    Ignored,
    /// CREATING moved to PROCESSING
    Started,
    /// Pending counter went down, status unchanged
    Decremented,
    BecameReady,
    BecameFailed,
}

/// Lifecycle fields of a conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationAggregate {
    pub status: ConversationStatus,
    pub pending: i64,
    pub error_message: Option<String>,
    /// At least one document finished successfully
    pub any_completed: bool,
    policy: FailurePolicy,
}

impl ConversationAggregate {
    pub fn new(file_count: usize, policy: FailurePolicy) -> Self {
        Self {
            status: ConversationStatus::Creating,
            pending: file_count as i64,
            error_message: None,
            any_completed: false,
            policy,
        }
    }

    fn from_row(conv: &Conversation, any_completed: bool, policy: FailurePolicy) -> Self {
        Self {
            status: conv.status,
            pending: conv.pending_documents,
            error_message: conv.error_message.clone(),
            any_completed,
            policy,
        }
    }

    /// Ingestion has started
    pub fn start_processing(&mut self) -> Transition {
        if self.status != ConversationStatus::Creating {
            return Transition::Ignored;
        }
        self.status = ConversationStatus::Processing;
        Transition::Started
    }

    /// A document reached COMPLETED
    pub fn try_complete(&mut self) -> Transition {
        if self.status != ConversationStatus::Processing {
            return Transition::Ignored;
        }
        self.any_completed = true;
        self.decrement();
        self.settle_if_drained()
    }

    /// A document reached FAILED
    pub fn try_fail(&mut self, reason: &str) -> Transition {
        if self.status != ConversationStatus::Processing {
            return Transition::Ignored;
        }
        self.decrement();

        match self.policy {
            FailurePolicy::Strict => {
                self.status = ConversationStatus::Failed;
                self.error_message = Some(reason.to_string());
                Transition::BecameFailed
            }
            FailurePolicy::Partial => {
                self.error_message = Some(match self.error_message.take() {
                    Some(prev) => format!("{}; {}", prev, reason),
                    None => reason.to_string(),
                });
                self.settle_if_drained()
            }
        }
    }

    fn decrement(&mut self) {
        self.pending = (self.pending - 1).max(0);
    }

    fn settle_if_drained(&mut self) -> Transition {
        if self.pending > 0 {
            return Transition::Decremented;
        }
        if self.any_completed {
            self.status = ConversationStatus::Ready;
            Transition::BecameReady
        } else {
            self.status = ConversationStatus::Failed;
            if self.error_message.is_none() {
                self.error_message = Some("no document could be processed".to_string());
            }
            Transition::BecameFailed
        }
    }
}

/// Applies document terminal events to persisted conversations
pub struct ConversationStateMachine {
    db: MetaDb,
    policy: FailurePolicy,
    lock: Mutex<()>,
}

impl ConversationStateMachine {
    pub fn new(db: MetaDb, policy: FailurePolicy) -> Self {
        Self {
            db,
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub async fn start_processing(&self, conversation_id: &str) -> Result<Transition> {
        self.apply(conversation_id, |agg| agg.start_processing()).await
    }

    pub async fn on_document_completed(&self, conversation_id: &str) -> Result<Transition> {
        let transition = self.apply(conversation_id, |agg| agg.try_complete()).await?;
        if transition == Transition::BecameReady {
            info!(conversation_id, "Conversation ready");
        }
        Ok(transition)
    }

    pub async fn on_document_failed(&self, conversation_id: &str, reason: &str) -> Result<Transition> {
        let transition = self.apply(conversation_id, |agg| agg.try_fail(reason)).await?;
        match transition {
            Transition::BecameFailed => warn!(conversation_id, reason, "Conversation failed"),
            Transition::BecameReady => {
                info!(conversation_id, "Conversation ready with failed documents")
            }
            _ => {}
        }
        Ok(transition)
    }

    async fn apply<F>(&self, conversation_id: &str, event: F) -> Result<Transition>
    where
        F: FnOnce(&mut ConversationAggregate) -> Transition,
    {
        let _guard = self.lock.lock().await;

        let conv = self
            .db
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| Error::not_found("conversation", conversation_id))?;

        let any_completed = self
            .db
            .list_documents(conversation_id)
            .await?
            .iter()
            .any(|d| d.status == DocumentStatus::Completed);

        let mut aggregate = ConversationAggregate::from_row(&conv, any_completed, self.policy);
        let transition = event(&mut aggregate);

        if transition != Transition::Ignored {
            self.db
                .update_conversation_state(
                    conversation_id,
                    aggregate.status,
                    aggregate.pending,
                    aggregate.error_message.as_deref(),
                )
                .await?;
        }

        debug!(
            conversation_id,
            ?transition,
            status = %aggregate.status,
            pending = aggregate.pending,
            "Applied conversation event"
        );
        Ok(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Document;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn processing(files: usize, policy: FailurePolicy) -> ConversationAggregate {
        let mut agg = ConversationAggregate::new(files, policy);
        agg.start_processing();
        agg
    }

    #[test]
    fn test_all_completions_reach_ready() {
        let mut agg = processing(3, FailurePolicy::Strict);
        assert_eq!(agg.try_complete(), Transition::Decremented);
        assert_eq!(agg.try_complete(), Transition::Decremented);
        assert_eq!(agg.try_complete(), Transition::BecameReady);
        assert_eq!(agg.pending, 0);
        assert_eq!(agg.status, ConversationStatus::Ready);
        assert!(agg.error_message.is_none());
    }

    #[test]
    fn test_events_before_processing_are_ignored() {
        let mut agg = ConversationAggregate::new(1, FailurePolicy::Strict);
        assert_eq!(agg.try_complete(), Transition::Ignored);
        assert_eq!(agg.pending, 1);
        assert_eq!(agg.status, ConversationStatus::Creating);
    }

    #[test]
    fn test_any_failure_fails_strict_conversation() {
        // Every ordering of 4 events containing at least one failure
        for mask in 0u32..16 {
            let mut agg = processing(4, FailurePolicy::Strict);
            let mut saw_failure = false;
            for i in 0..4 {
                if mask & (1 << i) != 0 {
                    saw_failure = true;
                    agg.try_fail("bad pdf");
                } else {
                    agg.try_complete();
                }
                assert!(agg.pending >= 0);
            }

            if saw_failure {
                assert_eq!(agg.status, ConversationStatus::Failed, "mask {mask:04b}");
                assert_eq!(agg.error_message.as_deref(), Some("bad pdf"));
            } else {
                assert_eq!(agg.status, ConversationStatus::Ready);
                assert_eq!(agg.pending, 0);
            }
        }
    }

    #[test]
    fn test_failed_is_sticky() {
        let mut agg = processing(2, FailurePolicy::Strict);
        agg.try_fail("first");
        assert_eq!(agg.try_complete(), Transition::Ignored);
        assert_eq!(agg.try_fail("second"), Transition::Ignored);
        assert_eq!(agg.status, ConversationStatus::Failed);
        assert_eq!(agg.error_message.as_deref(), Some("first"));
    }

    #[test]
    fn test_pending_never_negative() {
        let mut agg = processing(1, FailurePolicy::Partial);
        agg.pending = 0;
        agg.status = ConversationStatus::Processing;
        agg.try_complete();
        assert_eq!(agg.pending, 0);
    }

    #[test]
    fn test_partial_policy_keeps_successful_documents() {
        let mut agg = processing(3, FailurePolicy::Partial);
        assert_eq!(agg.try_fail("a.pdf: unreadable"), Transition::Decremented);
        assert_eq!(agg.status, ConversationStatus::Processing);
        agg.try_complete();
        assert_eq!(agg.try_fail("c.pdf: empty"), Transition::BecameReady);

        assert_eq!(agg.status, ConversationStatus::Ready);
        assert_eq!(
            agg.error_message.as_deref(),
            Some("a.pdf: unreadable; c.pdf: empty")
        );
    }

    #[test]
    fn test_partial_policy_fails_when_nothing_succeeds() {
        let mut agg = processing(2, FailurePolicy::Partial);
        agg.try_fail("one");
        assert_eq!(agg.try_fail("two"), Transition::BecameFailed);
        assert_eq!(agg.status, ConversationStatus::Failed);
    }

    async fn setup(files: usize, policy: FailurePolicy) -> (Arc<ConversationStateMachine>, MetaDb, String, TempDir) {
        let tmp = TempDir::new().unwrap();
        let db = MetaDb::new(&tmp.path().join("state.db")).await.unwrap();
        let conv = Conversation::new(
            "alice".to_string(),
            "Reports".to_string(),
            "chat_reports_1".to_string(),
            files,
        );
        db.insert_conversation(&conv).await.unwrap();
        let machine = Arc::new(ConversationStateMachine::new(db.clone(), policy));
        (machine, db, conv.id, tmp)
    }

    #[tokio::test]
    async fn test_concurrent_completions_transition_once() {
        let (machine, db, conv_id, _tmp) = setup(8, FailurePolicy::Strict).await;
        machine.start_processing(&conv_id).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let machine = Arc::clone(&machine);
            let id = conv_id.clone();
            tasks.push(tokio::spawn(async move {
                machine.on_document_completed(&id).await.unwrap()
            }));
        }

        let mut ready = 0;
        for task in tasks {
            if task.await.unwrap() == Transition::BecameReady {
                ready += 1;
            }
        }
        assert_eq!(ready, 1);

        let conv = db.get_conversation(&conv_id).await.unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Ready);
        assert_eq!(conv.pending_documents, 0);
    }

    #[tokio::test]
    async fn test_persisted_failure_records_reason() {
        let (machine, db, conv_id, _tmp) = setup(2, FailurePolicy::Strict).await;
        machine.start_processing(&conv_id).await.unwrap();
        machine
            .on_document_failed(&conv_id, "scan.pdf: no extractable text")
            .await
            .unwrap();
        machine.on_document_completed(&conv_id).await.unwrap();

        let conv = db.get_conversation(&conv_id).await.unwrap().unwrap();
        assert_eq!(conv.status, ConversationStatus::Failed);
        assert_eq!(
            conv.error_message.as_deref(),
            Some("scan.pdf: no extractable text")
        );
    }

    #[tokio::test]
    async fn test_partial_mode_reads_completed_documents() {
        let (machine, db, conv_id, _tmp) = setup(2, FailurePolicy::Partial).await;
        machine.start_processing(&conv_id).await.unwrap();

        let doc = Document::new(
            "d1".to_string(),
            conv_id.clone(),
            "a.pdf".to_string(),
            "users/alice/a.pdf".to_string(),
            "hash".to_string(),
            10,
        );
        db.insert_document(&doc).await.unwrap();
        db.complete_document("d1", 100, 1).await.unwrap();
        machine.on_document_completed(&conv_id).await.unwrap();

        let transition = machine.on_document_failed(&conv_id, "b.pdf: bad").await.unwrap();
        assert_eq!(transition, Transition::BecameReady);
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let (machine, _db, _id, _tmp) = setup(1, FailurePolicy::Strict).await;
        let err = machine.on_document_completed("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
