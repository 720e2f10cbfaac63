//! Read-through cache over conversation message history

use crate::config::HistoryConfig;
use crate::error::Result;
use crate::meta::{Message, MetaDb};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::trace;

/// Caches full histories per conversation and recent windows per
/// (conversation, limit). Writers must call [`invalidate`](Self::invalidate)
/// after persisting messages.
pub struct MessageHistoryCache {
    db: MetaDb,
    enabled: bool,
    full: DashMap<String, Arc<Vec<Message>>>,
    windows: DashMap<(String, usize), Arc<Vec<Message>>>,
}

impl MessageHistoryCache {
    pub fn new(db: MetaDb, config: &HistoryConfig) -> Self {
        Self {
            db,
            enabled: config.enabled,
            full: DashMap::new(),
            windows: DashMap::new(),
        }
    }

    /// The last `limit` messages, oldest first
    pub async fn recent(&self, conversation_id: &str, limit: usize) -> Result<Arc<Vec<Message>>> {
        if limit == 0 {
            return Ok(Arc::new(Vec::new()));
        }

        let key = (conversation_id.to_string(), limit);
        if let Some(hit) = self.windows.get(&key) {
            trace!(conversation_id, limit, "History window cache hit");
            return Ok(Arc::clone(hit.value()));
        }

        let messages = Arc::new(self.db.recent_messages(conversation_id, limit).await?);
        if self.enabled {
            self.windows.insert(key, Arc::clone(&messages));
        }
        Ok(messages)
    }

    /// Entire history, oldest first
    pub async fn all(&self, conversation_id: &str) -> Result<Arc<Vec<Message>>> {
        if let Some(hit) = self.full.get(conversation_id) {
            trace!(conversation_id, "History cache hit");
            return Ok(Arc::clone(hit.value()));
        }

        let messages = Arc::new(self.db.list_messages(conversation_id).await?);
        if self.enabled {
            self.full
                .insert(conversation_id.to_string(), Arc::clone(&messages));
        }
        Ok(messages)
    }

    /// Drop every cached view of a conversation
    pub fn invalidate(&self, conversation_id: &str) {
        self.full.remove(conversation_id);
        self.windows.retain(|(conv, _), _| conv != conversation_id);
    }

    pub fn is_cached(&self, conversation_id: &str) -> bool {
        self.full.contains_key(conversation_id)
            || self.windows.iter().any(|e| e.key().0 == conversation_id)
    }
}
