//! Conversation history storage.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::proto::ContextMessage;

/// Host-owned conversation history, keyed by chat.
///
/// Agents never write here directly; they emit memory entries and the
/// host appends them.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Full history for `chat_id`, oldest first.
    async fn history(&self, chat_id: i64) -> Result<Vec<ContextMessage>>;

    /// Appends one entry to the end of the chat's history.
    async fn persist(&self, chat_id: i64, message: ContextMessage) -> Result<()>;
}

/// In-memory [`ContextStore`] with an optional per-chat cap.
#[derive(Default)]
pub struct MemoryContextStore {
    chats: RwLock<HashMap<i64, Vec<ContextMessage>>>,
    max_messages: Option<usize>,
}

impl MemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only the newest `max` entries per chat (builder pattern).
    pub fn with_limit(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }

    /// Number of chats with at least one stored entry.
    pub async fn chat_count(&self) -> usize {
        self.chats.read().await.len()
    }
}

#[async_trait]
impl ContextStore for MemoryContextStore {
    async fn history(&self, chat_id: i64) -> Result<Vec<ContextMessage>> {
        Ok(self
            .chats
            .read()
            .await
            .get(&chat_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn persist(&self, chat_id: i64, message: ContextMessage) -> Result<()> {
        let mut chats = self.chats.write().await;
        let history = chats.entry(chat_id).or_default();
        history.push(message);
        if let Some(max) = self.max_messages {
            if history.len() > max {
                let excess = history.len() - max;
                history.drain(..excess);
            }
        }
        Ok(())
    }
}
