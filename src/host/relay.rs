//! Outbound delivery to the messaging platform.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::proto::TelegramMessage;

/// Delivers agent messages to the platform, in the order given.
#[async_trait]
pub trait MessageRelay: Send + Sync {
    async fn relay(&self, chat_id: i64, message: TelegramMessage) -> Result<()>;
}

/// [`MessageRelay`] that keeps every delivered message in memory.
#[derive(Default)]
pub struct RecordingRelay {
    sent: Mutex<Vec<(i64, TelegramMessage)>>,
}

impl RecordingRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<(i64, TelegramMessage)> {
        self.sent.lock().await.clone()
    }

    /// Delivered messages for one chat, oldest first.
    pub async fn sent_to(&self, chat_id: i64) -> Vec<TelegramMessage> {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|(id, _)| *id == chat_id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl MessageRelay for RecordingRelay {
    async fn relay(&self, chat_id: i64, message: TelegramMessage) -> Result<()> {
        self.sent.lock().await.push((chat_id, message));
        Ok(())
    }
}
