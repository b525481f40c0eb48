use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{
    models::{Message, MessageStatus},
    repositories::MessageRepository,
};

/// Message store kept in process memory, in insertion order.
#[derive(Default)]
pub struct InMemoryMessageRepository {
    messages: Arc<RwLock<Vec<Message>>>,
    unavailable: AtomicBool,
}

impl InMemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail as if the database were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn get(&self, message_id: Uuid) -> Option<Message> {
        let messages = self.messages.read().await;
        messages.iter().find(|m| m.id == message_id).cloned()
    }

    fn ensure_available(&self) -> anyhow::Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            anyhow::bail!("message store is unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for InMemoryMessageRepository {
    async fn create(&self, recipient: String, content: String) -> anyhow::Result<Message> {
        self.ensure_available()?;
        let message = Message::new(recipient, content);
        let mut messages = self.messages.write().await;
        messages.push(message.clone());
        Ok(message)
    }

    async fn fetch_pending(&self, limit: u32) -> anyhow::Result<Vec<Message>> {
        self.ensure_available()?;
        let messages = self.messages.read().await;
        let mut pending: Vec<Message> = messages
            .iter()
            .filter(|m| m.status == MessageStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|m| m.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()> {
        self.ensure_available()?;
        let mut messages = self.messages.write().await;
        if let Some(entry) = messages.iter_mut().find(|m| m.id == message_id) {
            entry.status = status;
            entry.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fetch_sent(&self, offset: u64, limit: u32) -> anyhow::Result<Vec<Message>> {
        self.ensure_available()?;
        let messages = self.messages.read().await;
        let mut sent: Vec<Message> = messages
            .iter()
            .filter(|m| m.sent_at().is_some())
            .cloned()
            .collect();
        sent.sort_by(|a, b| b.sent_at().cmp(&a.sent_at()));
        Ok(sent
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(limit as usize)
            .collect())
    }

    async fn count_sent(&self) -> anyhow::Result<u64> {
        self.ensure_available()?;
        let messages = self.messages.read().await;
        Ok(messages.iter().filter(|m| m.sent_at().is_some()).count() as u64)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        self.ensure_available()
    }
}
