use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::models::{Message, MessageStatus};

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn create(&self, recipient: String, content: String) -> anyhow::Result<Message>;

    /// Pending messages, oldest `created_at` first.
    async fn fetch_pending(&self, limit: u32) -> anyhow::Result<Vec<Message>>;

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()>;

    /// Sent messages, most recent `sent_at` first.
    async fn fetch_sent(&self, offset: u64, limit: u32) -> anyhow::Result<Vec<Message>>;

    async fn count_sent(&self) -> anyhow::Result<u64>;

    async fn ping(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait MessageCache: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<()>;

    async fn ping(&self) -> anyhow::Result<()>;
}
