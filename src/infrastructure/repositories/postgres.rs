use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, Pool, Postgres};
use uuid::Uuid;

use crate::domain::{
    errors::DomainError,
    models::{Message, MessageStatus, MessageStatusKind},
    repositories::MessageRepository,
};

pub type PgPool = Pool<Postgres>;

#[derive(Clone)]
pub struct PostgresMessageRepository {
    pool: PgPool,
}

impl PostgresMessageRepository {
    pub fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageRepository for PostgresMessageRepository {
    async fn create(&self, recipient: String, content: String) -> anyhow::Result<Message> {
        let message = Message::new(recipient, content);
        sqlx::query(
            r#"
            INSERT INTO messages (id, recipient, content, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(message.id)
        .bind(&message.recipient)
        .bind(&message.content)
        .bind(MessageStatusKind::Pending.as_str())
        .bind(message.created_at)
        .bind(message.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(message)
    }

    async fn fetch_pending(&self, limit: u32) -> anyhow::Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, recipient, content, status, external_id, error, created_at, sent_at, updated_at
            FROM messages
            WHERE status = $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(MessageStatusKind::Pending.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        records
            .into_iter()
            .map(|record| Message::try_from(record).map_err(anyhow::Error::from))
            .collect()
    }

    async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()> {
        let (external_id, error, sent_at) = match &status {
            MessageStatus::Pending => (None, None, None),
            MessageStatus::Sent {
                external_id,
                sent_at,
            } => (Some(external_id.clone()), None, Some(*sent_at)),
            MessageStatus::Failed { reason } => (None, Some(reason.clone()), None),
        };

        sqlx::query(
            r#"
            UPDATE messages
            SET status = $2,
                external_id = $3,
                error = $4,
                sent_at = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .bind(status.kind().as_str())
        .bind(external_id)
        .bind(error)
        .bind(sent_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_sent(&self, offset: u64, limit: u32) -> anyhow::Result<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            r#"
            SELECT id, recipient, content, status, external_id, error, created_at, sent_at, updated_at
            FROM messages
            WHERE status = $1
            ORDER BY sent_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(MessageStatusKind::Sent.as_str())
        .bind(i64::from(limit))
        .bind(i64::try_from(offset)?)
        .fetch_all(&self.pool)
        .await?;

        records
            .into_iter()
            .map(|record| Message::try_from(record).map_err(anyhow::Error::from))
            .collect()
    }

    async fn count_sent(&self) -> anyhow::Result<u64> {
        let count: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM messages WHERE status = $1"#)
            .bind(MessageStatusKind::Sent.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count)?)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: Uuid,
    recipient: String,
    content: String,
    status: String,
    external_id: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = DomainError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let status = match value.status.parse::<MessageStatusKind>()? {
            MessageStatusKind::Pending => MessageStatus::Pending,
            MessageStatusKind::Sent => MessageStatus::Sent {
                external_id: value.external_id.ok_or_else(|| {
                    DomainError::Validation(format!("sent message {} has no external id", value.id))
                })?,
                sent_at: value.sent_at.ok_or_else(|| {
                    DomainError::Validation(format!("sent message {} has no sent_at", value.id))
                })?,
            },
            MessageStatusKind::Failed => MessageStatus::Failed {
                reason: value.error.unwrap_or_else(|| "unknown error".to_string()),
            },
        };

        Ok(Self {
            id: value.id,
            recipient: value.recipient,
            content: value.content,
            status,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}
