use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainError;

/// Delivery state of a message.
///
/// `Pending` is the only non-terminal state. The terminal variants carry the
/// data that only exists for them, so a sent message always has an external id
/// and a send time, and a failed one always has a reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageStatus {
    Pending,
    Sent {
        external_id: String,
        sent_at: DateTime<Utc>,
    },
    Failed {
        reason: String,
    },
}

impl MessageStatus {
    pub fn kind(&self) -> MessageStatusKind {
        match self {
            MessageStatus::Pending => MessageStatusKind::Pending,
            MessageStatus::Sent { .. } => MessageStatusKind::Sent,
            MessageStatus::Failed { .. } => MessageStatusKind::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Pending)
    }
}

/// Storage-level discriminant of [`MessageStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatusKind {
    Pending,
    Sent,
    Failed,
}

impl MessageStatusKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatusKind::Pending => "pending",
            MessageStatusKind::Sent => "sent",
            MessageStatusKind::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageStatusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatusKind {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(MessageStatusKind::Pending),
            "sent" => Ok(MessageStatusKind::Sent),
            "failed" => Ok(MessageStatusKind::Failed),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub recipient: String,
    pub content: String,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn new(recipient: impl Into<String>, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.into(),
            content: content.into(),
            status: MessageStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn external_id(&self) -> Option<&str> {
        match &self.status {
            MessageStatus::Sent { external_id, .. } => Some(external_id),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.status {
            MessageStatus::Failed { reason } => Some(reason),
            _ => None,
        }
    }

    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        match &self.status {
            MessageStatus::Sent { sent_at, .. } => Some(*sent_at),
            _ => None,
        }
    }
}
