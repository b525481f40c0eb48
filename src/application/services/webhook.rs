use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Payload posted to the delivery webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookRequest {
    pub to: String,
    pub content: String,
}

/// Accepted delivery. `message_id` is whatever the remote side reported, if
/// the body could be read at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookReceipt {
    pub status_code: u16,
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    #[error("failed to send request: {0}")]
    Transport(String),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected status code: {0}")]
    UnexpectedStatus(u16),
}

#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookReceipt, DeliveryError>;
}
