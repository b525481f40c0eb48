use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::application::services::webhook::{
    DeliveryError, WebhookClient, WebhookReceipt, WebhookRequest,
};

pub const AUTH_HEADER: &str = "x-auth-key";

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: String,
    pub auth_key: String,
    pub timeout: Duration,
}

pub struct HttpWebhookClient {
    http: Client,
    config: WebhookConfig,
}

impl HttpWebhookClient {
    pub fn new(config: WebhookConfig) -> anyhow::Result<Arc<Self>> {
        let http = Client::builder()
            .user_agent("courier/webhook")
            .timeout(config.timeout)
            .build()?;
        Ok(Arc::new(Self { http, config }))
    }
}

#[async_trait]
impl WebhookClient for HttpWebhookClient {
    async fn send(&self, request: &WebhookRequest) -> Result<WebhookReceipt, DeliveryError> {
        let response = self
            .http
            .post(&self.config.url)
            .header(AUTH_HEADER, &self.config.auth_key)
            .json(request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    DeliveryError::Timeout(self.config.timeout)
                } else {
                    DeliveryError::Transport(err.to_string())
                }
            })?;

        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            return Err(DeliveryError::UnexpectedStatus(status.as_u16()));
        }

        // The delivery already happened; an unreadable body only loses the id.
        let message_id = match response.bytes().await {
            Ok(body) => serde_json::from_slice::<WebhookResponse>(&body)
                .ok()
                .and_then(|payload| payload.message_id),
            Err(_) => None,
        };

        Ok(WebhookReceipt {
            status_code: status.as_u16(),
            message_id,
        })
    }
}

#[derive(Debug, Deserialize)]
struct WebhookResponse {
    #[serde(rename = "messageId")]
    message_id: Option<String>,
}
