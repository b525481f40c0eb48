use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    application::services::{
        circuit_breaker::{BreakerError, CircuitBreaker, CircuitBreakerSnapshot},
        scheduler::ScheduledTask,
        webhook::{WebhookClient, WebhookRequest},
    },
    domain::{
        models::{Message, MessageStatus},
        repositories::{MessageCache, MessageRepository},
    },
};

/// How long a delivered external id stays resolvable in the cache.
pub const EXTERNAL_ID_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub batch_size: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub fetched: usize,
    pub sent: usize,
    pub failed: usize,
}

enum Outcome {
    Sent,
    Failed,
    Interrupted,
}

/// One tick of the outbound pipeline: fetch a batch of pending messages,
/// deliver each through the circuit breaker and persist the result.
pub struct MessageDispatchHandler {
    message_repo: Arc<dyn MessageRepository>,
    cache: Arc<dyn MessageCache>,
    webhook: Arc<dyn WebhookClient>,
    breaker: Arc<CircuitBreaker>,
    config: DispatcherConfig,
}

impl MessageDispatchHandler {
    pub fn new(
        message_repo: Arc<dyn MessageRepository>,
        cache: Arc<dyn MessageCache>,
        webhook: Arc<dyn WebhookClient>,
        breaker: Arc<CircuitBreaker>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            message_repo,
            cache,
            webhook,
            breaker,
            config,
        }
    }

    /// Only a failure to fetch the batch is returned as an error; every
    /// per-message failure ends up in that message's `Failed` status.
    pub async fn send_pending_messages(
        &self,
        cancel: &CancellationToken,
    ) -> anyhow::Result<DispatchSummary> {
        info!("Starting to send pending messages");

        let messages = self
            .message_repo
            .fetch_pending(self.config.batch_size)
            .await
            .context("failed to get unsent messages")?;

        let mut summary = DispatchSummary {
            fetched: messages.len(),
            ..Default::default()
        };

        if messages.is_empty() {
            info!("No pending messages to send");
            return Ok(summary);
        }

        info!(count = messages.len(), "Found pending messages");

        for message in &messages {
            match self.send_message(message, cancel).await {
                Outcome::Sent => summary.sent += 1,
                Outcome::Failed => summary.failed += 1,
                Outcome::Interrupted => {
                    // left pending, the next tick picks it up again
                    info!(message_id = %message.id, "Dispatch interrupted by cancellation");
                    break;
                }
            }
        }

        Ok(summary)
    }

    pub fn circuit_breaker_status(&self) -> CircuitBreakerSnapshot {
        self.breaker.snapshot()
    }

    async fn send_message(&self, message: &Message, cancel: &CancellationToken) -> Outcome {
        let request = WebhookRequest {
            to: message.recipient.clone(),
            content: message.content.clone(),
        };

        let result = self
            .breaker
            .execute(cancel, || self.webhook.send(&request))
            .await;

        match result {
            Ok(receipt) => {
                let external_id = receipt
                    .message_id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| placeholder_external_id(message.id));
                match self.mark_sent(message, &external_id).await {
                    Ok(()) => {
                        let state = self.breaker.state();
                        info!(
                            message_id = %message.id,
                            external_message_id = %external_id,
                            status_code = receipt.status_code,
                            circuit_breaker_state = %state,
                            "Message sent successfully"
                        );
                        Outcome::Sent
                    }
                    Err(err) => {
                        // delivered but unrecorded; Failed keeps it out of the next batch
                        self.mark_failed(message, format!("{err:#}")).await;
                        Outcome::Failed
                    }
                }
            }
            Err(BreakerError::Cancelled) => Outcome::Interrupted,
            Err(err) => {
                self.mark_failed(message, err.to_string()).await;
                Outcome::Failed
            }
        }
    }

    async fn mark_sent(&self, message: &Message, external_id: &str) -> anyhow::Result<()> {
        let status = MessageStatus::Sent {
            external_id: external_id.to_string(),
            sent_at: Utc::now(),
        };
        self.message_repo
            .update_status(message.id, status)
            .await
            .context("failed to update message status")?;

        let cache_key = format!("message:{external_id}");
        let cache_value = format!("{}:{}", message.id, Utc::now().to_rfc3339());
        if let Err(err) = self
            .cache
            .set(&cache_key, &cache_value, EXTERNAL_ID_TTL)
            .await
        {
            warn!(
                external_message_id = %external_id,
                error = %err,
                "Failed to cache message ID"
            );
        }

        Ok(())
    }

    async fn mark_failed(&self, message: &Message, reason: String) {
        let state = self.breaker.state();
        let counts = self.breaker.counts();
        error!(
            message_id = %message.id,
            error = %reason,
            circuit_breaker_state = %state,
            total_requests = counts.requests,
            total_failures = counts.total_failures,
            "Failed to send message"
        );

        let status = MessageStatus::Failed { reason };
        if let Err(err) = self.message_repo.update_status(message.id, status).await {
            error!(
                message_id = %message.id,
                error = %err,
                "Failed to update message status"
            );
        }
    }
}

#[async_trait]
impl ScheduledTask for MessageDispatchHandler {
    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        let summary = self.send_pending_messages(&cancel).await?;
        if summary.fetched > 0 {
            info!(
                fetched = summary.fetched,
                sent = summary.sent,
                failed = summary.failed,
                "Dispatch tick finished"
            );
        }
        Ok(())
    }
}

/// Stand-in id for a delivery the webhook accepted without telling us its id.
fn placeholder_external_id(message_id: Uuid) -> String {
    format!("temp-{}-{}", message_id, Utc::now().timestamp())
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::Mutex,
        sync::atomic::{AtomicU32, Ordering},
    };

    use super::*;
    use crate::{
        application::services::{
            circuit_breaker::{CircuitBreakerConfig, CircuitState},
            webhook::{DeliveryError, WebhookReceipt},
        },
        infrastructure::{
            cache::in_memory::InMemoryMessageCache,
            repositories::in_memory::InMemoryMessageRepository,
        },
    };

    type Reply = Result<WebhookReceipt, DeliveryError>;

    /// Replays queued replies, then falls back to a fixed one.
    struct ScriptedWebhook {
        replies: Mutex<VecDeque<Reply>>,
        fallback: Reply,
        calls: AtomicU32,
        recipients: Mutex<Vec<String>>,
    }

    impl ScriptedWebhook {
        fn new(replies: Vec<Reply>, fallback: Reply) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback,
                calls: AtomicU32::new(0),
                recipients: Mutex::new(Vec::new()),
            })
        }

        fn accepting() -> Arc<Self> {
            Self::new(Vec::new(), Ok(receipt(None)))
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WebhookClient for ScriptedWebhook {
        async fn send(&self, request: &WebhookRequest) -> Result<WebhookReceipt, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.recipients.lock().unwrap().push(request.to.clone());
            let next = self.replies.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        }
    }

    fn receipt(message_id: Option<&str>) -> WebhookReceipt {
        WebhookReceipt {
            status_code: 202,
            message_id: message_id.map(str::to_string),
        }
    }

    struct Fixture {
        repo: Arc<InMemoryMessageRepository>,
        cache: Arc<InMemoryMessageCache>,
        breaker: Arc<CircuitBreaker>,
        dispatcher: MessageDispatchHandler,
    }

    fn fixture(webhook: Arc<ScriptedWebhook>, batch_size: u32, min_requests: u32) -> Fixture {
        let repo = Arc::new(InMemoryMessageRepository::new());
        let cache = Arc::new(InMemoryMessageCache::new());
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig {
            min_requests,
            failure_ratio: 0.5,
            ..Default::default()
        }));
        let dispatcher = MessageDispatchHandler::new(
            repo.clone(),
            cache.clone(),
            webhook,
            breaker.clone(),
            DispatcherConfig { batch_size },
        );
        Fixture {
            repo,
            cache,
            breaker,
            dispatcher,
        }
    }

    async fn seed(repo: &InMemoryMessageRepository, count: usize) -> Vec<Message> {
        let mut messages = Vec::new();
        for i in 0..count {
            let message = repo
                .create(format!("+90555000000{i}"), format!("message {i}"))
                .await
                .unwrap();
            messages.push(message);
        }
        messages
    }

    fn assert_outcome_invariant(message: &Message) {
        if message.status.is_terminal() {
            assert!(message.external_id().is_some() ^ message.error().is_some());
        }
        assert_eq!(
            message.sent_at().is_some(),
            matches!(message.status, MessageStatus::Sent { .. })
        );
    }

    #[tokio::test]
    async fn delivers_batch_and_caches_external_ids() {
        let webhook = ScriptedWebhook::new(
            vec![Ok(receipt(Some("ext-1"))), Ok(receipt(Some("ext-2")))],
            Ok(receipt(None)),
        );
        let fx = fixture(webhook.clone(), 10, 5);
        let seeded = seed(&fx.repo, 2).await;

        let summary = fx
            .dispatcher
            .send_pending_messages(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            summary,
            DispatchSummary {
                fetched: 2,
                sent: 2,
                failed: 0
            }
        );
        let first = fx.repo.get(seeded[0].id).await.unwrap();
        let second = fx.repo.get(seeded[1].id).await.unwrap();
        assert_eq!(first.external_id(), Some("ext-1"));
        assert_eq!(second.external_id(), Some("ext-2"));
        assert!(first.sent_at().is_some() && second.sent_at().is_some());
        assert_outcome_invariant(&first);
        assert_outcome_invariant(&second);

        assert_eq!(fx.cache.writes(), 2);
        let cached = fx.cache.get("message:ext-1").await.unwrap();
        assert!(cached.starts_with(&format!("{}:", seeded[0].id)));
    }

    #[tokio::test]
    async fn synthesizes_external_id_when_response_has_none() {
        let webhook = ScriptedWebhook::new(vec![Ok(receipt(Some("  ")))], Ok(receipt(None)));
        let fx = fixture(webhook, 10, 5);
        let seeded = seed(&fx.repo, 2).await;

        fx.dispatcher
            .send_pending_messages(&CancellationToken::new())
            .await
            .unwrap();

        for message in &seeded {
            let stored = fx.repo.get(message.id).await.unwrap();
            let external_id = stored.external_id().unwrap();
            assert!(external_id.starts_with(&format!("temp-{}-", message.id)));
            assert_outcome_invariant(&stored);
        }
    }

    #[tokio::test]
    async fn open_breaker_fails_rest_of_batch_without_calling_webhook() {
        let webhook = ScriptedWebhook::new(Vec::new(), Err(DeliveryError::UnexpectedStatus(500)));
        let fx = fixture(webhook.clone(), 5, 2);
        let seeded = seed(&fx.repo, 5).await;

        let summary = fx
            .dispatcher
            .send_pending_messages(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.failed, 5);
        assert_eq!(webhook.calls(), 2);
        assert_eq!(fx.breaker.state(), CircuitState::Open);

        let first = fx.repo.get(seeded[0].id).await.unwrap();
        assert_eq!(first.error(), Some("unexpected status code: 500"));
        for message in &seeded[2..] {
            let stored = fx.repo.get(message.id).await.unwrap();
            assert!(stored.error().unwrap().contains("circuit breaker is open"));
            assert_outcome_invariant(&stored);
        }
    }

    #[tokio::test]
    async fn empty_batch_has_no_side_effects() {
        let webhook = ScriptedWebhook::accepting();
        let fx = fixture(webhook.clone(), 10, 5);

        let summary = fx
            .dispatcher
            .send_pending_messages(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary, DispatchSummary::default());
        assert_eq!(webhook.calls(), 0);
        assert_eq!(fx.cache.writes(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_is_reported() {
        let fx = fixture(ScriptedWebhook::accepting(), 10, 5);
        fx.repo.set_unavailable(true);

        let err = fx
            .dispatcher
            .send_pending_messages(&CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("failed to get unsent messages"));
    }

    #[tokio::test]
    async fn cache_failure_does_not_change_outcome() {
        let fx = fixture(ScriptedWebhook::accepting(), 10, 5);
        fx.cache.set_unavailable(true);
        let seeded = seed(&fx.repo, 1).await;

        let summary = fx
            .dispatcher
            .send_pending_messages(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.sent, 1);
        let stored = fx.repo.get(seeded[0].id).await.unwrap();
        assert!(matches!(stored.status, MessageStatus::Sent { .. }));
    }

    #[tokio::test]
    async fn takes_oldest_messages_up_to_batch_size() {
        let webhook = ScriptedWebhook::accepting();
        let fx = fixture(webhook.clone(), 2, 5);
        let seeded = seed(&fx.repo, 3).await;

        let summary = fx
            .dispatcher
            .send_pending_messages(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.fetched, 2);
        assert_eq!(
            *webhook.recipients.lock().unwrap(),
            vec![seeded[0].recipient.clone(), seeded[1].recipient.clone()]
        );
        let last = fx.repo.get(seeded[2].id).await.unwrap();
        assert_eq!(last.status, MessageStatus::Pending);
    }

    #[tokio::test]
    async fn failed_messages_are_not_fetched_again() {
        let webhook = ScriptedWebhook::new(
            vec![Err(DeliveryError::Transport("connection refused".into()))],
            Ok(receipt(Some("ext"))),
        );
        let fx = fixture(webhook.clone(), 10, 5);
        seed(&fx.repo, 1).await;

        let cancel = CancellationToken::new();
        let first = fx.dispatcher.send_pending_messages(&cancel).await.unwrap();
        let second = fx.dispatcher.send_pending_messages(&cancel).await.unwrap();

        assert_eq!(first.failed, 1);
        assert_eq!(second, DispatchSummary::default());
        assert_eq!(webhook.calls(), 1);
    }

    #[tokio::test]
    async fn cancelled_tick_leaves_messages_pending() {
        let webhook = ScriptedWebhook::accepting();
        let fx = fixture(webhook.clone(), 10, 5);
        let seeded = seed(&fx.repo, 2).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = fx.dispatcher.send_pending_messages(&cancel).await.unwrap();

        assert_eq!(summary.sent + summary.failed, 0);
        assert_eq!(webhook.calls(), 0);
        for message in &seeded {
            let stored = fx.repo.get(message.id).await.unwrap();
            assert_eq!(stored.status, MessageStatus::Pending);
        }
        assert_eq!(fx.breaker.counts().requests, 0);
    }

    /// Store that refuses to record deliveries but accepts everything else.
    struct UnrecordableSends(InMemoryMessageRepository);

    #[async_trait]
    impl MessageRepository for UnrecordableSends {
        async fn create(&self, recipient: String, content: String) -> anyhow::Result<Message> {
            self.0.create(recipient, content).await
        }

        async fn fetch_pending(&self, limit: u32) -> anyhow::Result<Vec<Message>> {
            self.0.fetch_pending(limit).await
        }

        async fn update_status(&self, message_id: Uuid, status: MessageStatus) -> anyhow::Result<()> {
            if matches!(status, MessageStatus::Sent { .. }) {
                anyhow::bail!("write conflict");
            }
            self.0.update_status(message_id, status).await
        }

        async fn fetch_sent(&self, offset: u64, limit: u32) -> anyhow::Result<Vec<Message>> {
            self.0.fetch_sent(offset, limit).await
        }

        async fn count_sent(&self) -> anyhow::Result<u64> {
            self.0.count_sent().await
        }

        async fn ping(&self) -> anyhow::Result<()> {
            self.0.ping().await
        }
    }

    #[tokio::test]
    async fn unrecorded_delivery_is_marked_failed_and_not_resent() {
        let webhook = ScriptedWebhook::accepting();
        let repo = Arc::new(UnrecordableSends(InMemoryMessageRepository::new()));
        let cache = Arc::new(InMemoryMessageCache::new());
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
        let dispatcher = MessageDispatchHandler::new(
            repo.clone(),
            cache.clone(),
            webhook.clone(),
            breaker.clone(),
            DispatcherConfig { batch_size: 10 },
        );
        let seeded = seed(&repo.0, 1).await;
        let cancel = CancellationToken::new();

        let first = dispatcher.send_pending_messages(&cancel).await.unwrap();
        let second = dispatcher.send_pending_messages(&cancel).await.unwrap();

        assert_eq!(first.sent, 0);
        assert_eq!(first.failed, 1);
        assert_eq!(second, DispatchSummary::default());
        assert_eq!(webhook.calls(), 1);
        assert_eq!(cache.writes(), 0);

        let stored = repo.0.get(seeded[0].id).await.unwrap();
        assert_eq!(
            stored.error(),
            Some("failed to update message status: write conflict")
        );
        assert_outcome_invariant(&stored);
        // the webhook itself answered, so the breaker saw a success
        assert_eq!(breaker.counts().total_failures, 0);
    }

    #[tokio::test]
    async fn reports_breaker_status() {
        let webhook = ScriptedWebhook::new(
            vec![Err(DeliveryError::UnexpectedStatus(503))],
            Ok(receipt(Some("ext"))),
        );
        let fx = fixture(webhook, 10, 5);
        seed(&fx.repo, 2).await;

        fx.dispatcher
            .send_pending_messages(&CancellationToken::new())
            .await
            .unwrap();

        let status = fx.dispatcher.circuit_breaker_status();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.requests, 2);
        assert_eq!(status.failures, 1);
    }
}
