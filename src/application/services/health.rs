use std::{future::Future, sync::Arc, time::Duration};

use crate::{
    application::{
        handlers::message_dispatcher::MessageDispatchHandler,
        services::{
            circuit_breaker::{CircuitBreakerSnapshot, CircuitState},
            scheduler::Scheduler,
        },
    },
    domain::repositories::{MessageCache, MessageRepository},
};

pub const DEPENDENCY_PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerStatus {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthReport {
    pub status: HealthState,
    pub scheduler_status: SchedulerStatus,
    pub database_status: DependencyStatus,
    pub redis_status: DependencyStatus,
    pub circuit_breaker_state: CircuitState,
    pub circuit_breaker_status: String,
}

pub struct HealthService {
    message_repo: Arc<dyn MessageRepository>,
    cache: Arc<dyn MessageCache>,
    scheduler: Arc<Scheduler>,
    dispatcher: Arc<MessageDispatchHandler>,
}

impl HealthService {
    pub fn new(
        message_repo: Arc<dyn MessageRepository>,
        cache: Arc<dyn MessageCache>,
        scheduler: Arc<Scheduler>,
        dispatcher: Arc<MessageDispatchHandler>,
    ) -> Self {
        Self {
            message_repo,
            cache,
            scheduler,
            dispatcher,
        }
    }

    /// Pings every dependency on each call. Never fails: an unreachable
    /// dependency is reported as `Disconnected`.
    pub async fn get_health(&self) -> HealthReport {
        let mut status = HealthState::Healthy;

        let scheduler_status = if self.scheduler.is_running().await {
            SchedulerStatus::Running
        } else {
            SchedulerStatus::Stopped
        };

        let database_status = ping_status(self.message_repo.ping()).await;
        let redis_status = ping_status(self.cache.ping()).await;

        let breaker = self.dispatcher.circuit_breaker_status();

        if database_status == DependencyStatus::Disconnected
            || redis_status == DependencyStatus::Disconnected
        {
            status = HealthState::Unhealthy;
        }

        // An open breaker wins over a disconnected dependency.
        if breaker.state == CircuitState::Open {
            status = HealthState::Degraded;
        }

        HealthReport {
            status,
            scheduler_status,
            database_status,
            redis_status,
            circuit_breaker_state: breaker.state,
            circuit_breaker_status: describe_breaker(&breaker),
        }
    }
}

async fn ping_status(ping: impl Future<Output = anyhow::Result<()>>) -> DependencyStatus {
    match tokio::time::timeout(DEPENDENCY_PING_TIMEOUT, ping).await {
        Ok(Ok(())) => DependencyStatus::Connected,
        _ => DependencyStatus::Disconnected,
    }
}

pub fn describe_breaker(snapshot: &CircuitBreakerSnapshot) -> String {
    if snapshot.requests == 0 {
        return "No requests yet".to_string();
    }
    let failure_rate = f64::from(snapshot.failures) / f64::from(snapshot.requests) * 100.0;
    format!(
        "Requests: {}, Failures: {} ({:.1}%)",
        snapshot.requests, snapshot.failures, failure_rate
    )
}
