use poem_openapi::Enum;

use crate::{
    application::services::{
        circuit_breaker::CircuitState,
        health::{DependencyStatus, HealthState, SchedulerStatus},
    },
    domain::models::MessageStatusKind,
};

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum HealthStatusKind {
    #[oai(rename = "healthy")]
    Healthy,
    #[oai(rename = "degraded")]
    Degraded,
    #[oai(rename = "unhealthy")]
    Unhealthy,
}

impl From<HealthState> for HealthStatusKind {
    fn from(value: HealthState) -> Self {
        match value {
            HealthState::Healthy => HealthStatusKind::Healthy,
            HealthState::Degraded => HealthStatusKind::Degraded,
            HealthState::Unhealthy => HealthStatusKind::Unhealthy,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerStatusKind {
    #[oai(rename = "running")]
    Running,
    #[oai(rename = "stopped")]
    Stopped,
}

impl From<SchedulerStatus> for SchedulerStatusKind {
    fn from(value: SchedulerStatus) -> Self {
        match value {
            SchedulerStatus::Running => SchedulerStatusKind::Running,
            SchedulerStatus::Stopped => SchedulerStatusKind::Stopped,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum DependencyStatusKind {
    #[oai(rename = "connected")]
    Connected,
    #[oai(rename = "disconnected")]
    Disconnected,
}

impl From<DependencyStatus> for DependencyStatusKind {
    fn from(value: DependencyStatus) -> Self {
        match value {
            DependencyStatus::Connected => DependencyStatusKind::Connected,
            DependencyStatus::Disconnected => DependencyStatusKind::Disconnected,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum CircuitStateKind {
    #[oai(rename = "closed")]
    Closed,
    #[oai(rename = "open")]
    Open,
    #[oai(rename = "half-open")]
    HalfOpen,
}

impl From<CircuitState> for CircuitStateKind {
    fn from(value: CircuitState) -> Self {
        match value {
            CircuitState::Closed => CircuitStateKind::Closed,
            CircuitState::Open => CircuitStateKind::Open,
            CircuitState::HalfOpen => CircuitStateKind::HalfOpen,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageStatusDto {
    #[oai(rename = "pending")]
    Pending,
    #[oai(rename = "sent")]
    Sent,
    #[oai(rename = "failed")]
    Failed,
}

impl From<MessageStatusKind> for MessageStatusDto {
    fn from(value: MessageStatusKind) -> Self {
        match value {
            MessageStatusKind::Pending => MessageStatusDto::Pending,
            MessageStatusKind::Sent => MessageStatusDto::Sent,
            MessageStatusKind::Failed => MessageStatusDto::Failed,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerActionKind {
    #[oai(rename = "started")]
    Started,
    #[oai(rename = "stopped")]
    Stopped,
}
