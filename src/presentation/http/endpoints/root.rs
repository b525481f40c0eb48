use std::sync::Arc;

use poem_openapi::Tags;
use tokio_util::sync::CancellationToken;

use crate::{
    application::{
        services::{health::HealthService, scheduler::Scheduler},
        usecases::list_sent_messages::ListSentMessagesUseCase,
    },
    presentation::http::endpoints::{
        health::HealthEndpoints, messages::MessagesEndpoints, scheduler::SchedulerEndpoints,
    },
};

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Arc<Scheduler>,
    pub health_service: Arc<HealthService>,
    pub list_sent_messages_usecase: Arc<ListSentMessagesUseCase>,
    /// Process-wide token; a scheduler started over HTTP stops with it.
    pub shutdown: CancellationToken,
}

/// Enum of API sections (tags)
#[derive(Tags)]
pub enum EndpointsTags {
    Health,
    Scheduler,
    Messages,
}

pub type Endpoints = (HealthEndpoints, SchedulerEndpoints, MessagesEndpoints);

pub fn endpoints(state: Arc<ApiState>) -> Endpoints {
    (
        HealthEndpoints::new(state.clone()),
        SchedulerEndpoints::new(state.clone()),
        MessagesEndpoints::new(state),
    )
}
