use std::sync::Arc;

use poem_openapi::{OpenApi, payload::Json};
use tracing::info;

use crate::{
    application::services::scheduler::SchedulerError,
    presentation::{
        http::{
            endpoints::root::{ApiState, EndpointsTags},
            responses::{ErrorResponseDto, SchedulerResponse, SchedulerResponseDto},
        },
        models::SchedulerActionKind,
    },
};

#[derive(Clone)]
pub struct SchedulerEndpoints {
    state: Arc<ApiState>,
}

impl SchedulerEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl SchedulerEndpoints {
    #[oai(path = "/scheduler/start", method = "post", tag = EndpointsTags::Scheduler)]
    pub async fn start_scheduler(&self) -> SchedulerResponse {
        match self.state.scheduler.start(&self.state.shutdown).await {
            Ok(()) => {
                info!("Scheduler started via API");
                SchedulerResponse::Ok(Json(SchedulerResponseDto {
                    status: SchedulerActionKind::Started,
                    message: "Scheduler started successfully".to_string(),
                }))
            }
            Err(err) => conflict(err),
        }
    }

    #[oai(path = "/scheduler/stop", method = "post", tag = EndpointsTags::Scheduler)]
    pub async fn stop_scheduler(&self) -> SchedulerResponse {
        match self.state.scheduler.stop().await {
            Ok(()) => {
                info!("Scheduler stopped via API");
                SchedulerResponse::Ok(Json(SchedulerResponseDto {
                    status: SchedulerActionKind::Stopped,
                    message: "Scheduler stopped successfully".to_string(),
                }))
            }
            Err(err) => conflict(err),
        }
    }
}

fn conflict(err: SchedulerError) -> SchedulerResponse {
    let body = match err {
        SchedulerError::AlreadyRunning => {
            ErrorResponseDto::new("SCHEDULER_ALREADY_RUNNING", "Scheduler is already running")
        }
        SchedulerError::NotRunning => {
            ErrorResponseDto::new("SCHEDULER_NOT_RUNNING", "Scheduler is not running")
        }
    };
    SchedulerResponse::Conflict(Json(body))
}
