use std::sync::Arc;

use poem_openapi::{OpenApi, payload::Json};

use crate::{
    application::services::health::HealthState,
    presentation::http::{
        endpoints::root::{ApiState, EndpointsTags},
        mappers::map_health,
        responses::HealthResponse,
    },
};

#[derive(Clone)]
pub struct HealthEndpoints {
    state: Arc<ApiState>,
}

impl HealthEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl HealthEndpoints {
    /// Reports scheduler, storage, cache and circuit breaker state.
    #[oai(path = "/health", method = "get", tag = EndpointsTags::Health)]
    pub async fn health(&self) -> HealthResponse {
        let report = self.state.health_service.get_health().await;
        let body = Json(map_health(&report));

        match report.status {
            HealthState::Unhealthy => HealthResponse::Unavailable(body),
            HealthState::Healthy | HealthState::Degraded => HealthResponse::Ok(body),
        }
    }
}
