use chrono::Utc;
use poem_openapi::{ApiResponse, Object, payload::Json};
use uuid::Uuid;

use crate::presentation::models::{
    CircuitStateKind, DependencyStatusKind, HealthStatusKind, MessageStatusDto,
    SchedulerActionKind, SchedulerStatusKind,
};

#[derive(Object)]
pub struct ErrorResponseDto {
    /// Machine readable error code.
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponseDto {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Object)]
pub struct HealthResponseDto {
    pub status: HealthStatusKind,
    pub timestamp: String,
    pub scheduler_status: SchedulerStatusKind,
    pub database_status: DependencyStatusKind,
    pub redis_status: DependencyStatusKind,
    pub circuit_breaker_state: CircuitStateKind,
    pub circuit_breaker_status: String,
}

#[derive(Object)]
pub struct SchedulerResponseDto {
    pub status: SchedulerActionKind,
    pub message: String,
}

#[derive(Object)]
pub struct MessageDto {
    pub id: Uuid,
    pub recipient: String,
    pub content: String,
    pub status: MessageStatusDto,
    pub message_id: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub sent_at: Option<String>,
}

#[derive(Object)]
pub struct PaginationDto {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u32,
}

#[derive(Object)]
pub struct SentMessagesDto {
    pub messages: Vec<MessageDto>,
    pub pagination: PaginationDto,
}

#[derive(ApiResponse)]
pub enum HealthResponse {
    /// Healthy or degraded.
    #[oai(status = 200)]
    Ok(Json<HealthResponseDto>),
    /// A dependency is unreachable.
    #[oai(status = 503)]
    Unavailable(Json<HealthResponseDto>),
}

#[derive(ApiResponse)]
pub enum SchedulerResponse {
    #[oai(status = 200)]
    Ok(Json<SchedulerResponseDto>),
    #[oai(status = 409)]
    Conflict(Json<ErrorResponseDto>),
}

#[derive(ApiResponse)]
pub enum SentMessagesResponse {
    #[oai(status = 200)]
    Ok(Json<SentMessagesDto>),
    #[oai(status = 500)]
    InternalError(Json<ErrorResponseDto>),
}
