use chrono::Utc;

use crate::{
    application::{
        services::health::HealthReport,
        usecases::list_sent_messages::{Pagination, SentMessagesPage},
    },
    domain::models::Message,
    presentation::http::responses::{
        HealthResponseDto, MessageDto, PaginationDto, SentMessagesDto,
    },
};

pub fn map_health(report: &HealthReport) -> HealthResponseDto {
    HealthResponseDto {
        status: report.status.into(),
        timestamp: Utc::now().to_rfc3339(),
        scheduler_status: report.scheduler_status.into(),
        database_status: report.database_status.into(),
        redis_status: report.redis_status.into(),
        circuit_breaker_state: report.circuit_breaker_state.into(),
        circuit_breaker_status: report.circuit_breaker_status.clone(),
    }
}

pub fn map_message(message: &Message) -> MessageDto {
    MessageDto {
        id: message.id,
        recipient: message.recipient.clone(),
        content: message.content.clone(),
        status: message.status.kind().into(),
        message_id: message.external_id().map(str::to_string),
        error: message.error().map(str::to_string),
        created_at: message.created_at.to_rfc3339(),
        sent_at: message.sent_at().map(|at| at.to_rfc3339()),
    }
}

pub fn map_sent_page(page: &SentMessagesPage) -> SentMessagesDto {
    SentMessagesDto {
        messages: page.messages.iter().map(map_message).collect(),
        pagination: map_pagination(&page.pagination),
    }
}

fn map_pagination(pagination: &Pagination) -> PaginationDto {
    PaginationDto {
        current_page: pagination.current_page,
        total_pages: pagination.total_pages,
        total_items: pagination.total_items,
        items_per_page: pagination.items_per_page,
    }
}
