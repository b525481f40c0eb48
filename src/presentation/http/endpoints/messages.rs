use std::sync::Arc;

use poem_openapi::{OpenApi, param::Query, payload::Json};
use tracing::error;

use crate::presentation::http::{
    endpoints::root::{ApiState, EndpointsTags},
    mappers::map_sent_page,
    responses::{ErrorResponseDto, SentMessagesResponse},
};

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct MessagesEndpoints {
    state: Arc<ApiState>,
}

impl MessagesEndpoints {
    pub fn new(state: Arc<ApiState>) -> Self {
        Self { state }
    }
}

#[OpenApi]
impl MessagesEndpoints {
    /// Lists delivered messages, most recently sent first.
    #[oai(path = "/messages/sent", method = "get", tag = EndpointsTags::Messages)]
    pub async fn list_sent_messages(
        &self,
        page: Query<Option<i64>>,
        limit: Query<Option<i64>>,
    ) -> SentMessagesResponse {
        let (page, limit) = normalize_paging(page.0, limit.0);

        match self
            .state
            .list_sent_messages_usecase
            .execute(page, limit)
            .await
        {
            Ok(result) => SentMessagesResponse::Ok(Json(map_sent_page(&result))),
            Err(err) => {
                error!(error = ?err, "Failed to get sent messages");
                SentMessagesResponse::InternalError(Json(ErrorResponseDto::new(
                    "INTERNAL_ERROR",
                    "Failed to retrieve sent messages",
                )))
            }
        }
    }
}

/// Out-of-range values fall back to the defaults instead of being rejected.
fn normalize_paging(page: Option<i64>, limit: Option<i64>) -> (u32, u32) {
    let page = page
        .and_then(|p| u32::try_from(p).ok())
        .filter(|p| *p >= 1)
        .unwrap_or(DEFAULT_PAGE);
    let limit = limit
        .and_then(|l| u32::try_from(l).ok())
        .filter(|l| (1..=MAX_LIMIT).contains(l))
        .unwrap_or(DEFAULT_LIMIT);
    (page, limit)
}
