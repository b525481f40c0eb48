use std::sync::Arc;

use anyhow::Context;

use crate::domain::{models::Message, repositories::MessageRepository};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u64,
    pub total_items: u64,
    pub items_per_page: u32,
}

#[derive(Debug, Clone)]
pub struct SentMessagesPage {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

pub struct ListSentMessagesUseCase {
    repo: Arc<dyn MessageRepository>,
}

impl ListSentMessagesUseCase {
    pub fn new(repo: Arc<dyn MessageRepository>) -> Self {
        Self { repo }
    }

    /// Returns one page of sent messages, newest first. Pages are 1-based;
    /// page 0 is treated as page 1.
    pub async fn execute(&self, page: u32, limit: u32) -> anyhow::Result<SentMessagesPage> {
        let offset = u64::from(page.saturating_sub(1)) * u64::from(limit);

        let messages = if limit == 0 {
            Vec::new()
        } else {
            self.repo
                .fetch_sent(offset, limit)
                .await
                .context("failed to get sent messages")?
        };

        let total_items = self
            .repo
            .count_sent()
            .await
            .context("failed to count sent messages")?;

        let total_pages = if limit == 0 {
            0
        } else {
            total_items.div_ceil(u64::from(limit))
        };

        Ok(SentMessagesPage {
            messages,
            pagination: Pagination {
                current_page: page,
                total_pages,
                total_items,
                items_per_page: limit,
            },
        })
    }
}
