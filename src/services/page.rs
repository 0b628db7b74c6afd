use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::domain::ticket::TicketId;
use crate::error::AppResult;

#[async_trait]
pub trait PageService: Send + Sync {
    async fn scan_for_task_ids(&self) -> AppResult<BTreeSet<TicketId>>;

    /// Fire-and-forget; the page decides whether the selector matched anything.
    async fn highlight_selector(&self, selector: &str);
}
