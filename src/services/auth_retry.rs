use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::domain::ticket::{
    AttachmentBlob, AttachmentUpload, CommentRecord, TicketId, TicketRecord,
};
use crate::error::{AppError, AppResult};
use crate::services::IssueTrackerService;

/// Every remote call gets exactly one retry after a credential refresh.
pub const AUTH_RETRY_BUDGET: u32 = 1;

#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    async fn refresh_credentials(&self) -> AppResult<()>;
}

pub struct StaticCredentials;

#[async_trait]
impl CredentialRefresher for StaticCredentials {
    async fn refresh_credentials(&self) -> AppResult<()> {
        Err(AppError::Auth(
            "credentials were rejected and cannot be refreshed; log in again".to_string(),
        ))
    }
}

/// Runs `operation`, refreshing credentials and retrying while auth failures
/// occur and the budget lasts. Non-auth failures are returned untouched.
pub async fn retry_on_auth<T, F, Fut>(
    refresher: &dyn CredentialRefresher,
    budget: u32,
    mut operation: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut retries_left = budget;
    loop {
        match operation().await {
            Err(error) if error.is_auth() && retries_left > 0 => {
                retries_left -= 1;
                warn!(error = %error, "request rejected, refreshing credentials");
                if let Err(refresh_error) = refresher.refresh_credentials().await {
                    return Err(match refresh_error {
                        AppError::Auth(message) => AppError::Auth(message),
                        other => AppError::Auth(format!("credential refresh failed: {other}")),
                    });
                }
            }
            outcome => return outcome,
        }
    }
}

pub struct AuthRetry<S> {
    inner: S,
    refresher: Arc<dyn CredentialRefresher>,
    budget: u32,
}

impl<S> AuthRetry<S> {
    pub fn new(inner: S, refresher: Arc<dyn CredentialRefresher>) -> Self {
        Self {
            inner,
            refresher,
            budget: AUTH_RETRY_BUDGET,
        }
    }
}

#[async_trait]
impl<S: IssueTrackerService> IssueTrackerService for AuthRetry<S> {
    async fn fetch_ticket(&self, id: &TicketId) -> AppResult<TicketRecord> {
        let inner = &self.inner;
        retry_on_auth(self.refresher.as_ref(), self.budget, move || {
            inner.fetch_ticket(id)
        })
        .await
    }

    async fn update_ticket_status(&self, id: &TicketId, status: &str) -> AppResult<()> {
        let inner = &self.inner;
        retry_on_auth(self.refresher.as_ref(), self.budget, move || {
            inner.update_ticket_status(id, status)
        })
        .await
    }

    async fn upload_attachment(&self, id: &TicketId, upload: &AttachmentUpload) -> AppResult<()> {
        let inner = &self.inner;
        retry_on_auth(self.refresher.as_ref(), self.budget, move || {
            inner.upload_attachment(id, upload)
        })
        .await
    }

    async fn post_comment(&self, id: &TicketId, body: &str) -> AppResult<CommentRecord> {
        let inner = &self.inner;
        retry_on_auth(self.refresher.as_ref(), self.budget, move || {
            inner.post_comment(id, body)
        })
        .await
    }

    async fn resolve_attachment(&self, attachment_id: &str) -> AppResult<AttachmentBlob> {
        let inner = &self.inner;
        retry_on_auth(self.refresher.as_ref(), self.budget, move || {
            inner.resolve_attachment(attachment_id)
        })
        .await
    }
}
