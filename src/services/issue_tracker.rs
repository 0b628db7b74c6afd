use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::ticket::{
    AttachmentBlob, AttachmentUpload, CommentRecord, TicketId, TicketRecord,
};
use crate::error::AppResult;

#[async_trait]
pub trait IssueTrackerService: Send + Sync {
    async fn fetch_ticket(&self, id: &TicketId) -> AppResult<TicketRecord>;

    async fn update_ticket_status(&self, id: &TicketId, status: &str) -> AppResult<()>;

    async fn upload_attachment(&self, id: &TicketId, upload: &AttachmentUpload) -> AppResult<()>;

    async fn post_comment(&self, id: &TicketId, body: &str) -> AppResult<CommentRecord>;

    /// Uploads `attachment`, then posts `body` with a thumbnail embed for it.
    async fn add_comment(
        &self,
        id: &TicketId,
        body: &str,
        attachment: Option<&AttachmentUpload>,
    ) -> AppResult<CommentRecord> {
        let body = match attachment {
            Some(upload) => {
                self.upload_attachment(id, upload).await?;
                format!("{body}\n\n!{}|thumbnail!", upload.filename)
            }
            None => body.to_string(),
        };
        self.post_comment(id, &body).await
    }

    async fn resolve_attachment(&self, attachment_id: &str) -> AppResult<AttachmentBlob>;
}

#[async_trait]
impl<T: IssueTrackerService + ?Sized> IssueTrackerService for Arc<T> {
    async fn fetch_ticket(&self, id: &TicketId) -> AppResult<TicketRecord> {
        (**self).fetch_ticket(id).await
    }

    async fn update_ticket_status(&self, id: &TicketId, status: &str) -> AppResult<()> {
        (**self).update_ticket_status(id, status).await
    }

    async fn upload_attachment(&self, id: &TicketId, upload: &AttachmentUpload) -> AppResult<()> {
        (**self).upload_attachment(id, upload).await
    }

    async fn post_comment(&self, id: &TicketId, body: &str) -> AppResult<CommentRecord> {
        (**self).post_comment(id, body).await
    }

    async fn resolve_attachment(&self, attachment_id: &str) -> AppResult<AttachmentBlob> {
        (**self).resolve_attachment(attachment_id).await
    }
}
