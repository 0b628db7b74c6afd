use std::path::Path;

use crate::context::AppContext;
use crate::domain::ticket::{AttachmentUpload, CommentRecord, TicketId, TicketRecord};
use crate::error::{AppError, AppResult};

/// Trims a comment body, rejecting one with nothing left.
pub fn comment_body(raw: &str) -> AppResult<&str> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(AppError::Validation("comment body cannot be empty".to_string()));
    }
    Ok(body)
}

pub fn status_name(raw: &str) -> AppResult<&str> {
    let status = raw.trim();
    if status.is_empty() {
        return Err(AppError::Validation("status cannot be empty".to_string()));
    }
    Ok(status)
}

pub async fn show_ticket(ctx: &AppContext, raw_id: &str) -> AppResult<TicketRecord> {
    let id = TicketId::parse(raw_id)?;
    ctx.issue_tracker.fetch_ticket(&id).await
}

pub async fn change_status(ctx: &AppContext, raw_id: &str, raw_status: &str) -> AppResult<TicketId> {
    let id = TicketId::parse(raw_id)?;
    let status = status_name(raw_status)?;
    ctx.issue_tracker.update_ticket_status(&id, status).await?;
    Ok(id)
}

pub async fn read_upload(path: &Path) -> AppResult<AttachmentUpload> {
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.to_string())
        .ok_or_else(|| {
            AppError::Validation(format!("'{}' does not name a file", path.display()))
        })?;
    let bytes = tokio::fs::read(path).await?;
    Ok(AttachmentUpload { filename, bytes })
}

pub async fn add_comment(
    ctx: &AppContext,
    raw_id: &str,
    raw_body: &str,
    attachment: Option<&Path>,
) -> AppResult<CommentRecord> {
    let id = TicketId::parse(raw_id)?;
    let body = comment_body(raw_body)?;
    let upload = match attachment {
        Some(path) => Some(read_upload(path).await?),
        None => None,
    };
    ctx.issue_tracker.add_comment(&id, body, upload.as_ref()).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::AppConfig;
    use crate::test_support::{StubPage, StubTracker, id, ticket};

    fn context(tracker: Arc<StubTracker>) -> AppContext {
        AppContext::new(AppConfig::default(), tracker, Arc::new(StubPage::default()))
    }

    #[tokio::test]
    async fn malformed_key_is_rejected_before_any_call() {
        let tracker = Arc::new(StubTracker::default());
        let ctx = context(tracker.clone());

        let error = show_ticket(&ctx, "not a key").await.expect_err("invalid key");

        assert!(matches!(error, AppError::Validation(_)));
        assert_eq!(tracker.fetch_count(), 0);
    }

    #[tokio::test]
    async fn show_normalizes_the_key() {
        let tracker = Arc::new(StubTracker::default());
        tracker.put(ticket("PROJ-3", "Done", "body"));
        let ctx = context(tracker);

        let record = show_ticket(&ctx, " proj-3 ").await.expect("ticket");

        assert_eq!(record.id, id("PROJ-3"));
    }

    #[tokio::test]
    async fn empty_comment_is_not_sent() {
        let tracker = Arc::new(StubTracker::default());
        let ctx = context(tracker.clone());

        let error = add_comment(&ctx, "PROJ-1", "   ", None).await.expect_err("empty");

        assert!(matches!(error, AppError::Validation(_)));
        assert!(tracker.added_comments.lock().expect("comments lock").is_empty());
    }

    #[tokio::test]
    async fn status_change_is_forwarded_trimmed() {
        let tracker = Arc::new(StubTracker::default());
        let ctx = context(tracker.clone());

        change_status(&ctx, "proj-1", " In Review ").await.expect("status");

        assert_eq!(
            *tracker.status_updates.lock().expect("updates lock"),
            vec![(id("PROJ-1"), "In Review".to_string())]
        );
    }

    #[tokio::test]
    async fn attachment_is_read_and_embedded_in_the_comment() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("upload.png");
        std::fs::write(&path, [1u8, 2, 3]).expect("write upload");
        let tracker = Arc::new(StubTracker::default());
        let ctx = context(tracker.clone());

        let comment = add_comment(&ctx, "PROJ-1", "see attached", Some(&path))
            .await
            .expect("comment");

        assert_eq!(comment.body_raw, "see attached\n\n!upload.png|thumbnail!");
        assert_eq!(
            *tracker.uploads.lock().expect("uploads lock"),
            vec![(id("PROJ-1"), "upload.png".to_string())]
        );
    }
}
