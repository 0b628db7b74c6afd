use tracing::debug;

use crate::context::AppContext;
use crate::domain::ticket::{AttachmentUpload, CommentRecord, TicketId};
use crate::error::{AppError, AppResult};
use crate::panel::tracker::TrackerKey;
use crate::panel::view::{CommentView, normalize_comments};
use crate::workflow::polling::PollingScheduler;
use crate::workflow::ticket::{comment_body, status_name};

pub async fn change_status(
    ctx: &AppContext,
    scheduler: &PollingScheduler,
    id: &TicketId,
    status: &str,
) -> AppResult<()> {
    let status = status_name(status)?;
    let epoch = scheduler.session().lock().await.epoch();
    if let Err(error) = ctx.issue_tracker.update_ticket_status(id, status).await {
        return Err(report_failure(scheduler, id, "update status of", error).await);
    }

    let mut session = scheduler.session().lock().await;
    if !session.is_current(epoch) {
        debug!(ticket = %id, "session changed during status update, panel left alone");
        return Ok(());
    }
    if let Some(view) = session.panel.get_mut(id) {
        view.status = status.to_string();
    }
    session.notify_success(Some(id.clone()), format!("{id} moved to {status}"));
    Ok(())
}

pub async fn add_comment(
    ctx: &AppContext,
    scheduler: &PollingScheduler,
    id: &TicketId,
    body: &str,
    attachment: Option<AttachmentUpload>,
) -> AppResult<CommentRecord> {
    let body = comment_body(body)?;
    let epoch = scheduler.session().lock().await.epoch();
    let comment = match ctx.issue_tracker.add_comment(id, body, attachment.as_ref()).await {
        Ok(comment) => comment,
        Err(error) => return Err(report_failure(scheduler, id, "comment on", error).await),
    };

    // A fresh upload is not in the displayed attachment list yet.
    let refreshed = match attachment {
        Some(_) => ctx
            .issue_tracker
            .fetch_ticket(id)
            .await
            .map(|record| record.attachments)
            .ok(),
        None => None,
    };
    let attachments = match refreshed.clone() {
        Some(attachments) => attachments,
        None => scheduler
            .session()
            .lock()
            .await
            .panel
            .get(id)
            .map(|view| view.attachments.clone())
            .unwrap_or_default(),
    };

    let body = scheduler
        .renderer()
        .render(id, &comment.body_raw, &attachments)
        .await;

    let mut guard = scheduler.session().lock().await;
    if !guard.is_current(epoch) {
        debug!(ticket = %id, comment = %comment.id, "session changed while commenting, panel left alone");
        return Ok(comment);
    }
    let session = &mut *guard;
    let key = TrackerKey::comment(id, &comment.id);
    session.tracker.should_update(&key, &comment.body_raw);
    session.tracker.set_cache(&key, body.clone());
    if let Some(view) = session.panel.get_mut(id) {
        if let Some(attachments) = refreshed {
            view.attachments = attachments;
        }
        view.comments.push(CommentView::new(&comment, body));
        normalize_comments(&mut view.comments);
    }
    session.notify_success(Some(id.clone()), format!("Comment added to {id}"));
    Ok(comment)
}

pub async fn click_tag_reference(ctx: &AppContext, selector: &str) -> AppResult<()> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(AppError::Validation("selector cannot be empty".to_string()));
    }
    ctx.page.highlight_selector(selector).await;
    Ok(())
}

pub async fn dismiss_notification(scheduler: &PollingScheduler, notification_id: u64) -> bool {
    scheduler.dismiss_notification(notification_id).await
}

async fn report_failure(
    scheduler: &PollingScheduler,
    id: &TicketId,
    what: &str,
    error: AppError,
) -> AppError {
    if error.is_auth() {
        scheduler.notify_auth_expired().await;
    } else {
        scheduler
            .session()
            .lock()
            .await
            .notify_error(Some(id.clone()), format!("Failed to {what} {id}: {error}"));
    }
    error
}
