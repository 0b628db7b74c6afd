use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::ticket::{AttachmentRef, TicketId, TicketRecord};
use crate::error::{AppError, AppResult};
use crate::panel::node::{Fragment, Node};
use crate::panel::render::ContentRenderer;
use crate::panel::tracker::{ContentTracker, TrackerKey};
use crate::panel::view::{CommentView, NO_DESCRIPTION, TicketView, normalize_comments};
use crate::services::IssueTrackerService;
use crate::workflow::session::Session;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub created: Vec<TicketId>,
    pub updated: Vec<TicketId>,
    pub unchanged: Vec<TicketId>,
    pub removed: Vec<TicketId>,
    pub merged: Vec<TicketId>,
    pub failed: Vec<TicketId>,
}

impl ReconcileReport {
    pub fn changed_ids(&self) -> BTreeSet<TicketId> {
        self.created
            .iter()
            .chain(&self.updated)
            .chain(&self.removed)
            .chain(&self.merged)
            .cloned()
            .collect()
    }
}

enum Plan {
    Ready(Fragment),
    Render { accept: bool },
}

struct Resolved {
    key: TrackerKey,
    fragment: Fragment,
    rendered: bool,
    accept: bool,
}

struct Prepared {
    id: TicketId,
    record: TicketRecord,
    existed: bool,
    description: Resolved,
    comments: Vec<Resolved>,
}

enum Change {
    Created,
    Updated,
    Unchanged,
}

pub struct TicketReconciler {
    issue_tracker: Arc<dyn IssueTrackerService>,
    renderer: Arc<ContentRenderer>,
}

impl TicketReconciler {
    pub fn new(issue_tracker: Arc<dyn IssueTrackerService>, renderer: Arc<ContentRenderer>) -> Self {
        Self {
            issue_tracker,
            renderer,
        }
    }

    pub fn renderer(&self) -> &Arc<ContentRenderer> {
        &self.renderer
    }

    /// Returns `Ok(None)` when the session moved on before the results could be applied.
    pub async fn reconcile(
        &self,
        session: &Mutex<Session>,
        epoch: u64,
        ids: &BTreeSet<TicketId>,
    ) -> AppResult<Option<ReconcileReport>> {
        let mut prepared = Vec::with_capacity(ids.len());
        let mut failures: Vec<(TicketId, AppError)> = Vec::new();

        for id in ids {
            match self.prepare(session, id).await {
                Ok(ticket) => prepared.push(ticket),
                Err(error) if error.is_auth() => {
                    warn!(ticket = %id, error = %error, "authentication failed, aborting reconciliation");
                    return Err(error);
                }
                Err(error) => {
                    warn!(ticket = %id, error = %error, "failed to refresh ticket");
                    failures.push((id.clone(), error));
                }
            }
        }

        let mut guard = session.lock().await;
        if !guard.is_current(epoch) {
            debug!(epoch, "session changed during reconciliation, discarding results");
            drop(guard);
            for ticket in &prepared {
                self.renderer.evict_scope(&ticket.id).await;
            }
            return Ok(None);
        }
        let session = &mut *guard;
        let mut report = ReconcileReport::default();

        for ticket in prepared {
            let id = ticket.id.clone();
            match apply(session, ticket) {
                Change::Created => report.created.push(id),
                Change::Updated => report.updated.push(id),
                Change::Unchanged => report.unchanged.push(id),
            }
        }

        for (id, error) in failures {
            session.notify_error(Some(id.clone()), format!("Failed to load {id}: {error}"));
            report.failed.push(id);
        }

        report.merged = session.panel.settle().merged;

        report.removed = session.panel.retain_only(ids);
        for id in &report.removed {
            session.tracker.cleanup(id);
            self.renderer.evict_scope(id).await;
        }
        session.tracker.cleanup_removed(ids);

        info!(
            created = report.created.len(),
            updated = report.updated.len(),
            removed = report.removed.len(),
            merged = report.merged.len(),
            failed = report.failed.len(),
            "reconciliation complete"
        );
        Ok(Some(report))
    }

    async fn prepare(&self, session: &Mutex<Session>, id: &TicketId) -> AppResult<Prepared> {
        let record = self.issue_tracker.fetch_ticket(id).await?;
        if &record.id != id {
            debug!(requested = %id, received = %record.id, "tracker returned a different key");
        }

        let description_key = TrackerKey::description(id);
        let (existed, description_plan, comment_plans) = {
            let session = session.lock().await;
            let existing = session.panel.get(id);
            let description_plan = plan(
                &session.tracker,
                &description_key,
                &record.description_raw,
                existing.map(|view| &view.description),
            );
            let comment_plans: Vec<(TrackerKey, Plan)> = record
                .comments
                .iter()
                .map(|comment| {
                    let key = TrackerKey::comment(id, &comment.id);
                    let current = existing
                        .and_then(|view| view.comment(&comment.id))
                        .map(|view| &view.body);
                    let plan = plan(&session.tracker, &key, &comment.body_raw, current);
                    (key, plan)
                })
                .collect();
            (existing.is_some(), description_plan, comment_plans)
        };

        let description = self
            .resolve(
                id,
                description_key,
                description_plan,
                &record.description_raw,
                &record.attachments,
            )
            .await;
        let mut comments = Vec::with_capacity(comment_plans.len());
        for ((key, plan), comment) in comment_plans.into_iter().zip(&record.comments) {
            comments.push(
                self.resolve(id, key, plan, &comment.body_raw, &record.attachments)
                    .await,
            );
        }

        Ok(Prepared {
            id: id.clone(),
            record,
            existed,
            description,
            comments,
        })
    }

    async fn resolve(
        &self,
        scope: &TicketId,
        key: TrackerKey,
        plan: Plan,
        raw: &str,
        attachments: &[AttachmentRef],
    ) -> Resolved {
        match plan {
            Plan::Ready(fragment) => Resolved {
                key,
                fragment,
                rendered: false,
                accept: false,
            },
            Plan::Render { accept } => {
                debug!(key = %key, "rendering content");
                let fragment = if raw.trim().is_empty() {
                    Fragment(vec![Node::text(NO_DESCRIPTION)])
                } else {
                    self.renderer.render(scope, raw, attachments).await
                };
                Resolved {
                    key,
                    fragment,
                    rendered: true,
                    accept,
                }
            }
        }
    }
}

/// Reads the tracker only; `apply` records what was accepted.
fn plan(tracker: &ContentTracker, key: &TrackerKey, raw: &str, on_screen: Option<&Fragment>) -> Plan {
    let accepted = tracker.wants_update(key, raw);
    match on_screen {
        Some(fragment) if !accepted => Plan::Ready(fragment.clone()),
        _ if accepted => Plan::Render { accept: true },
        _ => match tracker.cached_for(key, raw) {
            Some(cached) => Plan::Ready(cached.clone()),
            None => Plan::Render { accept: false },
        },
    }
}

fn apply(session: &mut Session, ticket: Prepared) -> Change {
    let Prepared {
        id,
        record,
        existed,
        description,
        comments,
    } = ticket;

    let mut rendered_any = description.rendered;
    record_content(&mut session.tracker, &description, &record.description_raw);
    let mut comment_views = Vec::with_capacity(comments.len());
    for (comment, resolved) in record.comments.iter().zip(comments) {
        rendered_any |= resolved.rendered;
        record_content(&mut session.tracker, &resolved, &comment.body_raw);
        comment_views.push(CommentView::new(comment, resolved.fragment));
    }
    normalize_comments(&mut comment_views);

    match session.panel.get_mut(&id) {
        Some(view) if existed => {
            let comments_changed = view.comments.len() != comment_views.len()
                || view
                    .comments
                    .iter()
                    .zip(&comment_views)
                    .any(|(old, new)| old.id != new.id);
            let changed = rendered_any
                || comments_changed
                || view.status != record.status
                || view.summary != record.summary;

            view.status = record.status;
            view.summary = record.summary;
            view.created_at = record.created_at;
            view.attachments = record.attachments;
            view.description = description.fragment;
            view.comments = comment_views;

            if changed {
                debug!(ticket = %view.id, "updated ticket entry");
                Change::Updated
            } else {
                Change::Unchanged
            }
        }
        _ => {
            debug!(ticket = %id, "created ticket entry");
            session.panel.stage(TicketView {
                id,
                status: record.status,
                summary: record.summary,
                created_at: record.created_at,
                attachments: record.attachments,
                description: description.fragment,
                comments: comment_views,
            });
            Change::Created
        }
    }
}

fn record_content(tracker: &mut ContentTracker, resolved: &Resolved, raw: &str) {
    if resolved.accept {
        tracker.accept(&resolved.key, raw);
    }
    if resolved.rendered {
        tracker.cache_for(&resolved.key, raw, resolved.fragment.clone());
    }
}
