use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};

use crate::clock::SystemClock;
use crate::config::interval_from_secs;
use crate::context::AppContext;
use crate::domain::ticket::TicketId;
use crate::error::{AppError, AppResult};
use crate::panel::notifications::NotificationKind;
use crate::panel::reconcile::TicketReconciler;
use crate::panel::render::ContentRenderer;
use crate::panel::view::{PanelFilter, SortOrder};
use crate::services::PanelObserver;
use crate::workflow::actions;
use crate::workflow::polling::{PanelSnapshot, PollingScheduler, SchedulerSettings, TickOutcome};
use crate::workflow::session::Session;
use crate::workflow::ticket::read_upload;

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Page URL or local path to scan (overrides the configured page).
    #[arg(long)]
    pub page: Option<String>,
    /// Seconds between scans.
    #[arg(long)]
    pub interval_secs: Option<u64>,
    /// Write the rendered panel to this file after every change.
    #[arg(long)]
    pub html: Option<PathBuf>,
    /// Only show tickets whose key, summary or status contains this text.
    #[arg(long)]
    pub search: Option<String>,
    /// Only show tickets in this status.
    #[arg(long)]
    pub status: Option<String>,
    /// Ticket order by creation time: newest or oldest.
    #[arg(long, default_value = "newest")]
    pub order: SortOrder,
}

/// A line typed while watching.
#[derive(Debug, PartialEq, Eq)]
enum PanelCommand {
    Status { id: TicketId, status: String },
    Comment { id: TicketId, body: String, attach: Option<PathBuf> },
    Click { selector: String },
    Tags { id: TicketId },
    Dismiss { notification: u64 },
    Refresh,
    Rescan,
    Show,
    Help,
}

const HELP: &str = "\
commands:
  status KEY STATUS        move a ticket
  comment KEY TEXT         add a comment
  upload KEY PATH [TEXT]   add a comment with an attachment
  tags KEY                 list the element references in a ticket
  click SELECTOR           highlight an element on the page
  dismiss ID               dismiss a notification
  refresh                  reconcile now
  rescan                   rescan the page shortly
  show                     print the panel summary";

impl PanelCommand {
    fn parse(line: &str) -> AppResult<Option<Self>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (verb, rest) = split_word(line);
        let command = match verb {
            "status" => {
                let (id, status) = split_word(rest);
                PanelCommand::Status {
                    id: TicketId::parse(id)?,
                    status: status.to_string(),
                }
            }
            "comment" => {
                let (id, body) = split_word(rest);
                PanelCommand::Comment {
                    id: TicketId::parse(id)?,
                    body: body.to_string(),
                    attach: None,
                }
            }
            "upload" => {
                let (id, rest) = split_word(rest);
                let (path, body) = split_word(rest);
                if path.is_empty() {
                    return Err(AppError::Validation("upload needs a file path".to_string()));
                }
                let body = if body.is_empty() {
                    "Attachment added".to_string()
                } else {
                    body.to_string()
                };
                PanelCommand::Comment {
                    id: TicketId::parse(id)?,
                    body,
                    attach: Some(PathBuf::from(path)),
                }
            }
            "click" => PanelCommand::Click {
                selector: rest.to_string(),
            },
            "tags" => PanelCommand::Tags {
                id: TicketId::parse(rest)?,
            },
            "dismiss" => PanelCommand::Dismiss {
                notification: rest.parse().map_err(|_| {
                    AppError::Validation(format!("'{rest}' is not a notification id"))
                })?,
            },
            "refresh" => PanelCommand::Refresh,
            "rescan" => PanelCommand::Rescan,
            "show" => PanelCommand::Show,
            "help" => PanelCommand::Help,
            other => {
                return Err(AppError::Validation(format!(
                    "unknown command '{other}', type `help`"
                )));
            }
        };
        Ok(Some(command))
    }
}

fn split_word(text: &str) -> (&str, &str) {
    let text = text.trim_start();
    match text.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (text, ""),
    }
}

#[derive(Debug)]
enum PanelEvent {
    Reconciled(BTreeSet<TicketId>),
    AuthFailed,
}

struct ChannelObserver {
    events: UnboundedSender<PanelEvent>,
}

impl PanelObserver for ChannelObserver {
    fn on_reconcile_complete(&self, changed: &BTreeSet<TicketId>) {
        let _ = self.events.send(PanelEvent::Reconciled(changed.clone()));
    }

    fn on_auth_failure(&self) {
        let _ = self.events.send(PanelEvent::AuthFailed);
    }
}

pub async fn run(ctx: &AppContext, args: WatchArgs) -> AppResult<()> {
    let poll_interval = match args.interval_secs {
        Some(secs) => interval_from_secs(secs)?,
        None => ctx.config.poll_interval,
    };
    let filter = PanelFilter {
        search: args.search.clone(),
        status: args.status.clone(),
        order: args.order,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let renderer = Arc::new(ContentRenderer::new(ctx.issue_tracker.clone()));
    let scheduler = PollingScheduler::new(
        ctx.page.clone(),
        TicketReconciler::new(ctx.issue_tracker.clone(), renderer),
        Session::new(
            ctx.config.cooldown,
            ctx.config.notification_lifetime,
            Arc::new(SystemClock),
        ),
        Arc::new(ChannelObserver { events: tx }),
        SchedulerSettings {
            poll_interval,
            rescan_debounce: ctx.config.rescan_debounce,
        },
    );

    scheduler.start().await?;
    info!(interval_secs = poll_interval.as_secs(), "watching page for tickets");

    let mut shown = HashSet::new();
    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    let outcome = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break Ok(()),
            line = input.next_line(), if input_open => match line {
                Ok(Some(line)) => {
                    let changed = match PanelCommand::parse(&line) {
                        Ok(Some(command)) => execute(ctx, &scheduler, command).await,
                        Ok(None) => continue,
                        Err(error) => Err(error),
                    };
                    match changed {
                        Ok(true) => {
                            let snapshot = scheduler.snapshot(&filter).await;
                            let html = args.html.as_deref();
                            if let Err(error) = publish(&snapshot, &BTreeSet::new(), html, &mut shown).await {
                                break Err(error);
                            }
                        }
                        Ok(false) => {}
                        Err(error) => eprintln!("  ! {error}"),
                    }
                }
                Ok(None) => input_open = false,
                Err(error) => {
                    debug!(error = %error, "stdin closed");
                    input_open = false;
                }
            },
            event = rx.recv() => match event {
                Some(PanelEvent::Reconciled(changed)) => {
                    let snapshot = scheduler.snapshot(&filter).await;
                    if let Err(error) = publish(&snapshot, &changed, args.html.as_deref(), &mut shown).await {
                        break Err(error);
                    }
                }
                Some(PanelEvent::AuthFailed) => {
                    break Err(AppError::Auth(
                        "Jira rejected the credentials; run `spotter config init` to log in again"
                            .to_string(),
                    ));
                }
                None => break Ok(()),
            },
        }
    };

    scheduler.stop().await?;
    outcome
}

/// Runs one typed command. Returns whether the panel should be republished.
async fn execute(
    ctx: &AppContext,
    scheduler: &PollingScheduler,
    command: PanelCommand,
) -> AppResult<bool> {
    match command {
        PanelCommand::Status { id, status } => {
            actions::change_status(ctx, scheduler, &id, &status).await?;
            Ok(true)
        }
        PanelCommand::Comment { id, body, attach } => {
            let upload = match attach {
                Some(path) => Some(read_upload(&path).await?),
                None => None,
            };
            actions::add_comment(ctx, scheduler, &id, &body, upload).await?;
            Ok(true)
        }
        PanelCommand::Click { selector } => {
            actions::click_tag_reference(ctx, &selector).await?;
            Ok(false)
        }
        PanelCommand::Tags { id } => {
            let selectors = tag_references(scheduler, &id).await;
            if selectors.is_empty() {
                println!("  {id} references no elements");
            }
            for selector in selectors {
                println!("  {selector}");
            }
            Ok(false)
        }
        PanelCommand::Dismiss { notification } => {
            if !actions::dismiss_notification(scheduler, notification).await {
                println!("  no notification {notification}");
            }
            Ok(false)
        }
        PanelCommand::Refresh => {
            let outcome = scheduler.reconcile_now().await?;
            if matches!(outcome, TickOutcome::Stopped | TickOutcome::Halted) {
                println!("  polling is not running");
            }
            Ok(false)
        }
        PanelCommand::Rescan => {
            scheduler.request_rescan();
            Ok(false)
        }
        PanelCommand::Show => Ok(true),
        PanelCommand::Help => {
            println!("{HELP}");
            Ok(false)
        }
    }
}

async fn tag_references(scheduler: &PollingScheduler, id: &TicketId) -> Vec<String> {
    let session = scheduler.session().lock().await;
    let Some(view) = session.panel.get(id) else {
        return Vec::new();
    };
    let mut selectors: Vec<String> = Vec::new();
    let bodies = std::iter::once(&view.description).chain(view.comments.iter().map(|c| &c.body));
    for body in bodies {
        for selector in body.tag_selectors() {
            if !selectors.iter().any(|known| known == selector) {
                selectors.push(selector.to_string());
            }
        }
    }
    selectors
}

async fn publish(
    snapshot: &PanelSnapshot,
    changed: &BTreeSet<TicketId>,
    html_path: Option<&Path>,
    shown: &mut HashSet<u64>,
) -> AppResult<()> {
    println!("{}", summary_line(snapshot, changed));
    for notification in &snapshot.notifications {
        if !shown.insert(notification.id) {
            continue;
        }
        match notification.kind {
            NotificationKind::Error => {
                eprintln!("  ! [{}] {}", notification.id, notification.message)
            }
            NotificationKind::Success => {
                println!("  [{}] {}", notification.id, notification.message)
            }
        }
    }

    if let Some(path) = html_path {
        tokio::fs::write(path, &snapshot.html).await?;
        debug!(path = %path.display(), "panel written");
    }
    Ok(())
}

fn summary_line(snapshot: &PanelSnapshot, changed: &BTreeSet<TicketId>) -> String {
    let on_page = snapshot
        .ticket_ids
        .iter()
        .map(TicketId::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    let on_page = if on_page.is_empty() {
        "none".to_string()
    } else {
        on_page
    };
    format!(
        "{} ticket(s) on page ({on_page}); {} changed",
        snapshot.ticket_ids.len(),
        changed.len()
    )
}
