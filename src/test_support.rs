use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use crate::clock::Clock;
use crate::domain::ticket::{
    AttachmentBlob, AttachmentRef, AttachmentUpload, CommentRecord, TicketId, TicketRecord,
};
use crate::error::{AppError, AppResult};
use crate::services::{IssueTrackerService, PageService};

pub fn id(raw: &str) -> TicketId {
    TicketId::parse(raw).expect("valid key")
}

pub fn ids(raw: &[&str]) -> BTreeSet<TicketId> {
    raw.iter().map(|r| id(r)).collect()
}

pub fn at_minute(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 16, 12, minute, 0).unwrap()
}

pub fn ticket(raw_id: &str, status: &str, description: &str) -> TicketRecord {
    TicketRecord {
        id: id(raw_id),
        status: status.to_string(),
        summary: format!("Summary of {raw_id}"),
        description_raw: description.to_string(),
        comments: Vec::new(),
        created_at: Some(at_minute(0)),
        attachments: Vec::new(),
    }
}

pub fn comment(comment_id: &str, body: &str, minute: u32) -> CommentRecord {
    CommentRecord {
        id: comment_id.to_string(),
        author: "Dana".to_string(),
        body_raw: body.to_string(),
        created_at: at_minute(minute),
    }
}

pub fn attachment(attachment_id: &str, filename: &str) -> AttachmentRef {
    AttachmentRef {
        id: attachment_id.to_string(),
        filename: filename.to_string(),
    }
}

pub fn png(byte: u8) -> AttachmentBlob {
    AttachmentBlob {
        content_type: Some("image/png".to_string()),
        bytes: vec![byte],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Auth,
    Network,
    NotFound,
}

impl Failure {
    pub fn to_error(self, what: &str) -> AppError {
        match self {
            Failure::Auth => AppError::Auth(format!("{what}: 401")),
            Failure::Network => AppError::Network(format!("{what}: connection reset")),
            Failure::NotFound => AppError::NotFound(what.to_string()),
        }
    }
}

#[derive(Default)]
pub struct StubTracker {
    pub tickets: Mutex<HashMap<TicketId, TicketRecord>>,
    pub fetch_failures: Mutex<HashMap<TicketId, Failure>>,
    pub blobs: Mutex<HashMap<String, AttachmentBlob>>,
    pub status_failure: Mutex<Option<Failure>>,
    pub fetch_calls: Mutex<Vec<TicketId>>,
    pub resolve_calls: Mutex<Vec<String>>,
    pub status_updates: Mutex<Vec<(TicketId, String)>>,
    pub added_comments: Mutex<Vec<(TicketId, String)>>,
    pub uploads: Mutex<Vec<(TicketId, String)>>,
}

impl StubTracker {
    pub fn put(&self, record: TicketRecord) {
        self.tickets
            .lock()
            .expect("tickets lock")
            .insert(record.id.clone(), record);
    }

    pub fn fail_fetch(&self, raw_id: &str, failure: Failure) {
        self.fetch_failures
            .lock()
            .expect("failures lock")
            .insert(id(raw_id), failure);
    }

    pub fn put_blob(&self, attachment_id: &str, blob: AttachmentBlob) {
        self.blobs
            .lock()
            .expect("blobs lock")
            .insert(attachment_id.to_string(), blob);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetch_calls.lock().expect("calls lock").len()
    }

    pub fn resolve_count(&self) -> usize {
        self.resolve_calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl IssueTrackerService for StubTracker {
    async fn fetch_ticket(&self, id: &TicketId) -> AppResult<TicketRecord> {
        self.fetch_calls.lock().expect("calls lock").push(id.clone());
        if let Some(failure) = self.fetch_failures.lock().expect("failures lock").get(id) {
            return Err(failure.to_error(id.as_str()));
        }
        self.tickets
            .lock()
            .expect("tickets lock")
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    async fn update_ticket_status(&self, id: &TicketId, status: &str) -> AppResult<()> {
        if let Some(failure) = *self.status_failure.lock().expect("failure lock") {
            return Err(failure.to_error("transition"));
        }
        self.status_updates
            .lock()
            .expect("updates lock")
            .push((id.clone(), status.to_string()));
        Ok(())
    }

    async fn upload_attachment(&self, id: &TicketId, upload: &AttachmentUpload) -> AppResult<()> {
        self.uploads
            .lock()
            .expect("uploads lock")
            .push((id.clone(), upload.filename.clone()));
        Ok(())
    }

    async fn post_comment(&self, id: &TicketId, body: &str) -> AppResult<CommentRecord> {
        let mut added = self.added_comments.lock().expect("comments lock");
        added.push((id.clone(), body.to_string()));
        Ok(CommentRecord {
            id: format!("new-{}", added.len()),
            author: "You".to_string(),
            body_raw: body.to_string(),
            created_at: at_minute(59),
        })
    }

    async fn resolve_attachment(&self, attachment_id: &str) -> AppResult<AttachmentBlob> {
        self.resolve_calls
            .lock()
            .expect("calls lock")
            .push(attachment_id.to_string());
        self.blobs
            .lock()
            .expect("blobs lock")
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("attachment {attachment_id}")))
    }
}

#[derive(Default)]
pub struct StubPage {
    pub current: Mutex<BTreeSet<TicketId>>,
    pub scans: Mutex<usize>,
    pub highlighted: Mutex<Vec<String>>,
}

impl StubPage {
    pub fn show(&self, raw: &[&str]) {
        *self.current.lock().expect("page lock") = ids(raw);
    }

    pub fn scan_count(&self) -> usize {
        *self.scans.lock().expect("scan lock")
    }
}

#[async_trait]
impl PageService for StubPage {
    async fn scan_for_task_ids(&self) -> AppResult<BTreeSet<TicketId>> {
        *self.scans.lock().expect("scan lock") += 1;
        Ok(self.current.lock().expect("page lock").clone())
    }

    async fn highlight_selector(&self, selector: &str) {
        self.highlighted
            .lock()
            .expect("highlight lock")
            .push(selector.to_string());
    }
}

pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().expect("clock lock") += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock().expect("clock lock")
    }
}
