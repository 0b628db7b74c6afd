use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::domain::ticket::{AttachmentRef, CommentRecord, TicketId};
use crate::error::AppError;
use crate::panel::node::{Element, Fragment, Node};

pub const NO_DESCRIPTION: &str = "No description";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentView {
    pub id: String,
    pub author: String,
    pub body_raw: String,
    pub created_at: DateTime<Utc>,
    pub body: Fragment,
}

impl CommentView {
    pub fn new(record: &CommentRecord, body: Fragment) -> Self {
        Self {
            id: record.id.clone(),
            author: record.author.clone(),
            body_raw: record.body_raw.clone(),
            created_at: record.created_at,
            body,
        }
    }

    /// Composite identity used when merging duplicate entries: creation time
    /// plus the body with whitespace collapsed.
    pub fn dedup_key(&self) -> blake3::Hash {
        let normalized = self.body_raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.created_at.to_rfc3339().as_bytes());
        hasher.update(b"\n");
        hasher.update(normalized.as_bytes());
        hasher.finalize()
    }

    fn to_element(&self) -> Element {
        Element::new("div")
            .class("comment")
            .attr("data-comment-id", self.id.clone())
            .attr("data-created-at", self.created_at.to_rfc3339())
            .child(
                Element::new("div")
                    .class("comment-header")
                    .child(Element::new("span").class("comment-author").text(self.author.clone()))
                    .child(
                        Element::new("span")
                            .class("comment-date")
                            .text(self.created_at.format("%Y-%m-%d %H:%M").to_string()),
                    ),
            )
            .child(
                Element::new("div")
                    .class("comment-body")
                    .children(self.body.nodes().iter().cloned()),
            )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketView {
    pub id: TicketId,
    pub status: String,
    pub summary: String,
    pub created_at: Option<DateTime<Utc>>,
    pub attachments: Vec<AttachmentRef>,
    pub description: Fragment,
    pub comments: Vec<CommentView>,
}

impl TicketView {
    pub fn comment(&self, comment_id: &str) -> Option<&CommentView> {
        self.comments.iter().find(|comment| comment.id == comment_id)
    }

    fn matches(&self, filter: &PanelFilter) -> bool {
        if let Some(status) = &filter.status {
            if !self.status.eq_ignore_ascii_case(status) {
                return false;
            }
        }
        let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return true;
        };
        let needle = search.to_lowercase();
        [self.id.as_str(), self.summary.as_str(), self.status.as_str()]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle))
    }

    pub fn to_element(&self) -> Element {
        let description = if self.description.nodes().is_empty() {
            vec![Node::text(NO_DESCRIPTION)]
        } else {
            self.description.nodes().to_vec()
        };

        Element::new("div")
            .class("ticket-item")
            .attr("data-task-id", self.id.as_str())
            .child(
                Element::new("div")
                    .class("ticket-header")
                    .child(Element::new("span").class("ticket-key").text(self.id.as_str()))
                    .child(Element::new("span").class("ticket-status").text(self.status.clone())),
            )
            .child(Element::new("div").class("ticket-summary").text(self.summary.clone()))
            .child(Element::new("div").class("ticket-description").children(description))
            .child(
                Element::new("div")
                    .class("comments-container")
                    .children(self.comments.iter().map(|comment| comment.to_element().into())),
            )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl FromStr for SortOrder {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            other => Err(AppError::Validation(format!(
                "unknown sort order '{other}', expected newest or oldest"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PanelFilter {
    pub search: Option<String>,
    pub status: Option<String>,
    pub order: SortOrder,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SettleReport {
    pub merged: Vec<TicketId>,
    pub dropped_comments: usize,
}

#[derive(Debug, Default)]
pub struct PanelViewState {
    tickets: BTreeMap<TicketId, TicketView>,
    staged: Vec<TicketView>,
}

impl PanelViewState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &TicketId) -> Option<&TicketView> {
        self.tickets.get(id)
    }

    pub fn get_mut(&mut self, id: &TicketId) -> Option<&mut TicketView> {
        self.tickets.get_mut(id)
    }

    pub fn contains(&self, id: &TicketId) -> bool {
        self.tickets.contains_key(id)
    }

    pub fn ids(&self) -> BTreeSet<TicketId> {
        self.tickets.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    pub fn stage(&mut self, view: TicketView) {
        self.staged.push(view);
    }

    pub fn settle(&mut self) -> SettleReport {
        let mut report = SettleReport::default();
        for view in std::mem::take(&mut self.staged) {
            match self.tickets.get_mut(&view.id) {
                Some(primary) => {
                    let id = view.id.clone();
                    report.dropped_comments += merge_into(primary, view);
                    info!(ticket = %id, "merged duplicate ticket entry");
                    if !report.merged.contains(&id) {
                        report.merged.push(id);
                    }
                }
                None => {
                    self.tickets.insert(view.id.clone(), view);
                }
            }
        }
        report
    }

    pub fn remove(&mut self, id: &TicketId) -> Option<TicketView> {
        self.tickets.remove(id)
    }

    pub fn retain_only(&mut self, active: &BTreeSet<TicketId>) -> Vec<TicketId> {
        let removed: Vec<TicketId> = self
            .tickets
            .keys()
            .filter(|id| !active.contains(*id))
            .cloned()
            .collect();
        for id in &removed {
            self.tickets.remove(id);
            debug!(ticket = %id, "removed ticket entry");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.tickets.clear();
        self.staged.clear();
    }

    pub fn visible(&self, filter: &PanelFilter) -> Vec<&TicketView> {
        let mut views: Vec<&TicketView> = self
            .tickets
            .values()
            .filter(|view| view.matches(filter))
            .collect();
        match filter.order {
            SortOrder::Newest => views.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::Oldest => views.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
        views
    }

    pub fn to_html(&self, filter: &PanelFilter) -> String {
        let visible = self.visible(filter);
        let list = if visible.is_empty() {
            Element::new("div")
                .class("task-list")
                .child(Element::new("div").class("no-tasks").text("No tickets on this page"))
        } else {
            Element::new("div")
                .class("task-list")
                .children(visible.into_iter().map(|view| view.to_element().into()))
        };
        Fragment(vec![list.into()]).to_html()
    }
}

fn merge_into(primary: &mut TicketView, secondary: TicketView) -> usize {
    primary.comments.extend(secondary.comments);
    for attachment in secondary.attachments {
        if !primary.attachments.iter().any(|known| known.id == attachment.id) {
            primary.attachments.push(attachment);
        }
    }
    normalize_comments(&mut primary.comments)
}

/// Sorts comments oldest first and drops repeats of the same timestamp and
/// body, keeping the first occurrence.
pub fn normalize_comments(comments: &mut Vec<CommentView>) -> usize {
    comments.sort_by_key(|comment| comment.created_at);
    let before = comments.len();
    let mut seen = HashSet::new();
    comments.retain(|comment| seen.insert(comment.dedup_key()));
    before - comments.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at_minute, comment, id, ids};

    fn comment_view(comment_id: &str, body: &str, minute: u32) -> CommentView {
        CommentView::new(&comment(comment_id, body, minute), Fragment(vec![Node::text(body)]))
    }

    fn view(raw_id: &str, minute: u32, comments: Vec<CommentView>) -> TicketView {
        TicketView {
            id: id(raw_id),
            status: "To Do".to_string(),
            summary: format!("Summary of {raw_id}"),
            created_at: Some(at_minute(minute)),
            attachments: Vec::new(),
            description: Fragment::default(),
            comments,
        }
    }

    fn comment_ids(view: &TicketView) -> Vec<&str> {
        view.comments.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn duplicate_entries_merge_into_one_with_sorted_unique_comments() {
        let mut panel = PanelViewState::new();
        panel.stage(view(
            "PROJ-1",
            0,
            vec![comment_view("1", "first", 1), comment_view("3", "third", 3)],
        ));
        panel.stage(view(
            "PROJ-1",
            0,
            vec![
                comment_view("2", "second", 2),
                comment_view("1b", "  first ", 1),
                comment_view("4", "fourth", 4),
            ],
        ));

        let report = panel.settle();

        assert_eq!(panel.len(), 1);
        assert_eq!(report.merged, vec![id("PROJ-1")]);
        assert_eq!(report.dropped_comments, 1);
        let merged = panel.get(&id("PROJ-1")).expect("entry");
        assert_eq!(comment_ids(merged), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn same_body_at_different_times_is_not_a_duplicate() {
        let mut comments = vec![comment_view("a", "+1", 5), comment_view("b", "+1", 6)];
        assert_eq!(normalize_comments(&mut comments), 0);
        assert_eq!(comments.len(), 2);
    }

    #[test]
    fn existing_entry_stays_primary_when_a_duplicate_is_staged() {
        let mut panel = PanelViewState::new();
        panel.stage(view("PROJ-1", 0, vec![comment_view("1", "one", 1)]));
        panel.settle();
        panel.get_mut(&id("PROJ-1")).expect("entry").status = "Done".to_string();

        let mut duplicate = view("PROJ-1", 0, vec![comment_view("2", "two", 2)]);
        duplicate.status = "Stale".to_string();
        panel.stage(duplicate);
        panel.settle();

        let entry = panel.get(&id("PROJ-1")).expect("entry");
        assert_eq!(entry.status, "Done");
        assert_eq!(comment_ids(entry), vec!["1", "2"]);
    }

    #[test]
    fn retain_only_reports_removed_ids() {
        let mut panel = PanelViewState::new();
        for raw in ["A-1", "B-2", "C-3"] {
            panel.stage(view(raw, 0, Vec::new()));
        }
        panel.settle();

        let removed = panel.retain_only(&ids(&["B-2"]));

        assert_eq!(removed, vec![id("A-1"), id("C-3")]);
        assert_eq!(panel.ids(), ids(&["B-2"]));
    }

    #[test]
    fn visible_filters_by_search_and_status_and_sorts_by_creation() {
        let mut panel = PanelViewState::new();
        let mut done = view("WEB-7", 10, Vec::new());
        done.status = "Done".to_string();
        done.summary = "Fix login button".to_string();
        panel.stage(done);
        panel.stage(view("WEB-8", 20, Vec::new()));
        panel.stage(view("API-1", 5, Vec::new()));
        panel.settle();

        let newest: Vec<_> = panel
            .visible(&PanelFilter::default())
            .iter()
            .map(|v| v.id.as_str())
            .collect();
        assert_eq!(newest, vec!["WEB-8", "WEB-7", "API-1"]);

        let filter = PanelFilter {
            search: Some("web".to_string()),
            status: None,
            order: SortOrder::Oldest,
        };
        let oldest: Vec<_> = panel.visible(&filter).iter().map(|v| v.id.as_str()).collect();
        assert_eq!(oldest, vec!["WEB-7", "WEB-8"]);

        let filter = PanelFilter {
            search: Some("LOGIN".to_string()),
            status: Some("done".to_string()),
            order: SortOrder::Newest,
        };
        assert_eq!(panel.visible(&filter).len(), 1);
    }

    #[test]
    fn html_projection_marks_entries_and_empty_descriptions() {
        let mut panel = PanelViewState::new();
        panel.stage(view("PROJ-1", 0, vec![comment_view("9", "hello", 1)]));
        panel.settle();

        let html = panel.to_html(&PanelFilter::default());

        assert!(html.contains("data-task-id=\"PROJ-1\""));
        assert!(html.contains("<div class=\"ticket-description\">No description</div>"));
        assert!(html.contains("data-comment-id=\"9\""));
        assert!(PanelViewState::new()
            .to_html(&PanelFilter::default())
            .contains("No tickets on this page"));
    }

    #[test]
    fn sort_order_parses_case_insensitively() {
        assert_eq!("Oldest".parse::<SortOrder>().ok(), Some(SortOrder::Oldest));
        assert!("sideways".parse::<SortOrder>().is_err());
    }
}
