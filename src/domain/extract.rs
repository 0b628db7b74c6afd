use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::domain::ticket::TicketId;

static MARKER_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)jira-taskid="([^"]+)""#).expect("marker attribute pattern")
});

static MARKER_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)/\*[\s\S]*?jira-taskid[=:]?\s*["']?([^"'\s*]+)["']?[\s\S]*?\*/|//[^\n]*?jira-taskid[=:]?\s*["']?([^"'\s]+)["']?"#,
    )
    .expect("marker comment pattern")
});

static BARE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z]+-[0-9]+\b").expect("bare key pattern"));

/// Finds every ticket key mentioned in `text`, from markers and bare tokens alike.
pub fn extract_task_ids(text: &str) -> BTreeSet<TicketId> {
    let mut found = BTreeSet::new();

    for captures in MARKER_ATTRIBUTE.captures_iter(text) {
        push_candidate(&mut found, &captures[1]);
    }

    for captures in MARKER_COMMENT.captures_iter(text) {
        if let Some(block) = captures.get(1) {
            push_candidate(&mut found, block.as_str());
        }
        if let Some(line) = captures.get(2) {
            push_candidate(&mut found, line.as_str());
        }
    }

    for bare in BARE_KEY.find_iter(text) {
        push_candidate(&mut found, bare.as_str());
    }

    found
}

fn push_candidate(found: &mut BTreeSet<TicketId>, raw: &str) {
    match TicketId::parse(raw) {
        Ok(id) => {
            found.insert(id);
        }
        Err(_) => debug!(candidate = raw, "ignoring marker that is not a ticket key"),
    }
}
