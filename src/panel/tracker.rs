use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::clock::Clock;
use crate::domain::ticket::TicketId;
use crate::panel::node::Fragment;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Description,
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerKey {
    scope: TicketId,
    kind: ContentKind,
    sub_id: Option<String>,
}

impl TrackerKey {
    pub fn description(scope: &TicketId) -> Self {
        Self {
            scope: scope.clone(),
            kind: ContentKind::Description,
            sub_id: None,
        }
    }

    pub fn comment(scope: &TicketId, comment_id: &str) -> Self {
        Self {
            scope: scope.clone(),
            kind: ContentKind::Comment,
            sub_id: Some(comment_id.to_string()),
        }
    }

    pub fn scope(&self) -> &TicketId {
        &self.scope
    }
}

impl fmt::Display for TrackerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, &self.sub_id) {
            (ContentKind::Description, _) => write!(f, "{}-description", self.scope),
            (ContentKind::Comment, Some(sub)) => write!(f, "{}-comment-{sub}", self.scope),
            (ContentKind::Comment, None) => write!(f, "{}-comment", self.scope),
        }
    }
}

#[derive(Default)]
struct TrackedContent {
    raw: Option<String>,
    rendered: Option<Fragment>,
    updated_at: Option<Instant>,
}

pub struct ContentTracker {
    entries: HashMap<TrackerKey, TrackedContent>,
    cooldown: Duration,
    clock: Arc<dyn Clock>,
}

impl ContentTracker {
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            cooldown,
            clock,
        }
    }

    /// True when `raw` differs from what was last accepted for `key` and the
    /// cooldown since that acceptance has passed. Accepting records `raw`.
    pub fn should_update(&mut self, key: &TrackerKey, raw: &str) -> bool {
        if self.wants_update(key, raw) {
            self.accept(key, raw);
            return true;
        }
        if let Some(entry) = self.entries.get_mut(key) {
            if entry.raw.as_deref() != Some(raw) {
                entry.rendered = None;
            }
        }
        false
    }

    /// Same decision as `should_update`, without recording anything.
    pub fn wants_update(&self, key: &TrackerKey, raw: &str) -> bool {
        let Some(entry) = self.entries.get(key) else {
            return true;
        };

        if let Some(updated_at) = entry.updated_at {
            if self.clock.now().saturating_duration_since(updated_at) < self.cooldown {
                debug!(key = %key, "skipping update, too soon");
                return false;
            }
        }

        if entry.raw.as_deref() == Some(raw) {
            debug!(key = %key, "skipping update, content unchanged");
            return false;
        }
        true
    }

    pub fn accept(&mut self, key: &TrackerKey, raw: &str) {
        let now = self.clock.now();
        let entry = self.entries.entry(key.clone()).or_default();
        entry.raw = Some(raw.to_string());
        entry.rendered = None;
        entry.updated_at = Some(now);
    }

    pub fn get_cache(&self, key: &TrackerKey) -> Option<&Fragment> {
        self.entries.get(key).and_then(|entry| entry.rendered.as_ref())
    }

    pub fn cached_for(&self, key: &TrackerKey, raw: &str) -> Option<&Fragment> {
        if !self.holds(key, raw) {
            return None;
        }
        self.get_cache(key)
    }

    pub fn set_cache(&mut self, key: &TrackerKey, rendered: Fragment) {
        self.entries.entry(key.clone()).or_default().rendered = Some(rendered);
    }

    pub fn cache_for(&mut self, key: &TrackerKey, raw: &str, rendered: Fragment) {
        if self.holds(key, raw) {
            self.set_cache(key, rendered);
        }
    }

    fn holds(&self, key: &TrackerKey, raw: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.raw.as_deref() == Some(raw))
    }

    pub fn cleanup(&mut self, scope: &TicketId) {
        let before = self.entries.len();
        self.entries.retain(|key, _| key.scope() != scope);
        debug!(ticket = %scope, removed = before - self.entries.len(), "cleaned up tracked content");
    }

    pub fn cleanup_removed(&mut self, active: &BTreeSet<TicketId>) {
        let stale: BTreeSet<TicketId> = self
            .entries
            .keys()
            .map(|key| key.scope().clone())
            .filter(|scope| !active.contains(scope))
            .collect();
        for scope in stale {
            self.cleanup(&scope);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub fn scopes(&self) -> BTreeSet<TicketId> {
        self.entries.keys().map(|key| key.scope().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::node::Node;
    use crate::test_support::{ManualClock, id, ids};

    fn tracker() -> (ContentTracker, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (ContentTracker::new(DEFAULT_COOLDOWN, clock.clone()), clock)
    }

    fn fragment(text: &str) -> Fragment {
        Fragment(vec![Node::text(text)])
    }

    #[test]
    fn key_display_matches_scope_kind_and_sub_id() {
        let scope = id("PROJ-1");
        assert_eq!(TrackerKey::description(&scope).to_string(), "PROJ-1-description");
        assert_eq!(TrackerKey::comment(&scope, "42").to_string(), "PROJ-1-comment-42");
    }

    #[test]
    fn identical_content_is_accepted_once() {
        let (mut tracker, _) = tracker();
        let key = TrackerKey::description(&id("PROJ-1"));
        assert!(tracker.should_update(&key, "body"));
        assert!(!tracker.should_update(&key, "body"));
    }

    #[test]
    fn changed_content_is_throttled_within_cooldown() {
        let (mut tracker, clock) = tracker();
        let key = TrackerKey::description(&id("PROJ-1"));
        assert!(tracker.should_update(&key, "v1"));
        clock.advance(Duration::from_millis(1999));
        assert!(!tracker.should_update(&key, "v2"));
        clock.advance(Duration::from_millis(1));
        assert!(tracker.should_update(&key, "v2"));
    }

    #[test]
    fn unchanged_content_stays_rejected_after_cooldown() {
        let (mut tracker, clock) = tracker();
        let key = TrackerKey::comment(&id("PROJ-1"), "7");
        assert!(tracker.should_update(&key, "same"));
        clock.advance(Duration::from_secs(10));
        assert!(!tracker.should_update(&key, "same"));
    }

    #[test]
    fn cache_is_last_write_wins_and_invalidated_by_new_content() {
        let (mut tracker, clock) = tracker();
        let key = TrackerKey::description(&id("PROJ-1"));
        assert!(tracker.get_cache(&key).is_none());

        tracker.should_update(&key, "v1");
        tracker.set_cache(&key, fragment("a"));
        tracker.set_cache(&key, fragment("b"));
        assert_eq!(tracker.get_cache(&key), Some(&fragment("b")));

        clock.advance(Duration::from_millis(500));
        assert!(!tracker.should_update(&key, "v2"));
        assert!(tracker.get_cache(&key).is_none());
    }

    #[test]
    fn checking_records_nothing_until_accepted() {
        let (mut tracker, clock) = tracker();
        let key = TrackerKey::description(&id("PROJ-1"));

        assert!(tracker.wants_update(&key, "v1"));
        assert!(tracker.wants_update(&key, "v1"));
        tracker.accept(&key, "v1");
        tracker.cache_for(&key, "v1", fragment("one"));
        assert!(!tracker.wants_update(&key, "v1"));

        clock.advance(Duration::from_secs(3));
        assert!(tracker.wants_update(&key, "v2"));
        tracker.cache_for(&key, "v2", fragment("two"));
        assert_eq!(tracker.cached_for(&key, "v1"), Some(&fragment("one")));
        assert!(tracker.cached_for(&key, "v2").is_none());
    }

    #[test]
    fn cleanup_purges_one_scope_without_prefix_collisions() {
        let (mut tracker, _) = tracker();
        tracker.should_update(&TrackerKey::description(&id("PROJ-1")), "a");
        tracker.should_update(&TrackerKey::comment(&id("PROJ-1"), "1"), "b");
        tracker.should_update(&TrackerKey::description(&id("PROJ-12")), "c");

        tracker.cleanup(&id("PROJ-1"));

        assert_eq!(tracker.scopes(), ids(&["PROJ-12"]));
    }

    #[test]
    fn cleanup_removed_keeps_only_active_scopes() {
        let (mut tracker, _) = tracker();
        for scope in ["A-1", "B-2", "C-3"] {
            tracker.should_update(&TrackerKey::description(&id(scope)), "x");
        }

        tracker.cleanup_removed(&ids(&["B-2"]));

        assert_eq!(tracker.scopes(), ids(&["B-2"]));
    }
}
