use std::time::{Duration, Instant};

use tracing::debug;

use crate::domain::ticket::TicketId;

pub const DEFAULT_LIFETIME: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Error,
    Success,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub id: u64,
    pub scope: Option<TicketId>,
    pub kind: NotificationKind,
    pub message: String,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct Notifications {
    items: Vec<Notification>,
    next_id: u64,
    lifetime: Duration,
}

impl Notifications {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            items: Vec::new(),
            next_id: 1,
            lifetime,
        }
    }

    pub fn push(
        &mut self,
        scope: Option<TicketId>,
        kind: NotificationKind,
        message: impl Into<String>,
        now: Instant,
    ) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        let message = message.into();
        debug!(id, scope = ?scope.as_ref().map(TicketId::as_str), %message, "notification raised");
        self.items.push(Notification {
            id,
            scope,
            kind,
            message,
            expires_at: now + self.lifetime,
        });
        id
    }

    pub fn error(&mut self, scope: Option<TicketId>, message: impl Into<String>, now: Instant) -> u64 {
        self.push(scope, NotificationKind::Error, message, now)
    }

    pub fn success(&mut self, scope: Option<TicketId>, message: impl Into<String>, now: Instant) -> u64 {
        self.push(scope, NotificationKind::Success, message, now)
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.items.len();
        self.items.retain(|item| item.id != id);
        before != self.items.len()
    }

    /// Unexpired notifications, oldest first. Expired ones are dropped.
    pub fn active(&mut self, now: Instant) -> &[Notification] {
        self.items.retain(|item| item.expires_at > now);
        &self.items
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::id;

    #[test]
    fn notifications_expire_after_their_lifetime() {
        let start = Instant::now();
        let mut notifications = Notifications::new(DEFAULT_LIFETIME);
        notifications.error(Some(id("PROJ-1")), "fetch failed", start);
        notifications.success(None, "saved", start + Duration::from_secs(3));

        assert_eq!(notifications.active(start + Duration::from_secs(4)).len(), 2);
        let remaining = notifications.active(start + Duration::from_secs(5));
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "saved");
    }

    #[test]
    fn dismiss_removes_only_the_named_notification() {
        let now = Instant::now();
        let mut notifications = Notifications::new(DEFAULT_LIFETIME);
        let first = notifications.error(None, "one", now);
        notifications.error(None, "two", now);

        assert!(notifications.dismiss(first));
        assert!(!notifications.dismiss(first));
        let active = notifications.active(now);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].message, "two");
    }
}
