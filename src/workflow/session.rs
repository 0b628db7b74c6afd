use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::clock::Clock;
use crate::domain::ticket::TicketId;
use crate::panel::notifications::Notifications;
use crate::panel::tracker::ContentTracker;
use crate::panel::view::PanelViewState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    Hidden,
    Logout,
    AuthExpired,
}

/// `epoch` moves on every start and stop; results from an older epoch are stale.
pub struct Session {
    phase: Phase,
    epoch: u64,
    last_known: Option<BTreeSet<TicketId>>,
    pub panel: PanelViewState,
    pub tracker: ContentTracker,
    pub notifications: Notifications,
    clock: Arc<dyn Clock>,
}

impl Session {
    pub fn new(cooldown: Duration, notification_lifetime: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            phase: Phase::Stopped,
            epoch: 0,
            last_known: None,
            panel: PanelViewState::new(),
            tracker: ContentTracker::new(cooldown, Arc::clone(&clock)),
            notifications: Notifications::new(notification_lifetime),
            clock,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_current(&self, epoch: u64) -> bool {
        self.is_running() && self.epoch == epoch
    }

    pub fn begin(&mut self) -> Option<u64> {
        if self.is_running() {
            return None;
        }
        self.phase = Phase::Running;
        self.epoch += 1;
        self.last_known = None;
        info!(epoch = self.epoch, "session started");
        Some(self.epoch)
    }

    pub fn teardown(&mut self, reason: Teardown) -> bool {
        let was_running = self.is_running();
        self.phase = Phase::Stopped;
        self.epoch += 1;
        self.last_known = None;
        self.tracker.clear();
        if reason == Teardown::Logout {
            self.panel.clear();
            self.notifications.clear();
        }
        if was_running {
            info!(?reason, epoch = self.epoch, "session stopped");
        }
        was_running
    }

    pub fn last_known(&self) -> Option<&BTreeSet<TicketId>> {
        self.last_known.as_ref()
    }

    pub fn set_last_known(&mut self, ids: BTreeSet<TicketId>) {
        self.last_known = Some(ids);
    }

    pub fn invalidate_last_known(&mut self) {
        self.last_known = None;
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }

    pub fn notify_error(&mut self, scope: Option<TicketId>, message: impl Into<String>) -> u64 {
        let now = self.clock.now();
        self.notifications.error(scope, message, now)
    }

    pub fn notify_success(&mut self, scope: Option<TicketId>, message: impl Into<String>) -> u64 {
        let now = self.clock.now();
        self.notifications.success(scope, message, now)
    }
}
