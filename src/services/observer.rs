use std::collections::BTreeSet;

use crate::domain::ticket::TicketId;

pub trait PanelObserver: Send + Sync {
    fn on_reconcile_complete(&self, _changed: &BTreeSet<TicketId>) {}

    /// Called once per session when the tracker rejects our credentials.
    fn on_auth_failure(&self) {}
}

pub struct NoopObserver;

impl PanelObserver for NoopObserver {}
