use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::domain::ticket::TicketId;
use crate::error::{AppError, AppResult};
use crate::panel::notifications::Notification;
use crate::panel::reconcile::{ReconcileReport, TicketReconciler};
use crate::panel::render::ContentRenderer;
use crate::panel::view::PanelFilter;
use crate::services::{PageService, PanelObserver};
use crate::workflow::session::{Phase, Session, Teardown};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_RESCAN_DEBOUNCE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub poll_interval: Duration,
    pub rescan_debounce: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            rescan_debounce: DEFAULT_RESCAN_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    InFlight,
    Stopped,
    Unchanged,
    Reconciled(ReconcileReport),
    Halted,
}

impl TickOutcome {
    fn label(&self) -> &'static str {
        match self {
            TickOutcome::InFlight => "in_flight",
            TickOutcome::Stopped => "stopped",
            TickOutcome::Unchanged => "unchanged",
            TickOutcome::Reconciled(_) => "reconciled",
            TickOutcome::Halted => "halted",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PanelSnapshot {
    pub phase: Phase,
    pub ticket_ids: BTreeSet<TicketId>,
    pub html: String,
    pub notifications: Vec<Notification>,
}

#[derive(Debug)]
struct PollerState {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

struct Shared {
    page: Arc<dyn PageService>,
    reconciler: TicketReconciler,
    session: Mutex<Session>,
    observer: Arc<dyn PanelObserver>,
    pass_lock: Mutex<()>,
    rescan_generation: AtomicU64,
}

pub struct PollingScheduler {
    shared: Arc<Shared>,
    poller: Mutex<Option<PollerState>>,
    settings: SchedulerSettings,
}

impl PollingScheduler {
    pub fn new(
        page: Arc<dyn PageService>,
        reconciler: TicketReconciler,
        session: Session,
        observer: Arc<dyn PanelObserver>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                page,
                reconciler,
                session: Mutex::new(session),
                observer,
                pass_lock: Mutex::new(()),
                rescan_generation: AtomicU64::new(0),
            }),
            poller: Mutex::new(None),
            settings,
        }
    }

    pub fn session(&self) -> &Mutex<Session> {
        &self.shared.session
    }

    pub fn renderer(&self) -> &Arc<ContentRenderer> {
        self.shared.reconciler.renderer()
    }

    pub async fn start(&self) -> AppResult<()> {
        let mut guard = self.poller.lock().await;
        if guard.as_ref().is_some_and(|state| !state.task.is_finished()) {
            return Ok(());
        }
        if let Some(finished) = guard.take() {
            join(finished).await?;
        }

        self.shared.session.lock().await.begin();

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let shared = Arc::clone(&self.shared);
        let period = self.settings.poll_interval;
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = interval.tick() => {
                        match shared.tick().await {
                            Ok(TickOutcome::Stopped | TickOutcome::Halted) => break,
                            Ok(outcome) => debug!(outcome = outcome.label(), "poll tick"),
                            Err(error) => warn!(error = %error, "polling tick failed"),
                        }
                    }
                }
            }
            debug!("poll loop exited");
        });

        *guard = Some(PollerState {
            stop_tx: Some(stop_tx),
            task,
        });
        Ok(())
    }

    pub async fn stop(&self) -> AppResult<()> {
        self.shutdown(Teardown::Hidden).await
    }

    pub async fn logout(&self) -> AppResult<()> {
        self.shutdown(Teardown::Logout).await
    }

    async fn shutdown(&self, reason: Teardown) -> AppResult<()> {
        self.shared.session.lock().await.teardown(reason);
        self.shared.reconciler.renderer().clear().await;

        let state = {
            let mut guard = self.poller.lock().await;
            guard.take()
        };
        if let Some(mut state) = state {
            if let Some(stop_tx) = state.stop_tx.take() {
                let _ = stop_tx.send(());
            }
            join(state).await?;
        }
        Ok(())
    }

    pub async fn tick(&self) -> AppResult<TickOutcome> {
        self.shared.tick().await
    }

    pub async fn reconcile_now(&self) -> AppResult<TickOutcome> {
        let _pass = self.shared.pass_lock.lock().await;
        self.shared.run_pass(true).await
    }

    pub fn request_rescan(&self) {
        let generation = self.shared.rescan_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let shared = Arc::clone(&self.shared);
        let delay = self.settings.rescan_debounce;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if shared.rescan_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            let _pass = shared.pass_lock.lock().await;
            match shared.run_pass(false).await {
                Ok(outcome) => debug!(outcome = outcome.label(), "rescan finished"),
                Err(error) => warn!(error = %error, "rescan failed"),
            }
        });
    }

    pub async fn notify_auth_expired(&self) {
        self.shared.halt_for_auth().await;
    }

    pub async fn snapshot(&self, filter: &PanelFilter) -> PanelSnapshot {
        let mut session = self.shared.session.lock().await;
        let now = session.now();
        PanelSnapshot {
            phase: session.phase(),
            ticket_ids: session.panel.ids(),
            html: session.panel.to_html(filter),
            notifications: session.notifications.active(now).to_vec(),
        }
    }

    pub async fn dismiss_notification(&self, id: u64) -> bool {
        self.shared.session.lock().await.notifications.dismiss(id)
    }
}

impl Shared {
    async fn tick(&self) -> AppResult<TickOutcome> {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            debug!("previous pass still running, skipping tick");
            return Ok(TickOutcome::InFlight);
        };
        self.run_pass(false).await
    }

    /// Caller holds `pass_lock`.
    async fn run_pass(&self, force: bool) -> AppResult<TickOutcome> {
        let epoch = {
            let session = self.session.lock().await;
            if !session.is_running() {
                return Ok(TickOutcome::Stopped);
            }
            session.epoch()
        };

        let ids = match self.page.scan_for_task_ids().await {
            Ok(ids) => ids,
            Err(error) if error.is_auth() => {
                self.halt_for_auth().await;
                return Ok(TickOutcome::Halted);
            }
            Err(error) => return Err(error),
        };

        {
            let session = self.session.lock().await;
            if !session.is_current(epoch) {
                return Ok(TickOutcome::Stopped);
            }
            if !force && session.last_known() == Some(&ids) {
                return Ok(TickOutcome::Unchanged);
            }
        }
        debug!(count = ids.len(), "ticket set changed, reconciling");

        let report = match self.reconciler.reconcile(&self.session, epoch, &ids).await {
            Ok(Some(report)) => report,
            Ok(None) => return Ok(TickOutcome::Stopped),
            Err(error) if error.is_auth() => {
                self.halt_for_auth().await;
                return Ok(TickOutcome::Halted);
            }
            Err(error) => return Err(error),
        };

        {
            let mut session = self.session.lock().await;
            if session.is_current(epoch) {
                if report.failed.is_empty() {
                    session.set_last_known(ids);
                } else {
                    session.invalidate_last_known();
                }
            }
        }
        self.observer.on_reconcile_complete(&report.changed_ids());
        Ok(TickOutcome::Reconciled(report))
    }

    async fn halt_for_auth(&self) {
        let halted = self.session.lock().await.teardown(Teardown::AuthExpired);
        self.reconciler.renderer().clear().await;
        if halted {
            warn!("authentication expired, polling halted");
            self.observer.on_auth_failure();
        }
    }
}

async fn join(state: PollerState) -> AppResult<()> {
    state.task.await.map_err(|error| {
        AppError::Configuration(format!("poll loop join failed: {error}"))
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;
    use crate::clock::SystemClock;
    use crate::panel::notifications::DEFAULT_LIFETIME;
    use crate::panel::tracker::DEFAULT_COOLDOWN;
    use crate::test_support::{Failure, StubPage, StubTracker, id, ids, ticket};

    #[derive(Default)]
    struct RecordingObserver {
        completed: StdMutex<Vec<BTreeSet<TicketId>>>,
        auth_failures: StdMutex<usize>,
    }

    impl RecordingObserver {
        fn completions(&self) -> usize {
            self.completed.lock().expect("observer lock").len()
        }

        fn auth_failures(&self) -> usize {
            *self.auth_failures.lock().expect("observer lock")
        }
    }

    impl PanelObserver for RecordingObserver {
        fn on_reconcile_complete(&self, changed: &BTreeSet<TicketId>) {
            self.completed
                .lock()
                .expect("observer lock")
                .push(changed.clone());
        }

        fn on_auth_failure(&self) {
            *self.auth_failures.lock().expect("observer lock") += 1;
        }
    }

    struct Harness {
        tracker: Arc<StubTracker>,
        page: Arc<StubPage>,
        observer: Arc<RecordingObserver>,
        scheduler: PollingScheduler,
    }

    fn harness() -> Harness {
        let tracker = Arc::new(StubTracker::default());
        for raw in ["A-1", "B-1", "C-1"] {
            tracker.put(ticket(raw, "To Do", raw));
        }
        let page = Arc::new(StubPage::default());
        let observer = Arc::new(RecordingObserver::default());
        let renderer = Arc::new(ContentRenderer::new(tracker.clone()));
        let session = Session::new(DEFAULT_COOLDOWN, DEFAULT_LIFETIME, Arc::new(SystemClock));
        let scheduler = PollingScheduler::new(
            page.clone(),
            TicketReconciler::new(tracker.clone(), renderer),
            session,
            observer.clone(),
            SchedulerSettings::default(),
        );
        Harness {
            tracker,
            page,
            observer,
            scheduler,
        }
    }

    impl Harness {
        async fn begin(&self) {
            self.scheduler.session().lock().await.begin();
        }
    }

    #[tokio::test]
    async fn tick_does_nothing_while_stopped() {
        let h = harness();
        h.page.show(&["A-1"]);

        assert_eq!(h.scheduler.tick().await.expect("tick"), TickOutcome::Stopped);
        assert_eq!(h.page.scan_count(), 0);
    }

    #[tokio::test]
    async fn reconciles_only_when_the_ticket_set_changes() {
        let h = harness();
        h.begin().await;
        h.page.show(&["A-1", "B-1"]);

        assert!(matches!(h.scheduler.tick().await.expect("tick"), TickOutcome::Reconciled(_)));
        assert_eq!(h.scheduler.tick().await.expect("tick"), TickOutcome::Unchanged);
        assert_eq!(h.tracker.fetch_count(), 2);

        h.page.show(&["B-1", "C-1"]);
        let TickOutcome::Reconciled(report) = h.scheduler.tick().await.expect("tick") else {
            panic!("expected a reconciliation");
        };
        assert_eq!(report.removed, vec![id("A-1")]);
        assert_eq!(h.observer.completions(), 2);
        assert_eq!(h.page.scan_count(), 3);
    }

    #[tokio::test]
    async fn tick_is_skipped_while_a_pass_is_in_flight() {
        let h = harness();
        h.begin().await;
        h.page.show(&["A-1"]);

        let _held = h.scheduler.shared.pass_lock.lock().await;

        assert_eq!(h.scheduler.tick().await.expect("tick"), TickOutcome::InFlight);
        assert_eq!(h.page.scan_count(), 0);
    }

    #[tokio::test]
    async fn reconcile_now_ignores_the_set_gate() {
        let h = harness();
        h.begin().await;
        h.page.show(&["A-1"]);
        h.scheduler.tick().await.expect("tick");

        let outcome = h.scheduler.reconcile_now().await.expect("reconcile");

        assert!(matches!(outcome, TickOutcome::Reconciled(_)));
        assert_eq!(h.tracker.fetch_count(), 2);
    }

    #[tokio::test]
    async fn auth_failure_halts_once_and_keeps_displayed_tickets() {
        let h = harness();
        h.begin().await;
        h.page.show(&["A-1"]);
        h.scheduler.tick().await.expect("tick");

        h.tracker.fail_fetch("B-1", Failure::Auth);
        h.page.show(&["A-1", "B-1"]);

        assert_eq!(h.scheduler.tick().await.expect("tick"), TickOutcome::Halted);
        assert_eq!(h.scheduler.tick().await.expect("tick"), TickOutcome::Stopped);
        h.scheduler.notify_auth_expired().await;

        assert_eq!(h.observer.auth_failures(), 1);
        let snapshot = h.scheduler.snapshot(&PanelFilter::default()).await;
        assert_eq!(snapshot.phase, Phase::Stopped);
        assert_eq!(snapshot.ticket_ids, ids(&["A-1"]));
        let session = h.scheduler.session().lock().await;
        assert!(session.last_known().is_none());
        assert!(session.tracker.scopes().is_empty());
    }

    #[tokio::test]
    async fn failed_ticket_is_retried_on_the_next_tick() {
        let h = harness();
        h.begin().await;
        h.tracker.fail_fetch("B-1", Failure::Network);
        h.page.show(&["A-1", "B-1"]);

        h.scheduler.tick().await.expect("tick");
        h.tracker.fetch_failures.lock().expect("failures lock").clear();
        let TickOutcome::Reconciled(report) = h.scheduler.tick().await.expect("tick") else {
            panic!("expected a retry");
        };

        assert_eq!(report.created, vec![id("B-1")]);
        assert_eq!(h.scheduler.tick().await.expect("tick"), TickOutcome::Unchanged);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn poll_loop_ticks_on_interval_until_stopped() {
        let h = harness();
        h.page.show(&["A-1"]);

        h.scheduler.start().await.expect("start");
        h.scheduler.start().await.expect("second start is a no-op");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(h.page.scan_count(), 1);
        assert_eq!(h.observer.completions(), 1);

        tokio::time::sleep(DEFAULT_POLL_INTERVAL).await;
        assert_eq!(h.page.scan_count(), 2);
        assert_eq!(h.observer.completions(), 1);

        h.scheduler.stop().await.expect("stop");
        tokio::time::sleep(DEFAULT_POLL_INTERVAL * 3).await;
        assert_eq!(h.page.scan_count(), 2);

        let snapshot = h.scheduler.snapshot(&PanelFilter::default()).await;
        assert_eq!(snapshot.phase, Phase::Stopped);
        assert_eq!(snapshot.ticket_ids, ids(&["A-1"]));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn restart_after_stop_reconciles_from_scratch() {
        let h = harness();
        h.page.show(&["A-1"]);
        h.scheduler.start().await.expect("start");
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.scheduler.stop().await.expect("stop");

        h.scheduler.start().await.expect("restart");
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(h.tracker.fetch_count(), 2);
        assert_eq!(h.observer.completions(), 2);
        h.scheduler.logout().await.expect("logout");
        assert!(h.scheduler.snapshot(&PanelFilter::default()).await.ticket_ids.is_empty());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn rescan_requests_are_debounced() {
        let h = harness();
        h.begin().await;
        h.page.show(&["A-1"]);

        for _ in 0..3 {
            h.scheduler.request_rescan();
            tokio::time::sleep(Duration::from_millis(400)).await;
        }
        assert_eq!(h.page.scan_count(), 0);

        tokio::time::sleep(DEFAULT_RESCAN_DEBOUNCE).await;
        assert_eq!(h.page.scan_count(), 1);
        assert_eq!(h.observer.completions(), 1);
    }
}
