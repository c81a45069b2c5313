use std::time::{Duration, Instant};

use strum::Display;
use thiserror::Error;

use crate::config::PollingOptions;
use crate::journaling::lifecycle::EntryLifecycleController;
use crate::model::{Entry, EntryId, EntrySnapshot};
use crate::repository::{EntryRepository, RequestError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Lineage {
    List,
    Tracked,
}

/// A refresh that failed while nobody was waiting on it.
#[derive(Debug, Clone, Error)]
#[error("{lineage} refresh failed: {source}")]
pub struct BackgroundFetchError {
    pub lineage: Lineage,
    #[source]
    pub source: RequestError,
}

#[derive(Debug, Clone)]
struct Schedule {
    interval: Duration,
    next_due: Option<Instant>,
}

impl Schedule {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    fn is_armed(&self) -> bool {
        self.next_due.is_some()
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_due.is_some_and(|due| now >= due)
    }

    /// Keep an existing deadline; otherwise start one interval from `now`.
    fn arm(&mut self, now: Instant) {
        if self.next_due.is_none() {
            self.next_due = Some(now + self.interval);
        }
    }

    fn reschedule(&mut self, now: Instant) {
        self.next_due = Some(now + self.interval);
    }

    fn disarm(&mut self) {
        self.next_due = None;
    }
}

/// What one `poll` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    pub list_fetched: bool,
    pub tracked_fetched: bool,
    pub snapshot_changed: bool,
    pub resolved: Option<EntryId>,
}

impl PollReport {
    pub fn fetched(&self) -> bool {
        self.list_fetched || self.tracked_fetched
    }
}

/// Drives the list-level and tracked-entry refresh lineages.
///
/// Nothing runs on its own: the owner calls [`ReconciliationPoller::poll`]
/// with the current instant (the UI tick, or a sleep loop on the command
/// line) and each due lineage performs at most one fetch. Both termination
/// predicates are checked before every scheduling decision, so a satisfied
/// or cancelled lineage never fetches again until re-armed.
#[derive(Debug)]
pub struct ReconciliationPoller {
    list: Schedule,
    tracked: Schedule,
    tracked_id: Option<EntryId>,
    limit: usize,
}

impl ReconciliationPoller {
    pub fn new(options: &PollingOptions, limit: usize) -> Self {
        Self {
            list: Schedule::new(options.list_interval),
            tracked: Schedule::new(options.tracked_interval),
            tracked_id: None,
            limit,
        }
    }

    pub fn is_list_armed(&self) -> bool {
        self.list.is_armed()
    }

    pub fn is_tracked_armed(&self) -> bool {
        self.tracked.is_armed()
    }

    pub fn tracked_id(&self) -> Option<EntryId> {
        self.tracked_id
    }

    /// Earliest pending deadline across both lineages.
    pub fn next_due(&self) -> Option<Instant> {
        match (self.list.next_due, self.tracked.next_due) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Re-evaluate the list lineage after the snapshot was replaced from
    /// anywhere (foreground refresh, submit, or a lineage fetch).
    pub fn on_snapshot_changed(&mut self, snapshot: &EntrySnapshot, now: Instant) {
        if snapshot.has_pending() {
            if !self.list.is_armed() {
                tracing::debug!(pending = snapshot.pending_count(), "list refresh armed");
            }
            self.list.arm(now);
        } else if self.list.is_armed() {
            tracing::debug!("list refresh stopped, nothing pending");
            self.list.disarm();
        }
    }

    /// Follow a freshly saved entry. Replaces whatever was tracked before.
    pub fn track(&mut self, entry: &Entry, now: Instant) {
        if entry.is_pending() {
            tracing::debug!(id = %entry.id, "tracking entry until analysed");
            self.tracked_id = Some(entry.id);
            self.tracked.reschedule(now);
        } else {
            self.cancel_tracked();
        }
    }

    pub fn cancel_tracked(&mut self) {
        if self.tracked.is_armed() {
            tracing::debug!(id = ?self.tracked_id, "tracked refresh cancelled");
        }
        self.tracked_id = None;
        self.tracked.disarm();
    }

    pub fn cancel_all(&mut self) {
        self.cancel_tracked();
        self.list.disarm();
    }

    pub fn poll(
        &mut self,
        now: Instant,
        repo: &dyn EntryRepository,
        controller: &mut EntryLifecycleController,
        snapshot: &mut EntrySnapshot,
    ) -> PollReport {
        let mut report = PollReport::default();

        self.check_tracked(controller);
        if self.tracked.is_due(now) {
            report.tracked_fetched = true;
            if let Some(entries) = self.fetch(Lineage::Tracked, repo) {
                let found = self
                    .tracked_id
                    .and_then(|id| entries.iter().find(|entry| entry.id == id))
                    .filter(|entry| entry.analysis.is_some())
                    .cloned();
                if let Some(found) = found {
                    let id = found.id;
                    if controller.resolve(found) {
                        report.resolved = Some(id);
                    }
                }
                report.snapshot_changed |= snapshot.replace(entries);
            }
            self.check_tracked(controller);
            if self.tracked_id.is_some() {
                self.tracked.reschedule(now);
            }
        }

        if !snapshot.has_pending() {
            self.list.disarm();
        }
        if self.list.is_due(now) {
            report.list_fetched = true;
            if let Some(entries) = self.fetch(Lineage::List, repo) {
                report.snapshot_changed |= snapshot.replace(entries);
            }
            if snapshot.has_pending() {
                self.list.reschedule(now);
            } else {
                self.list.disarm();
            }
        }

        if report.snapshot_changed {
            self.on_snapshot_changed(snapshot, now);
        }
        report
    }

    /// Tracked lineage predicate: the controller still awaits the entry we
    /// were asked to follow.
    fn check_tracked(&mut self, controller: &EntryLifecycleController) {
        if self.tracked_id.is_some() && controller.awaiting() != self.tracked_id {
            tracing::debug!(id = ?self.tracked_id, "tracked refresh stopped");
            self.tracked_id = None;
            self.tracked.disarm();
        }
    }

    fn fetch(&self, lineage: Lineage, repo: &dyn EntryRepository) -> Option<Vec<Entry>> {
        match repo.list_entries(Some(self.limit)) {
            Ok(entries) => Some(entries),
            Err(source) => {
                let err = BackgroundFetchError { lineage, source };
                tracing::warn!(%err, "background refresh failed, retrying next interval");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journaling::lifecycle::LifecycleState;
    use crate::model::fixtures::{analysed, entry, noon};
    use crate::repository::testing::ScriptedRepository;
    use assert_matches::assert_matches;

    fn poller() -> ReconciliationPoller {
        ReconciliationPoller::new(&PollingOptions::default(), 100)
    }

    fn secs(start: Instant, secs: u64) -> Instant {
        start + Duration::from_secs(secs)
    }

    #[test]
    fn submitted_entry_resolves_and_both_lineages_stop() {
        let repo = ScriptedRepository::new();
        repo.push_create(Ok(entry(1, noon())));
        repo.push_list(Ok(vec![entry(1, noon())]))
            .push_list(Ok(vec![entry(1, noon())]))
            .push_list(Ok(vec![analysed(1, noon())]));

        let mut controller = EntryLifecycleController::new();
        let mut snapshot = EntrySnapshot::default();
        let mut poller = poller();
        let t0 = Instant::now();

        let saved = controller.submit(&repo, "calm", "Quiet day").expect("saved");
        snapshot.upsert(saved.clone());
        poller.track(&saved, t0);
        poller.on_snapshot_changed(&snapshot, t0);
        assert!(poller.is_list_armed() && poller.is_tracked_armed());

        let report = poller.poll(secs(t0, 1), &repo, &mut controller, &mut snapshot);
        assert!(!report.fetched());

        let report = poller.poll(secs(t0, 3), &repo, &mut controller, &mut snapshot);
        assert!(report.tracked_fetched && !report.list_fetched);
        assert_eq!(report.resolved, None);

        let report = poller.poll(secs(t0, 5), &repo, &mut controller, &mut snapshot);
        assert!(report.list_fetched && !report.tracked_fetched);

        let report = poller.poll(secs(t0, 6), &repo, &mut controller, &mut snapshot);
        assert_eq!(report.resolved, Some(EntryId(1)));
        assert_matches!(controller.state(), LifecycleState::Resolved { .. });
        assert!(!snapshot.has_pending());
        assert!(!poller.is_list_armed());
        assert!(!poller.is_tracked_armed());

        let report = poller.poll(secs(t0, 60), &repo, &mut controller, &mut snapshot);
        assert!(!report.fetched());
        assert_eq!(repo.list_calls.get(), 3);
    }

    #[test]
    fn list_failure_is_retried_on_the_next_interval() {
        let repo = ScriptedRepository::new();
        repo.push_list(Err(RequestError::new("connection refused")))
            .push_list(Ok(vec![analysed(1, noon())]));
        let mut controller = EntryLifecycleController::new();
        let mut snapshot = EntrySnapshot::new(vec![entry(1, noon())]);
        let mut poller = poller();
        let t0 = Instant::now();
        poller.on_snapshot_changed(&snapshot, t0);

        let report = poller.poll(secs(t0, 5), &repo, &mut controller, &mut snapshot);
        assert!(report.list_fetched);
        assert!(!report.snapshot_changed);
        assert!(poller.is_list_armed());

        let report = poller.poll(secs(t0, 7), &repo, &mut controller, &mut snapshot);
        assert!(!report.fetched());

        let report = poller.poll(secs(t0, 10), &repo, &mut controller, &mut snapshot);
        assert!(report.snapshot_changed);
        assert!(!poller.is_list_armed());
        assert_eq!(repo.list_calls.get(), 2);
    }

    #[test]
    fn tracked_failure_keeps_the_lineage_alive() {
        let repo = ScriptedRepository::new();
        repo.push_list(Err(RequestError::new("timeout")))
            .push_list(Ok(vec![analysed(1, noon())]));
        let mut controller = EntryLifecycleController::new();
        controller.begin_submit("calm", "Body").expect("begin");
        let saved = controller
            .complete_submit(Ok(entry(1, noon())))
            .expect("saved");
        let mut snapshot = EntrySnapshot::default();
        let mut poller = poller();
        let t0 = Instant::now();
        poller.track(&saved, t0);

        poller.poll(secs(t0, 3), &repo, &mut controller, &mut snapshot);
        assert!(poller.is_tracked_armed());
        assert_eq!(controller.awaiting(), Some(EntryId(1)));

        let report = poller.poll(secs(t0, 6), &repo, &mut controller, &mut snapshot);
        assert_eq!(report.resolved, Some(EntryId(1)));
        assert!(!poller.is_tracked_armed());
    }

    #[test]
    fn cancelled_lineages_never_fetch() {
        let repo = ScriptedRepository::new();
        let mut controller = EntryLifecycleController::new();
        controller.begin_submit("calm", "Body").expect("begin");
        let saved = controller
            .complete_submit(Ok(entry(1, noon())))
            .expect("saved");
        let mut snapshot = EntrySnapshot::new(vec![saved.clone()]);
        let mut poller = poller();
        let t0 = Instant::now();
        poller.track(&saved, t0);
        poller.on_snapshot_changed(&snapshot, t0);

        poller.cancel_all();
        let report = poller.poll(secs(t0, 30), &repo, &mut controller, &mut snapshot);
        assert!(!report.fetched());
        assert_eq!(repo.list_calls.get(), 0);
    }

    #[test]
    fn dismissing_the_controller_stops_the_tracked_lineage() {
        let repo = ScriptedRepository::new();
        let mut controller = EntryLifecycleController::new();
        controller.begin_submit("calm", "Body").expect("begin");
        let saved = controller
            .complete_submit(Ok(entry(1, noon())))
            .expect("saved");
        let mut snapshot = EntrySnapshot::default();
        let mut poller = poller();
        let t0 = Instant::now();
        poller.track(&saved, t0);

        controller.dismiss();
        let report = poller.poll(secs(t0, 3), &repo, &mut controller, &mut snapshot);
        assert!(!report.fetched());
        assert!(!poller.is_tracked_armed());
        assert_eq!(poller.tracked_id(), None);
    }

    #[test]
    fn satisfied_snapshot_disarms_the_list_lineage() {
        let repo = ScriptedRepository::new();
        let mut controller = EntryLifecycleController::new();
        let mut snapshot = EntrySnapshot::new(vec![analysed(1, noon())]);
        let mut poller = poller();
        let t0 = Instant::now();

        poller.on_snapshot_changed(&snapshot, t0);
        assert!(!poller.is_list_armed());
        let report = poller.poll(secs(t0, 5), &repo, &mut controller, &mut snapshot);
        assert!(!report.fetched());
    }

    #[test]
    fn new_pending_entry_rearms_a_stopped_list_lineage() {
        let repo = ScriptedRepository::new();
        repo.push_list(Ok(vec![entry(3, noon()), analysed(1, noon())]));
        let mut controller = EntryLifecycleController::new();
        let mut snapshot = EntrySnapshot::new(vec![analysed(1, noon())]);
        let mut poller = poller();
        let t0 = Instant::now();

        poller.on_snapshot_changed(&snapshot, t0);
        assert!(!poller.is_list_armed());

        let t1 = secs(t0, 10);
        snapshot.upsert(entry(3, noon()));
        poller.on_snapshot_changed(&snapshot, t1);
        assert!(poller.is_list_armed());
        assert_eq!(poller.next_due(), Some(secs(t1, 5)));

        let early = poller.poll(secs(t1, 4), &repo, &mut controller, &mut snapshot);
        assert!(!early.fetched());
        let report = poller.poll(secs(t1, 5), &repo, &mut controller, &mut snapshot);
        assert!(report.list_fetched);
        assert_eq!(repo.list_calls.get(), 1);
        assert!(poller.is_list_armed());
    }

    #[test]
    fn list_lineage_alone_does_not_resolve_the_controller() {
        let repo = ScriptedRepository::new();
        repo.push_list(Ok(vec![analysed(1, noon())]));
        let mut controller = EntryLifecycleController::new();
        controller.begin_submit("calm", "Body").expect("begin");
        let saved = controller
            .complete_submit(Ok(entry(1, noon())))
            .expect("saved");
        let mut snapshot = EntrySnapshot::new(vec![saved.clone()]);
        let mut poller = ReconciliationPoller::new(
            &PollingOptions {
                list_interval: Duration::from_secs(1),
                tracked_interval: Duration::from_secs(3),
            },
            100,
        );
        let t0 = Instant::now();
        poller.track(&saved, t0);
        poller.on_snapshot_changed(&snapshot, t0);

        let report = poller.poll(secs(t0, 1), &repo, &mut controller, &mut snapshot);
        assert!(report.list_fetched);
        assert!(!snapshot.has_pending());
        assert_eq!(controller.awaiting(), Some(EntryId(1)));

        let report = poller.poll(secs(t0, 3), &repo, &mut controller, &mut snapshot);
        assert_eq!(report.resolved, Some(EntryId(1)));
    }

    #[test]
    fn next_due_reports_the_earliest_deadline() {
        let mut poller = poller();
        let t0 = Instant::now();
        assert_eq!(poller.next_due(), None);
        poller.track(&entry(1, noon()), t0);
        poller.on_snapshot_changed(&EntrySnapshot::new(vec![entry(1, noon())]), t0);
        assert_eq!(poller.next_due(), Some(secs(t0, 3)));
    }
}
