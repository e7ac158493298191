//! Ordering of remote refreshes around the sidecar writes.
//!
//! The server regenerates NFO files when it rebuilds metadata, which wipes
//! tags written before the rebuild. When the library dropped a tag, the
//! server has to rebuild (to forget the tag) before the write, so the write
//! is the last change the server sees:
//!
//! ```text
//! Start -> Detect -> [PreRefresh] -> Write -> FinalRefresh -> Done
//!                 (any step) -> Failed
//! ```
//!
//! The destructive refresh runs only in `PreRefresh` or as the single
//! fallback when the final non-destructive refresh cannot be triggered.

use crate::config::{PollConfig, RefreshScope};
use crate::diff;
use crate::error::{Error, Policy};
use crate::model::{MediaItem, RefreshMode, TagDelta, TagSet};
use crate::poller::{Sleeper, TaskCompletionPoller};
use crate::progress::SyncReporter;
use crate::report::{ReconciliationReport, SyncPlan};
use crate::server::MediaServer;
use crate::sidecar::{CreateOutcome, SidecarTagStore};
use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const DRY_RUN_SAMPLE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Start,
    Detect,
    PreRefresh,
    Write,
    FinalRefresh,
    Done,
    Failed,
}

#[derive(Debug)]
pub enum Step {
    Next(SyncState),
    Done,
    Failed(Error),
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub dry_run: bool,
    pub refresh_scope: RefreshScope,
    pub per_item_delay: Duration,
    pub verify_sample_size: usize,
    pub pre_refresh: PollConfig,
    pub final_refresh: PollConfig,
}

#[derive(Debug)]
pub struct SyncRun {
    pub final_state: SyncState,
    pub report: ReconciliationReport,
    pub error: Option<Error>,
    /// Every state the machine entered, in order.
    pub visited: Vec<SyncState>,
}

impl SyncRun {
    pub fn is_success(&self) -> bool {
        self.final_state == SyncState::Done
    }
}

pub struct RefreshOrchestrator<'a> {
    server: &'a dyn MediaServer,
    store: &'a SidecarTagStore,
    sleeper: &'a dyn Sleeper,
    reporter: &'a dyn SyncReporter,
    poller: TaskCompletionPoller<'a>,
    settings: OrchestratorSettings,
    items: &'a [MediaItem],
    state: SyncState,
    has_deletions: bool,
    pre_refreshed: bool,
    report: ReconciliationReport,
}

impl<'a> RefreshOrchestrator<'a> {
    pub fn new(
        server: &'a dyn MediaServer,
        store: &'a SidecarTagStore,
        sleeper: &'a dyn Sleeper,
        reporter: &'a dyn SyncReporter,
        task_pattern: Regex,
        settings: OrchestratorSettings,
        items: &'a [MediaItem],
    ) -> Self {
        Self {
            server,
            store,
            sleeper,
            reporter,
            poller: TaskCompletionPoller::new(server, sleeper, reporter, task_pattern),
            settings,
            items,
            state: SyncState::Start,
            has_deletions: false,
            pre_refreshed: false,
            report: ReconciliationReport::new(),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn has_deletions(&self) -> bool {
        self.has_deletions
    }

    pub fn report(&self) -> &ReconciliationReport {
        &self.report
    }

    /// Run the current state's step and move to whatever it returns.
    pub fn advance(&mut self) -> Result<SyncState, Error> {
        let step = match self.state {
            SyncState::Start => self.start(),
            SyncState::Detect => self.detect(),
            SyncState::PreRefresh => self.pre_refresh(),
            SyncState::Write => self.write(),
            SyncState::FinalRefresh => self.final_refresh(),
            SyncState::Done | SyncState::Failed => return Ok(self.state),
        };
        match step {
            Step::Next(next) => {
                debug!("{:?} -> {:?}", self.state, next);
                self.state = next;
                Ok(next)
            }
            Step::Done => {
                self.state = SyncState::Done;
                Ok(SyncState::Done)
            }
            Step::Failed(err) => {
                error!("Sync failed during {:?}: {}", self.state, err);
                self.state = SyncState::Failed;
                Err(err)
            }
        }
    }

    pub fn run(mut self) -> SyncRun {
        let started = Instant::now();
        let mut visited = vec![self.state];
        let mut error = None;

        while !matches!(self.state, SyncState::Done | SyncState::Failed) {
            match self.advance() {
                Ok(state) => visited.push(state),
                Err(err) => {
                    visited.push(SyncState::Failed);
                    error = Some(err);
                }
            }
        }

        self.report.duration = started.elapsed();
        SyncRun {
            final_state: self.state,
            report: self.report,
            error,
            visited,
        }
    }

    pub fn start(&mut self) -> Step {
        if self.items.is_empty() {
            warn!("No media files found; nothing to sync");
            return Step::Done;
        }
        if self.settings.dry_run {
            return Step::Next(SyncState::Detect);
        }
        match self.server.server_info() {
            Ok(_) => Step::Next(SyncState::Detect),
            Err(err) => Step::Failed(err),
        }
    }

    pub fn detect(&mut self) -> Step {
        self.has_deletions = diff::prescan_deletions(self.items, self.store);
        self.report.prescan_has_deletions = Some(self.has_deletions);
        self.reporter.on_detect_complete(self.has_deletions);

        if self.settings.dry_run {
            self.plan_dry_run();
            return Step::Done;
        }
        if self.has_deletions {
            info!("Tag removals detected; the server rebuilds metadata before tags are written");
            Step::Next(SyncState::PreRefresh)
        } else {
            info!("No tag removals; skipping the pre-refresh");
            Step::Next(SyncState::Write)
        }
    }

    pub fn pre_refresh(&mut self) -> Step {
        if let Err(err) = self.trigger(RefreshMode::Destructive) {
            return Step::Failed(err);
        }
        let poll = self.settings.pre_refresh;
        self.wait("pre-refresh", poll);
        self.pre_refreshed = true;
        self.verify_rebuild();
        Step::Next(SyncState::Write)
    }

    pub fn write(&mut self) -> Step {
        let started = Instant::now();
        let total = self.items.len();
        info!("Writing tags to {} sidecars...", total);
        self.reporter.on_write_start(total);

        let items = self.items;
        for (i, item) in items.iter().enumerate() {
            if let Err(err) = self.write_item(item) {
                return Step::Failed(err);
            }
            self.reporter.on_item_written(&item.path, i + 1, total);
        }

        self.report.check_divergence(self.pre_refreshed);
        let outcome = &self.report.outcome;
        self.reporter
            .on_write_complete(outcome, started.elapsed().as_secs_f64());
        info!(
            "Sidecar update complete: {} succeeded, {} failed, {} skipped, {} changed",
            outcome.succeeded, outcome.failed, outcome.skipped, outcome.changed
        );

        if outcome.is_noop() {
            info!("No sidecar needed an update; nothing to refresh");
            return Step::Done;
        }
        Step::Next(SyncState::FinalRefresh)
    }

    pub fn final_refresh(&mut self) -> Step {
        let triggered = match self.settings.refresh_scope {
            RefreshScope::Library => self.trigger(RefreshMode::NonDestructive),
            RefreshScope::Items => self.refresh_changed_items(),
        };
        if let Err(err) = triggered {
            warn!(
                "Standard refresh failed ({}); falling back to a replace-all refresh",
                err
            );
            if let Err(err) = self.trigger(RefreshMode::Destructive) {
                return Step::Failed(err);
            }
        }
        let poll = self.settings.final_refresh;
        self.wait("final refresh", poll);
        Step::Done
    }

    fn trigger(&mut self, mode: RefreshMode) -> Result<(), Error> {
        let result = self.server.refresh_library(mode);
        self.report.record_refresh(mode, result.is_ok());
        if result.is_ok() {
            self.reporter.on_refresh_triggered(mode);
        }
        result
    }

    fn wait(&mut self, label: &str, poll: PollConfig) {
        let completed = self
            .poller
            .wait(label, poll.interval(), poll.max_wait(), poll.grace());
        if !completed {
            warn!("Continuing without confirmation that the {} finished", label);
        }
        self.report.record_wait(label, completed);
    }

    fn write_item(&mut self, item: &MediaItem) -> Result<(), Error> {
        let path = self.store.sidecar_path(item);
        let existing = match self.store.try_read_tags(&path) {
            Ok(existing) => existing,
            Err(err) => {
                let delta = diff::compute_delta(&item.tags, &TagSet::new());
                return self.isolate(item, Some(&delta), err);
            }
        };

        let Some(existing) = existing else {
            let delta = diff::compute_delta(&item.tags, &TagSet::new());
            return match self.store.create_if_missing(item, &item.tags) {
                Ok(CreateOutcome::Created) => {
                    info!(
                        "Created {} with {} tags",
                        path.display(),
                        item.tags.len()
                    );
                    self.report.record_written(&item.path, &delta, true);
                    Ok(())
                }
                Ok(CreateOutcome::Skipped) => {
                    self.report.record_skipped(&item.path);
                    Ok(())
                }
                Err(err) => self.isolate(item, Some(&delta), err),
            };
        };

        let delta = diff::compute_delta(&item.tags, &existing);
        if delta.is_empty() {
            debug!("Tags unchanged, skipping {}", item.file_name());
            self.report.record_unchanged(&item.path);
            return Ok(());
        }

        info!(
            "Tag change [{}]: {} added, {} removed",
            item.file_name(),
            delta.added.len(),
            delta.removed.len()
        );
        debug!("  added: {:?}, removed: {:?}", delta.added, delta.removed);

        match self.store.write_tags(&path, &item.tags) {
            Ok(()) => {
                self.report.record_written(&item.path, &delta, false);
                Ok(())
            }
            Err(err) => self.isolate(item, Some(&delta), err),
        }
    }

    /// Record a per-item failure, unless the error kind stops the run.
    fn isolate(
        &mut self,
        item: &MediaItem,
        delta: Option<&TagDelta>,
        err: Error,
    ) -> Result<(), Error> {
        match err.policy() {
            Policy::Isolate => {
                warn!("{}", err);
                self.report
                    .record_failed(&item.path, delta, &err.to_string());
                Ok(())
            }
            Policy::Abort => Err(err),
        }
    }

    /// Spot check that the rebuild emptied the sidecars. Advisory only.
    fn verify_rebuild(&self) {
        let sample: Vec<&MediaItem> = self
            .items
            .iter()
            .filter(|item| !item.tags.is_empty())
            .filter(|item| self.store.sidecar_path(item).exists())
            .take(self.settings.verify_sample_size)
            .collect();
        if sample.is_empty() {
            return;
        }
        let rebuilt = sample
            .iter()
            .filter(|item| {
                self.store
                    .read_tags(&self.store.sidecar_path(item))
                    .is_empty()
            })
            .count();
        if rebuilt > 0 {
            info!(
                "Rebuild check: {} of {} sampled sidecars have no tags",
                rebuilt,
                sample.len()
            );
        } else {
            warn!(
                "Rebuild check: all {} sampled sidecars still have tags; the rebuild may not \
                 have finished and a second sync may be needed",
                sample.len()
            );
        }
    }

    fn plan_dry_run(&mut self) {
        let items = self.items;
        let mut plan = SyncPlan::default();
        for item in items {
            let path = self.store.sidecar_path(item);
            if !path.exists() {
                if item.tags.is_empty() {
                    plan.skip += 1;
                } else {
                    plan.create += 1;
                }
                continue;
            }
            let existing = self.store.read_tags(&path);
            if diff::compute_delta(&item.tags, &existing).is_empty() {
                plan.unchanged += 1;
            } else {
                plan.update += 1;
            }
        }

        let tagged: Vec<&MediaItem> = items.iter().filter(|i| !i.tags.is_empty()).collect();
        info!("[dry run] Tagged files:");
        for (i, item) in tagged.iter().take(DRY_RUN_SAMPLE).enumerate() {
            info!("  {}. {}: {:?}", i + 1, item.file_name(), item.tags);
        }
        if tagged.len() > DRY_RUN_SAMPLE {
            info!("  ... and {} more", tagged.len() - DRY_RUN_SAMPLE);
        }
        info!(
            "[dry run] Would create {}, update {}, leave {} unchanged, skip {}; pre-refresh {}",
            plan.create,
            plan.update,
            plan.unchanged,
            plan.skip,
            if self.has_deletions { "needed" } else { "not needed" }
        );
        self.report.plan = Some(plan);
    }

    fn refresh_changed_items(&mut self) -> Result<(), Error> {
        let paths = self.report.changed_paths();
        if paths.is_empty() {
            info!("No sidecar was written; no items to refresh");
            return Ok(());
        }

        let mut refreshed = 0usize;
        for (i, path) in paths.iter().enumerate() {
            if i > 0 && !self.settings.per_item_delay.is_zero() {
                self.sleeper.sleep(self.settings.per_item_delay);
            }
            let lookup = self.server.find_item_by_path(&path.to_string_lossy());
            match lookup {
                Ok(Some(id)) => match self.server.refresh_item(&id, RefreshMode::NonDestructive) {
                    Ok(()) => refreshed += 1,
                    Err(err) => warn!("Refresh of {} failed: {}", path.display(), err),
                },
                Ok(None) => warn!("Server has no item for {}", path.display()),
                Err(err) => warn!("Lookup of {} failed: {}", path.display(), err),
            }
        }

        self.report.items_refreshed = refreshed;
        info!("Refreshed {} of {} changed items", refreshed, paths.len());
        let accepted = refreshed > 0;
        self.report
            .record_refresh(RefreshMode::NonDestructive, accepted);
        if accepted {
            self.reporter
                .on_refresh_triggered(RefreshMode::NonDestructive);
            Ok(())
        } else {
            Err(Error::Remote(
                "none of the changed items could be refreshed".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;
    use crate::server::{MockMediaServer, ServerInfo};
    use mockall::predicate::eq;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    struct NoSleep;

    impl Sleeper for NoSleep {
        fn sleep(&self, _duration: Duration) {}
    }

    fn tags(list: &[&str]) -> TagSet {
        list.iter().map(|t| t.to_string()).collect()
    }

    fn item(root: &Path, name: &str, list: &[&str]) -> MediaItem {
        let container = root.join(format!("{}.info", name));
        fs::create_dir_all(&container).unwrap();
        MediaItem {
            path: container.join(format!("{}.mp4", name)),
            tags: tags(list),
            display_name: name.to_string(),
            container_path: container,
        }
    }

    fn item_with_sidecar(root: &Path, name: &str, list: &[&str], existing: &[&str]) -> MediaItem {
        let item = item(root, name, list);
        let body: String = existing
            .iter()
            .map(|t| format!("  <tag>{}</tag>\n", t))
            .collect();
        fs::write(
            item.container_path.join("movie.nfo"),
            format!("<movie>\n  <title>{}</title>\n{}</movie>\n", name, body),
        )
        .unwrap();
        item
    }

    fn settings(dry_run: bool) -> OrchestratorSettings {
        let poll = PollConfig {
            interval_secs: 1,
            max_wait_secs: 10,
            grace_secs: 0,
        };
        OrchestratorSettings {
            dry_run,
            refresh_scope: RefreshScope::Library,
            per_item_delay: Duration::ZERO,
            verify_sample_size: 5,
            pre_refresh: poll,
            final_refresh: poll,
        }
    }

    fn connected() -> MockMediaServer {
        let mut server = MockMediaServer::new();
        server.expect_server_info().returning(|| {
            Ok(ServerInfo {
                name: "media".to_string(),
                version: "10.9.0".to_string(),
            })
        });
        server.expect_list_tasks().returning(|| Ok(vec![]));
        server
    }

    fn run(server: &MockMediaServer, items: &[MediaItem], dry_run: bool) -> SyncRun {
        let store = SidecarTagStore::new("movie.nfo");
        RefreshOrchestrator::new(
            server,
            &store,
            &NoSleep,
            &SilentReporter,
            Regex::new("Scan|Refresh").unwrap(),
            settings(dry_run),
            items,
        )
        .run()
    }

    #[test]
    fn test_additions_only_skip_pre_refresh() {
        let dir = tempdir().unwrap();
        let items = vec![item_with_sidecar(dir.path(), "a", &["x", "y"], &["x"])];
        let mut server = connected();
        server
            .expect_refresh_library()
            .with(eq(RefreshMode::NonDestructive))
            .times(1)
            .returning(|_| Ok(()));

        let result = run(&server, &items, false);

        assert!(result.is_success());
        assert_eq!(
            result.visited,
            vec![
                SyncState::Start,
                SyncState::Detect,
                SyncState::Write,
                SyncState::FinalRefresh,
                SyncState::Done
            ]
        );
        assert_eq!(result.report.outcome.changed, 1);
    }

    #[test]
    fn test_removal_runs_destructive_refresh_before_write() {
        let dir = tempdir().unwrap();
        let items = vec![item_with_sidecar(dir.path(), "a", &["x"], &["x", "old"])];
        let mut server = connected();
        let mut seq = mockall::Sequence::new();
        server
            .expect_refresh_library()
            .with(eq(RefreshMode::Destructive))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        server
            .expect_refresh_library()
            .with(eq(RefreshMode::NonDestructive))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let result = run(&server, &items, false);

        assert!(result.is_success());
        assert!(result.visited.contains(&SyncState::PreRefresh));
        assert_eq!(result.report.prescan_has_deletions, Some(true));
        let store = SidecarTagStore::new("movie.nfo");
        assert_eq!(store.read_tags(&store.sidecar_path(&items[0])), tags(&["x"]));
    }

    #[test]
    fn test_failed_standard_refresh_falls_back_once() {
        let dir = tempdir().unwrap();
        let items = vec![item(dir.path(), "a", &["x"])];
        let mut server = connected();
        server
            .expect_refresh_library()
            .with(eq(RefreshMode::NonDestructive))
            .times(1)
            .returning(|_| Err(Error::Remote("HTTP 500".to_string())));
        server
            .expect_refresh_library()
            .with(eq(RefreshMode::Destructive))
            .times(1)
            .returning(|_| Ok(()));

        let result = run(&server, &items, false);

        assert!(result.is_success());
        assert_eq!(
            result.report.refreshes,
            vec![
                (RefreshMode::NonDestructive, false),
                (RefreshMode::Destructive, true)
            ]
        );
    }

    #[test]
    fn test_failed_fallback_fails_run_but_keeps_outcome() {
        let dir = tempdir().unwrap();
        let items = vec![item(dir.path(), "a", &["x"])];
        let mut server = connected();
        server
            .expect_refresh_library()
            .times(2)
            .returning(|_| Err(Error::Remote("HTTP 503".to_string())));

        let result = run(&server, &items, false);

        assert_eq!(result.final_state, SyncState::Failed);
        assert!(result.error.as_ref().is_some_and(|e| e.is_remote()));
        assert_eq!(result.report.outcome.succeeded, 1);
    }

    #[test]
    fn test_pre_refresh_trigger_failure_is_fatal() {
        let dir = tempdir().unwrap();
        let items = vec![item_with_sidecar(dir.path(), "a", &[], &["gone"])];
        let mut server = connected();
        server
            .expect_refresh_library()
            .with(eq(RefreshMode::Destructive))
            .times(1)
            .returning(|_| Err(Error::Timeout("no answer".to_string())));

        let result = run(&server, &items, false);

        assert_eq!(result.final_state, SyncState::Failed);
        assert!(!result.visited.contains(&SyncState::Write));
        // the sidecar still carries the tag since nothing was written
        let store = SidecarTagStore::new("movie.nfo");
        assert_eq!(
            store.read_tags(&store.sidecar_path(&items[0])),
            tags(&["gone"])
        );
    }

    #[test]
    fn test_nothing_to_write_ends_without_refresh() {
        let dir = tempdir().unwrap();
        let items = vec![
            item_with_sidecar(dir.path(), "a", &["x"], &["x"]),
            item(dir.path(), "b", &[]),
        ];
        let mut server = connected();
        server.expect_refresh_library().never();

        let result = run(&server, &items, false);

        assert!(result.is_success());
        assert!(!result.visited.contains(&SyncState::FinalRefresh));
        assert_eq!(result.report.outcome.skipped, 2);
    }

    #[test]
    fn test_dry_run_plans_without_touching_server_or_disk() {
        let dir = tempdir().unwrap();
        let items = vec![
            item(dir.path(), "a", &["x"]),
            item_with_sidecar(dir.path(), "b", &["x"], &["x", "old"]),
            item_with_sidecar(dir.path(), "c", &["x"], &["x"]),
            item(dir.path(), "d", &[]),
        ];
        let mut server = MockMediaServer::new();
        server.expect_server_info().never();
        server.expect_refresh_library().never();
        server.expect_list_tasks().never();

        let result = run(&server, &items, true);

        assert!(result.is_success());
        assert_eq!(
            result.report.plan,
            Some(SyncPlan {
                create: 1,
                update: 1,
                unchanged: 1,
                skip: 1
            })
        );
        assert!(!items[0].container_path.join("movie.nfo").exists());
    }

    #[test]
    fn test_removal_appearing_after_detect_is_flagged() {
        let dir = tempdir().unwrap();
        let items = vec![item_with_sidecar(dir.path(), "a", &["x"], &["x"])];
        let mut server = connected();
        server
            .expect_refresh_library()
            .with(eq(RefreshMode::NonDestructive))
            .times(1)
            .returning(|_| Ok(()));
        let store = SidecarTagStore::new("movie.nfo");
        let mut orchestrator = RefreshOrchestrator::new(
            &server,
            &store,
            &NoSleep,
            &SilentReporter,
            Regex::new("Scan|Refresh").unwrap(),
            settings(false),
            &items,
        );

        assert_eq!(orchestrator.advance().unwrap(), SyncState::Detect);
        assert_eq!(orchestrator.advance().unwrap(), SyncState::Write);
        assert!(!orchestrator.has_deletions());

        // the sidecar picks up a tag the library does not have
        fs::write(
            store.sidecar_path(&items[0]),
            "<movie>\n  <title>a</title>\n  <tag>x</tag>\n  <tag>stray</tag>\n</movie>\n",
        )
        .unwrap();

        assert_eq!(orchestrator.advance().unwrap(), SyncState::FinalRefresh);
        assert_eq!(orchestrator.advance().unwrap(), SyncState::Done);
        let report = orchestrator.report();
        assert_eq!(report.prescan_has_deletions, Some(false));
        assert!(report.outcome.has_deletions);
        assert!(report.deletion_divergence);
        assert_eq!(store.read_tags(&store.sidecar_path(&items[0])), tags(&["x"]));
    }

    #[test]
    fn test_unreachable_server_fails_at_start() {
        let dir = tempdir().unwrap();
        let items = vec![item(dir.path(), "a", &["x"])];
        let mut server = MockMediaServer::new();
        server
            .expect_server_info()
            .returning(|| Err(Error::Remote("connection refused".to_string())));

        let result = run(&server, &items, false);

        assert_eq!(result.visited, vec![SyncState::Start, SyncState::Failed]);
        assert!(!items[0].container_path.join("movie.nfo").exists());
    }
}
