use crate::config::AppConfig;
use crate::error::Error;
use crate::lock::RunLock;
use crate::model::MediaItem;
use crate::orchestrator::{OrchestratorSettings, RefreshOrchestrator, SyncRun};
use crate::poller::{Sleeper, ThreadSleeper};
use crate::progress::SyncReporter;
use crate::scanner;
use crate::server::{JellyfinClient, MediaServer, ServerInfo};
use crate::sidecar::SidecarTagStore;
use regex::Regex;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub struct SyncEngine {
    config: AppConfig,
    dry_run: bool,
    server: Option<Box<dyn MediaServer>>,
    sleeper: Box<dyn Sleeper>,
}

/// Result of `check`: the library was readable and the server answered.
#[derive(Debug)]
pub struct CheckResult {
    pub server: ServerInfo,
    pub items: usize,
    pub tagged: usize,
    pub unreadable: usize,
}

impl SyncEngine {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            dry_run: false,
            server: None,
            sleeper: Box::new(ThreadSleeper),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Talk to `server` instead of building an HTTP client from the config.
    pub fn with_server(mut self, server: Box<dyn MediaServer>) -> Self {
        self.server = Some(server);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Run one reconciliation:
    /// 1. Check the tag library exists
    /// 2. Take the run lock (not in dry-run mode)
    /// 3. Scan the tag library
    /// 4. Drive the refresh state machine over the scanned items
    ///
    /// Errors before the state machine starts are returned as `Err`; once it
    /// runs, failures end up in `SyncRun::error` next to the partial report.
    pub fn sync(&self, reporter: &dyn SyncReporter) -> Result<SyncRun, Error> {
        self.config.validate()?;
        // the lock file lives under the root
        scanner::check_source(&self.config.root_path())?;

        let _lock = if self.dry_run {
            None
        } else {
            Some(RunLock::acquire(&self.config.lock_path())?)
        };

        info!("Scanning tag library {}...", self.config.library.root_path);
        let scan_start = Instant::now();
        let scan = scanner::scan_library(&self.config.root_path())?;
        debug!(
            "Scan completed in {:.2}s: {} items, {} tags",
            scan_start.elapsed().as_secs_f64(),
            scan.items.len(),
            scan.total_tags()
        );
        reporter.on_scan_complete(scan.items.len(), scan.tagged());

        let task_pattern = Regex::new(&self.config.sync.task_name_pattern)
            .map_err(|e| Error::Config(format!("invalid task name pattern: {}", e)))?;

        self.using_server(|server| Ok(self.orchestrate(server, reporter, task_pattern, &scan.items)))
    }

    fn using_server<T>(
        &self,
        f: impl FnOnce(&dyn MediaServer) -> Result<T, Error>,
    ) -> Result<T, Error> {
        match &self.server {
            Some(server) => f(server.as_ref()),
            None => {
                let client = JellyfinClient::from_config(&self.config.server)?;
                f(&client)
            }
        }
    }

    fn orchestrate(
        &self,
        server: &dyn MediaServer,
        reporter: &dyn SyncReporter,
        task_pattern: Regex,
        items: &[MediaItem],
    ) -> SyncRun {
        let store = SidecarTagStore::new(self.config.library.sidecar_file_name.as_str());
        let sync = &self.config.sync;
        let settings = OrchestratorSettings {
            dry_run: self.dry_run,
            refresh_scope: sync.refresh_scope,
            per_item_delay: Duration::from_millis(sync.per_item_delay_ms),
            verify_sample_size: sync.verify_sample_size,
            pre_refresh: sync.pre_refresh,
            final_refresh: sync.final_refresh,
        };
        let orchestrator = RefreshOrchestrator::new(
            server,
            &store,
            self.sleeper.as_ref(),
            reporter,
            task_pattern,
            settings,
            items,
        );
        let run = orchestrator.run();
        info!(
            "Sync finished as {:?} in {:.2}s",
            run.final_state,
            run.report.duration.as_secs_f64()
        );
        run
    }

    /// Read the library and ask the server who it is, without writing anything.
    pub fn check(&self) -> Result<CheckResult, Error> {
        self.config.validate()?;
        let scan = scanner::scan_library(&self.config.root_path())?;

        let info = self.using_server(|server| server.server_info())?;
        info!("Connected to {} (version {})", info.name, info.version);

        Ok(CheckResult {
            server: info,
            items: scan.items.len(),
            tagged: scan.tagged(),
            unreadable: scan.unreadable,
        })
    }
}
