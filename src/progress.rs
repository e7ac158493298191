use crate::model::{BatchOutcome, RefreshMode};
use std::path::Path;

/// Trait for reporting sync progress.
///
/// One reporter is created per run and handed to the engine, which passes it
/// down to every step. The CLI implements it with indicatif spinners.
/// All methods have default no-op implementations.
pub trait SyncReporter: Send + Sync {
    fn on_scan_complete(&self, _items: usize, _tagged: usize) {}
    fn on_detect_complete(&self, _has_deletions: bool) {}
    fn on_refresh_triggered(&self, _mode: RefreshMode) {}
    fn on_wait_start(&self, _label: &str) {}
    fn on_wait_progress(&self, _idle_streak: usize, _required: usize, _active_tasks: usize) {}
    fn on_wait_complete(&self, _completed: bool, _duration_secs: f64) {}
    fn on_write_start(&self, _total_items: usize) {}
    fn on_item_written(&self, _path: &Path, _position: usize, _total_items: usize) {}
    fn on_write_complete(&self, _outcome: &BatchOutcome, _duration_secs: f64) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl SyncReporter for SilentReporter {}
