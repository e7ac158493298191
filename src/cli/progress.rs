use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tag_sync::model::{BatchOutcome, RefreshMode};
use tag_sync::SyncReporter;

const TICK_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";

/// CLI progress reporter using indicatif.
///
/// - Waiting on the server: spinner with the idle streak
/// - Sidecar writes: progress bar over the scanned items
pub struct CliReporter {
    bar: Mutex<Option<ProgressBar>>,
}

impl CliReporter {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
        }
    }

    fn set_bar(&self, pb: ProgressBar) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(old) = guard.take() {
                old.finish_and_clear();
            }
            *guard = Some(pb);
        }
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_and_clear();
            }
        }
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(pb) = guard.as_ref() {
                f(pb);
            }
        }
    }

    fn spinner(message: String) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars(TICK_CHARS),
        );
        pb.set_message(message);
        pb.enable_steady_tick(Duration::from_millis(80));
        pb
    }
}

impl SyncReporter for CliReporter {
    fn on_scan_complete(&self, items: usize, tagged: usize) {
        eprintln!(
            "  {} Library scan: {} media files, {} tagged",
            "✓".green(),
            items,
            tagged
        );
    }

    fn on_detect_complete(&self, has_deletions: bool) {
        let verdict = if has_deletions {
            "tag removals found".yellow()
        } else {
            "no tag removals".green()
        };
        eprintln!("  {} Deletion check: {}", "✓".green(), verdict);
    }

    fn on_refresh_triggered(&self, mode: RefreshMode) {
        eprintln!("  {} Refresh requested ({})", "→".cyan(), mode);
    }

    fn on_wait_start(&self, label: &str) {
        self.set_bar(Self::spinner(format!("Waiting for {}...", label)));
    }

    fn on_wait_progress(&self, idle_streak: usize, required: usize, active_tasks: usize) {
        self.with_bar(|pb| {
            if active_tasks > 0 {
                pb.set_message(format!("{} server tasks running...", active_tasks));
            } else {
                pb.set_message(format!("Server idle ({}/{})", idle_streak, required));
            }
        });
    }

    fn on_wait_complete(&self, completed: bool, duration_secs: f64) {
        self.finish_bar();
        if completed {
            eprintln!(
                "  {} Server finished in {:.2}s",
                "✓".green(),
                duration_secs
            );
        } else {
            eprintln!(
                "  {} Gave up waiting after {:.2}s",
                "!".yellow(),
                duration_secs
            );
        }
    }

    fn on_write_start(&self, total_items: usize) {
        let pb = ProgressBar::new(total_items as u64);
        pb.set_style(
            ProgressStyle::with_template(
                "  {spinner:.cyan} Writing [{bar:30.cyan/dim}] {pos}/{len} sidecars",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─")
            .tick_chars(TICK_CHARS),
        );
        pb.enable_steady_tick(Duration::from_millis(80));
        self.set_bar(pb);
    }

    fn on_item_written(&self, _path: &Path, position: usize, _total_items: usize) {
        self.with_bar(|pb| pb.set_position(position as u64));
    }

    fn on_write_complete(&self, outcome: &BatchOutcome, duration_secs: f64) {
        self.finish_bar();
        eprintln!(
            "  {} Sidecars: {} written, {} failed, {} skipped in {:.2}s",
            "✓".green(),
            outcome.succeeded,
            outcome.failed,
            outcome.skipped,
            duration_secs
        );
    }
}
