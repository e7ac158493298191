use crate::model::{BatchOutcome, RefreshMode, TagDelta};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ItemClass {
    Created,
    Updated,
    Unchanged,
    /// No sidecar and no tags: nothing to create.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub path: PathBuf,
    pub class: ItemClass,
    pub added: usize,
    pub removed: usize,
    pub error: Option<String>,
}

/// What a dry run would have done to the sidecars.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncPlan {
    pub create: usize,
    pub update: usize,
    pub unchanged: usize,
    pub skip: usize,
}

/// Everything one run did, kept even when the run fails part way.
#[derive(Debug, Default)]
pub struct ReconciliationReport {
    pub outcome: BatchOutcome,
    pub items: Vec<ItemRecord>,
    pub prescan_has_deletions: Option<bool>,
    /// The write pass found removals the pre-scan did not.
    pub deletion_divergence: bool,
    pub refreshes: Vec<(RefreshMode, bool)>,
    pub waits: Vec<(String, bool)>,
    pub items_refreshed: usize,
    pub plan: Option<SyncPlan>,
    pub duration: Duration,
}

impl ReconciliationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_unchanged(&mut self, path: &Path) {
        self.outcome.skipped += 1;
        self.push(path, ItemClass::Unchanged, &TagDelta::default(), None);
    }

    pub fn record_skipped(&mut self, path: &Path) {
        self.outcome.skipped += 1;
        self.push(path, ItemClass::Skipped, &TagDelta::default(), None);
    }

    pub fn record_written(&mut self, path: &Path, delta: &TagDelta, created: bool) {
        self.outcome.succeeded += 1;
        self.outcome.changed += 1;
        if delta.has_removals() {
            self.outcome.has_deletions = true;
        }
        let class = if created {
            ItemClass::Created
        } else {
            ItemClass::Updated
        };
        self.push(path, class, delta, None);
    }

    /// `delta` is `None` when the failure happened before a delta existed.
    pub fn record_failed(&mut self, path: &Path, delta: Option<&TagDelta>, error: &str) {
        self.outcome.failed += 1;
        let delta = delta.cloned().unwrap_or_default();
        if !delta.is_empty() {
            self.outcome.changed += 1;
        }
        if delta.has_removals() {
            self.outcome.has_deletions = true;
        }
        self.push(path, ItemClass::Failed, &delta, Some(error.to_string()));
    }

    fn push(&mut self, path: &Path, class: ItemClass, delta: &TagDelta, error: Option<String>) {
        self.items.push(ItemRecord {
            path: path.to_path_buf(),
            class,
            added: delta.added.len(),
            removed: delta.removed.len(),
            error,
        });
    }

    pub fn record_refresh(&mut self, mode: RefreshMode, accepted: bool) {
        self.refreshes.push((mode, accepted));
    }

    pub fn record_wait(&mut self, label: &str, completed: bool) {
        self.waits.push((label.to_string(), completed));
    }

    /// Compare the write pass with the pre-scan. Only meaningful when no
    /// rebuild ran in between: a rebuild is expected to change what is on disk.
    pub fn check_divergence(&mut self, pre_refreshed: bool) -> bool {
        let prescan = self.prescan_has_deletions.unwrap_or(false);
        self.deletion_divergence = !pre_refreshed && !prescan && self.outcome.has_deletions;
        if self.deletion_divergence {
            warn!(
                "Tag removals appeared after the pre-scan; the tag library changed during the run. \
                 The server may regenerate these sidecars; run the sync again to be sure."
            );
        }
        self.deletion_divergence
    }

    pub fn count(&self, class: ItemClass) -> usize {
        self.items.iter().filter(|r| r.class == class).count()
    }

    pub fn by_class(&self) -> BTreeMap<ItemClass, usize> {
        let mut counts = BTreeMap::new();
        for record in &self.items {
            *counts.entry(record.class).or_insert(0) += 1;
        }
        counts
    }

    /// Media files whose sidecar was written this run.
    pub fn changed_paths(&self) -> Vec<PathBuf> {
        self.items
            .iter()
            .filter(|r| matches!(r.class, ItemClass::Created | ItemClass::Updated))
            .map(|r| r.path.clone())
            .collect()
    }

    pub fn log_summary(&self) {
        let o = &self.outcome;
        info!(
            "Sidecars: {} succeeded, {} failed, {} skipped, {} changed",
            o.succeeded, o.failed, o.skipped, o.changed
        );
        for (class, count) in self.by_class() {
            info!("  {:?}: {}", class, count);
        }
        for record in self.items.iter().filter(|r| r.class == ItemClass::Failed) {
            warn!(
                "  failed {}: {}",
                record.path.display(),
                record.error.as_deref().unwrap_or("unknown error")
            );
        }
        for (mode, accepted) in &self.refreshes {
            info!(
                "Refresh ({}): {}",
                mode,
                if *accepted { "accepted" } else { "failed" }
            );
        }
        if self.deletion_divergence {
            warn!("Deletion pre-scan and write pass disagreed");
        }
        info!("Elapsed: {:.2}s", self.duration.as_secs_f64());
    }
}
