use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

pub type TagSet = BTreeSet<String>;

/// One item from the tag library, as produced by the scanner for this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Canonical path of the media file.
    pub path: PathBuf,
    pub tags: TagSet,
    /// Used as the title when a sidecar has to be created.
    pub display_name: String,
    /// Folder holding the sidecar document.
    pub container_path: PathBuf,
}

impl MediaItem {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.display_name.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDelta {
    pub added: TagSet,
    pub removed: TagSet,
}

impl TagDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }

    pub fn has_removals(&self) -> bool {
        !self.removed.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub changed: usize,
    pub has_deletions: bool,
}

impl BatchOutcome {
    /// Nothing was written, so there is nothing for the server to pick up.
    pub fn is_noop(&self) -> bool {
        self.changed == 0 && self.succeeded == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TaskState {
    Idle,
    Running,
    Cancelling,
    Completed,
    #[serde(other)]
    Other,
}

impl TaskState {
    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Running | TaskState::Cancelling)
    }
}

/// Read-only view of an entry in the server's scheduled task list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RefreshTask {
    #[serde(alias = "name")]
    pub name: String,
    #[serde(alias = "state")]
    pub state: TaskState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Rebuild every item's metadata from scratch, replacing what the server holds.
    Destructive,
    /// Only ingest metadata the server does not know about yet.
    NonDestructive,
}

impl RefreshMode {
    pub fn metadata_refresh_mode(&self) -> &'static str {
        match self {
            RefreshMode::Destructive => "FullRefresh",
            RefreshMode::NonDestructive => "Default",
        }
    }

    pub fn replace_all_metadata(&self) -> bool {
        matches!(self, RefreshMode::Destructive)
    }
}

impl std::fmt::Display for RefreshMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshMode::Destructive => write!(f, "replace all metadata"),
            RefreshMode::NonDestructive => write!(f, "search for missing metadata"),
        }
    }
}
