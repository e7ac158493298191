#![allow(dead_code)]

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tag_sync::config::{AppConfig, LibraryConfig, PollConfig, ServerConfig, SyncConfig};
use tag_sync::model::{RefreshMode, RefreshTask, TagSet, TaskState};
use tag_sync::poller::Sleeper;
use tag_sync::server::{MediaServer, ServerInfo};
use tag_sync::sidecar::SidecarTagStore;
use tag_sync::Error;
use tempfile::{tempdir, TempDir};

pub const SIDECAR: &str = "movie.nfo";

pub fn tags(list: &[&str]) -> TagSet {
    list.iter().map(|t| t.to_string()).collect()
}

pub fn nfo(title: &str, list: &[&str]) -> String {
    let mut doc = format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\" standalone=\"yes\"?>\n<movie>\n  <plot />\n  <title>{}</title>\n",
        title
    );
    for tag in list {
        doc.push_str(&format!("  <tag>{}</tag>\n", tag));
    }
    doc.push_str("  <runtime>12</runtime>\n</movie>\n");
    doc
}

/// An Eagle library on disk: `<root>/images/<id>.info/{metadata.json, <name>.<ext>}`.
pub struct EagleLibrary {
    pub dir: TempDir,
}

impl EagleLibrary {
    pub fn new() -> Self {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("images")).unwrap();
        Self { dir }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn info_dir(&self, id: &str) -> PathBuf {
        self.root().join("images").join(format!("{}.info", id))
    }

    pub fn add_item(&self, id: &str, name: &str, list: &[&str]) -> PathBuf {
        let info = self.info_dir(id);
        fs::create_dir_all(&info).unwrap();
        let metadata = serde_json::json!({
            "id": id,
            "name": name,
            "ext": "mp4",
            "tags": list,
        });
        fs::write(info.join("metadata.json"), metadata.to_string()).unwrap();
        fs::write(info.join(format!("{}.mp4", name)), b"not really a video").unwrap();
        fs::write(info.join(format!("{}_thumbnail.png", name)), b"png").unwrap();
        info
    }

    pub fn write_sidecar(&self, id: &str, content: &str) {
        fs::write(self.sidecar(id), content).unwrap();
    }

    pub fn sidecar(&self, id: &str) -> PathBuf {
        self.info_dir(id).join(SIDECAR)
    }

    pub fn sidecar_tags(&self, id: &str) -> TagSet {
        SidecarTagStore::new(SIDECAR).read_tags(&self.sidecar(id))
    }

    pub fn config(&self) -> AppConfig {
        let poll = PollConfig {
            interval_secs: 1,
            max_wait_secs: 30,
            grace_secs: 1,
        };
        AppConfig {
            library: LibraryConfig {
                root_path: self.root().to_string_lossy().into_owned(),
                sidecar_file_name: SIDECAR.to_string(),
            },
            server: ServerConfig {
                url: "http://127.0.0.1:9".to_string(),
                api_key: "test-api-key".to_string(),
                library_id: "library-1".to_string(),
                connect_timeout_secs: 1,
                request_timeout_secs: 1,
            },
            sync: SyncConfig {
                per_item_delay_ms: 0,
                pre_refresh: poll,
                final_refresh: poll,
                ..SyncConfig::default()
            },
        }
    }
}

pub struct NoSleep;

impl Sleeper for NoSleep {
    fn sleep(&self, _duration: Duration) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Info,
    RefreshLibrary(RefreshMode),
    ListTasks,
    FindItem(String),
    RefreshItem(String),
}

#[derive(Default)]
struct FakeState {
    calls: Vec<Call>,
    refresh_failures: VecDeque<RefreshMode>,
    busy_polls: usize,
    rebuild: Vec<PathBuf>,
    unreachable: bool,
}

/// In-memory media server. Clones share state, so a test can keep one handle
/// and give the other to the engine.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<FakeState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next refresh request in `mode` is rejected.
    pub fn fail_refresh(&self, mode: RefreshMode) -> &Self {
        self.state.lock().unwrap().refresh_failures.push_back(mode);
        self
    }

    /// Report a running scan for the first `polls` task-list requests.
    pub fn busy_for(&self, polls: usize) -> &Self {
        self.state.lock().unwrap().busy_polls = polls;
        self
    }

    /// A destructive refresh regenerates these documents without tags.
    pub fn rebuilds(&self, sidecars: Vec<PathBuf>) -> &Self {
        self.state.lock().unwrap().rebuild = sidecars;
        self
    }

    pub fn unreachable(&self) -> &Self {
        self.state.lock().unwrap().unreachable = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn refreshes(&self) -> Vec<RefreshMode> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::RefreshLibrary(mode) => Some(mode),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) -> Result<(), Error> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.unreachable {
            return Err(Error::Remote("connection refused".to_string()));
        }
        Ok(())
    }
}

impl MediaServer for FakeServer {
    fn server_info(&self) -> Result<ServerInfo, Error> {
        self.record(Call::Info)?;
        Ok(ServerInfo {
            name: "fake".to_string(),
            version: "10.9.0".to_string(),
        })
    }

    fn refresh_library(&self, mode: RefreshMode) -> Result<(), Error> {
        self.record(Call::RefreshLibrary(mode))?;
        let mut state = self.state.lock().unwrap();
        if state.refresh_failures.front() == Some(&mode) {
            state.refresh_failures.pop_front();
            return Err(Error::Remote("HTTP 500".to_string()));
        }
        if mode == RefreshMode::Destructive {
            let store = SidecarTagStore::new(SIDECAR);
            for path in &state.rebuild {
                if path.exists() {
                    store.write_tags(path, &TagSet::new()).unwrap();
                }
            }
        }
        Ok(())
    }

    fn list_tasks(&self) -> Result<Vec<RefreshTask>, Error> {
        self.record(Call::ListTasks)?;
        let mut state = self.state.lock().unwrap();
        let task_state = if state.busy_polls > 0 {
            state.busy_polls -= 1;
            TaskState::Running
        } else {
            TaskState::Idle
        };
        Ok(vec![
            RefreshTask {
                name: "Scan Media Library".to_string(),
                state: task_state,
            },
            RefreshTask {
                name: "Clean Log Directory".to_string(),
                state: TaskState::Running,
            },
        ])
    }

    fn find_item_by_path(&self, path: &str) -> Result<Option<String>, Error> {
        self.record(Call::FindItem(path.to_string()))?;
        if path.contains("unknown") {
            return Ok(None);
        }
        Ok(Some(format!("id:{}", path)))
    }

    fn refresh_item(&self, item_id: &str, _mode: RefreshMode) -> Result<(), Error> {
        self.record(Call::RefreshItem(item_id.to_string()))
    }
}
