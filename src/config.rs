use config::{Config, ConfigError, Environment, File as ConfigFile};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const PLACEHOLDER_API_KEY: &str = "YOUR_API_KEY_HERE";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    pub library: LibraryConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    pub root_path: String,
    #[serde(default = "default_sidecar_file_name")]
    pub sidecar_file_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub url: String,
    pub api_key: String,
    pub library_id: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RefreshScope {
    /// One recursive refresh of the whole library.
    #[default]
    Library,
    /// One refresh per changed item, looked up by path.
    Items,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct PollConfig {
    pub interval_secs: u64,
    pub max_wait_secs: u64,
    pub grace_secs: u64,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub refresh_scope: RefreshScope,
    #[serde(default = "default_per_item_delay_ms")]
    pub per_item_delay_ms: u64,
    #[serde(default = "default_verify_sample_size")]
    pub verify_sample_size: usize,
    #[serde(default = "default_task_name_pattern")]
    pub task_name_pattern: String,
    #[serde(default = "default_lock_file")]
    pub lock_file: String,
    #[serde(default = "default_pre_refresh_poll")]
    pub pre_refresh: PollConfig,
    #[serde(default = "default_final_refresh_poll")]
    pub final_refresh: PollConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            refresh_scope: RefreshScope::default(),
            per_item_delay_ms: default_per_item_delay_ms(),
            verify_sample_size: default_verify_sample_size(),
            task_name_pattern: default_task_name_pattern(),
            lock_file: default_lock_file(),
            pre_refresh: default_pre_refresh_poll(),
            final_refresh: default_final_refresh_poll(),
        }
    }
}

fn default_sidecar_file_name() -> String {
    "movie.nfo".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    30
}

fn default_per_item_delay_ms() -> u64 {
    250
}

fn default_verify_sample_size() -> usize {
    5
}

fn default_task_name_pattern() -> String {
    "Scan|Refresh".to_string()
}

fn default_lock_file() -> String {
    ".tag-sync.lock".to_string()
}

fn default_pre_refresh_poll() -> PollConfig {
    PollConfig {
        interval_secs: 10,
        max_wait_secs: 900,
        grace_secs: 5,
    }
}

fn default_final_refresh_poll() -> PollConfig {
    PollConfig {
        interval_secs: 5,
        max_wait_secs: 600,
        grace_secs: 3,
    }
}

/// Load `Config.toml` (or `path`) and overlay `TAG_SYNC__*` environment variables.
pub fn load_configuration(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let file_source = match path {
        Some(p) => ConfigFile::from(p.to_path_buf()).required(true),
        None => ConfigFile::with_name("Config").required(false),
    };
    let builder = Config::builder()
        .add_source(file_source)
        .add_source(Environment::with_prefix("TAG_SYNC").separator("__"))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.library.root_path.trim().is_empty() {
            return Err(crate::Error::Config("library.root_path is empty".into()));
        }
        if self.library.sidecar_file_name.trim().is_empty() {
            return Err(crate::Error::Config(
                "library.sidecar_file_name is empty".into(),
            ));
        }
        if self.server.url.trim().is_empty() {
            return Err(crate::Error::Config("server.url is empty".into()));
        }
        let key = self.server.api_key.trim();
        if key.is_empty() || key == PLACEHOLDER_API_KEY {
            return Err(crate::Error::Config(
                "server.api_key has not been configured".into(),
            ));
        }
        if self.server.library_id.trim().is_empty() {
            return Err(crate::Error::Config("server.library_id is empty".into()));
        }
        if self.sync.pre_refresh.interval_secs == 0 || self.sync.final_refresh.interval_secs == 0
        {
            return Err(crate::Error::Config(
                "poll interval_secs must be at least 1".into(),
            ));
        }
        Regex::new(&self.sync.task_name_pattern).map_err(|e| {
            crate::Error::Config(format!("sync.task_name_pattern is invalid: {}", e))
        })?;
        Ok(())
    }

    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.library.root_path)
    }

    /// Lock file location; relative paths live under the library root.
    pub fn lock_path(&self) -> PathBuf {
        let lock = Path::new(&self.sync.lock_file);
        if lock.is_absolute() {
            lock.to_path_buf()
        } else {
            self.root_path().join(lock)
        }
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> AppConfig {
        let mut copy = self.clone();
        copy.server.api_key = redact(&self.server.api_key);
        copy
    }
}

fn redact(secret: &str) -> String {
    let visible: String = secret.chars().take(4).collect();
    if secret.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", visible)
    }
}
