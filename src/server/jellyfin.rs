//! Blocking HTTP client for the Jellyfin endpoints the sync touches.

use super::{MediaServer, ServerInfo};
use crate::config::ServerConfig;
use crate::error::Error;
use crate::model::{RefreshMode, RefreshTask};
use reqwest::blocking::{Client, Response};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

const TOKEN_HEADER: &str = "X-Emby-Token";
const USER_AGENT: &str = concat!("tag-sync/", env!("CARGO_PKG_VERSION"));
const ITEM_REFRESH_TIMEOUT: Duration = Duration::from_secs(20);

pub struct JellyfinClient {
    client: Client,
    base_url: String,
    library_id: String,
    api_key: String,
    request_timeout: Duration,
    lookup_timeout: Duration,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SystemInfo {
    #[serde(default)]
    server_name: Option<String>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemRef {
    #[serde(default)]
    id: Option<String>,
}

impl JellyfinClient {
    pub fn new(config: &ServerConfig, library_id: &str) -> Result<Self, Error> {
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(connect_timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            library_id: library_id.to_string(),
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            lookup_timeout: connect_timeout,
        })
    }

    pub fn from_config(config: &ServerConfig) -> Result<Self, Error> {
        Self::new(config, &config.library_id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str, query: &[(&str, String)], timeout: Duration) -> Result<Response, Error> {
        let response = self
            .client
            .get(self.url(path))
            .header(TOKEN_HEADER, &self.api_key)
            .query(query)
            .timeout(timeout)
            .send()?;
        Ok(response)
    }

    fn post_refresh(&self, item_id: &str, query: &[(&str, String)], timeout: Duration) -> Result<(), Error> {
        let path = format!("/Items/{}/Refresh", item_id);
        let response = self
            .client
            .post(self.url(&path))
            .header(TOKEN_HEADER, &self.api_key)
            .query(query)
            .timeout(timeout)
            .send()?;
        expect_accepted(response, &path)
    }
}

fn expect_accepted(response: Response, path: &str) -> Result<(), Error> {
    let status = response.status();
    if status == StatusCode::OK || status == StatusCode::NO_CONTENT {
        return Ok(());
    }
    let body = response.text().unwrap_or_default();
    Err(Error::Remote(format!(
        "{} returned {}: {}",
        path,
        status,
        body.trim()
    )))
}

fn expect_ok(response: Response, path: &str) -> Result<Response, Error> {
    if response.status() == StatusCode::OK {
        Ok(response)
    } else {
        Err(Error::Remote(format!(
            "{} returned {}",
            path,
            response.status()
        )))
    }
}

fn bool_param(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

/// Query for a recursive library refresh.
pub fn library_refresh_params(mode: RefreshMode) -> Vec<(&'static str, String)> {
    vec![
        ("Recursive", bool_param(true)),
        ("MetadataRefreshMode", mode.metadata_refresh_mode().to_string()),
        ("ImageRefreshMode", "Default".to_string()),
        ("ReplaceAllMetadata", bool_param(mode.replace_all_metadata())),
        ("ReplaceAllImages", bool_param(false)),
    ]
}

/// Query for a single-item refresh. A full metadata pass on one item makes the
/// server re-read its NFO; without ReplaceAllMetadata it keeps manual edits.
pub fn item_refresh_params(mode: RefreshMode) -> Vec<(&'static str, String)> {
    vec![
        ("Recursive", bool_param(false)),
        ("MetadataRefreshMode", "FullRefresh".to_string()),
        ("ImageRefreshMode", "Default".to_string()),
        ("ReplaceAllMetadata", bool_param(mode.replace_all_metadata())),
        ("ReplaceAllImages", bool_param(false)),
    ]
}

impl MediaServer for JellyfinClient {
    fn server_info(&self) -> Result<ServerInfo, Error> {
        let path = "/System/Info";
        let response = expect_ok(self.get(path, &[], self.lookup_timeout)?, path)?;
        let info: SystemInfo = response.json()?;
        let info = ServerInfo {
            name: info.server_name.unwrap_or_else(|| "Unknown".to_string()),
            version: info.version.unwrap_or_else(|| "Unknown".to_string()),
        };
        info!("Connected to {} (version {})", info.name, info.version);
        Ok(info)
    }

    fn refresh_library(&self, mode: RefreshMode) -> Result<(), Error> {
        info!("Triggering library refresh: {}", mode);
        self.post_refresh(
            &self.library_id,
            &library_refresh_params(mode),
            self.request_timeout,
        )?;
        info!("Library refresh accepted: {}", mode);
        Ok(())
    }

    fn list_tasks(&self) -> Result<Vec<RefreshTask>, Error> {
        let path = "/ScheduledTasks";
        let response = expect_ok(self.get(path, &[], self.lookup_timeout)?, path)?;
        Ok(response.json()?)
    }

    fn find_item_by_path(&self, file_path: &str) -> Result<Option<String>, Error> {
        let path = "/Items/ByPath";
        let response = self.get(path, &[("Path", file_path.to_string())], self.lookup_timeout)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let item: ItemRef = expect_ok(response, path)?.json()?;
        debug!("Resolved {} to item {:?}", file_path, item.id);
        Ok(item.id.filter(|id| !id.is_empty()))
    }

    fn refresh_item(&self, item_id: &str, mode: RefreshMode) -> Result<(), Error> {
        self.post_refresh(item_id, &item_refresh_params(mode), ITEM_REFRESH_TIMEOUT)
    }
}
