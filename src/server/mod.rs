pub mod jellyfin;

use crate::error::Error;
use crate::model::{RefreshMode, RefreshTask};

pub use jellyfin::JellyfinClient;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// The operations the sync needs from the media server.
///
/// Every call is blocking and bounded by the client's timeouts. Refresh
/// calls only enqueue work; completion is observed through `list_tasks`.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
pub trait MediaServer {
    fn server_info(&self) -> Result<ServerInfo, Error>;

    /// Recursive refresh of the configured library.
    fn refresh_library(&self, mode: RefreshMode) -> Result<(), Error>;

    fn list_tasks(&self) -> Result<Vec<RefreshTask>, Error>;

    /// Server-side id for a media file, `None` if the server does not know it.
    fn find_item_by_path(&self, path: &str) -> Result<Option<String>, Error>;

    /// Non-recursive refresh of one item.
    fn refresh_item(&self, item_id: &str, mode: RefreshMode) -> Result<(), Error>;
}
