pub mod xml;

use crate::error::Error;
use crate::model::{MediaItem, TagSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Nothing was written: the item has no tags or the document already exists.
    Skipped,
}

/// Reads and rewrites the tag section of the NFO document next to each item.
#[derive(Debug, Clone)]
pub struct SidecarTagStore {
    file_name: String,
}

impl SidecarTagStore {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    pub fn sidecar_path(&self, item: &MediaItem) -> PathBuf {
        item.container_path.join(&self.file_name)
    }

    /// `Ok(None)` when the document does not exist.
    pub fn try_read_tags(&self, path: &Path) -> Result<Option<TagSet>, Error> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|e| Error::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        xml::parse_tags(&content)
            .map(Some)
            .map_err(|message| Error::Parse {
                path: path.to_path_buf(),
                message,
            })
    }

    /// Lenient read: a missing or unreadable document has no tags.
    pub fn read_tags(&self, path: &Path) -> TagSet {
        match self.try_read_tags(path) {
            Ok(tags) => tags.unwrap_or_default(),
            Err(err) => {
                warn!("{}; treating it as untagged", err);
                TagSet::new()
            }
        }
    }

    /// Replace the document's whole tag section with `tags`.
    pub fn write_tags(&self, path: &Path, tags: &TagSet) -> Result<(), Error> {
        let content = fs::read_to_string(path).map_err(|e| Error::Write {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        let updated = xml::rewrite_tags(&content, tags).map_err(|message| Error::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        let permissions = fs::metadata(path)
            .map_err(|e| Error::Write {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
            .permissions();
        persist_atomically(path, updated.as_bytes(), Some(permissions))?;
        debug!("Rewrote {} with {} tags", path.display(), tags.len());
        Ok(())
    }

    pub fn create_if_missing(&self, item: &MediaItem, tags: &TagSet) -> Result<CreateOutcome, Error> {
        let path = self.sidecar_path(item);
        if tags.is_empty() || path.exists() {
            return Ok(CreateOutcome::Skipped);
        }
        let content = xml::scaffold(&item.display_name, tags).map_err(|message| Error::Write {
            path: path.clone(),
            message,
        })?;
        persist_atomically(&path, content.as_bytes(), new_file_permissions())?;
        debug!("Created {} with {} tags", path.display(), tags.len());
        Ok(CreateOutcome::Created)
    }
}

/// Mode for a sidecar this tool creates. The media server usually runs as
/// another user and has to be able to read it.
#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o644))
}

/// Windows files inherit their ACLs from the folder.
#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}

/// Write to a temp file beside `path`, then rename it into place. The temp
/// file starts out private, so `permissions` are applied before the rename.
fn persist_atomically(
    path: &Path,
    bytes: &[u8],
    permissions: Option<fs::Permissions>,
) -> Result<(), Error> {
    let write_err = |message: String| Error::Write {
        path: path.to_path_buf(),
        message,
    };
    let dir = path
        .parent()
        .ok_or_else(|| write_err("no parent directory".to_string()))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| write_err(e.to_string()))?;
    tmp.write_all(bytes).map_err(|e| write_err(e.to_string()))?;
    if let Some(permissions) = permissions {
        tmp.as_file()
            .set_permissions(permissions)
            .map_err(|e| write_err(e.to_string()))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| write_err(e.to_string()))?;
    tmp.persist(path).map_err(|e| write_err(e.error.to_string()))?;
    Ok(())
}
