use crate::error::Error;
use crate::model::{MediaItem, TagSet};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const IMAGES_DIR: &str = "images";
const INFO_SUFFIX: &str = ".info";
const METADATA_FILE: &str = "metadata.json";
const THUMBNAIL_MARKER: &str = "_thumbnail";

#[derive(Debug, Deserialize)]
struct ItemMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    ext: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Default)]
pub struct LibraryScan {
    pub items: Vec<MediaItem>,
    /// `.info` folders that could not be turned into an item.
    pub unreadable: usize,
}

impl LibraryScan {
    pub fn tagged(&self) -> usize {
        self.items.iter().filter(|i| !i.tags.is_empty()).count()
    }

    pub fn total_tags(&self) -> usize {
        self.items.iter().map(|i| i.tags.len()).sum()
    }
}

/// Fails with `SourceUnavailable` unless `root` and its `images` folder exist.
pub fn check_source(root: &Path) -> Result<(), Error> {
    if !root.is_dir() {
        return Err(Error::SourceUnavailable(format!(
            "library path does not exist: {}",
            root.display()
        )));
    }
    let images = root.join(IMAGES_DIR);
    if !images.is_dir() {
        return Err(Error::SourceUnavailable(format!(
            "images folder does not exist: {}",
            images.display()
        )));
    }
    Ok(())
}

/// Enumerate `<root>/images/*.info` folders. A missing root or `images`
/// folder is fatal; a broken item folder is logged and skipped.
pub fn scan_library(root: &Path) -> Result<LibraryScan, Error> {
    check_source(root)?;
    let images = root.join(IMAGES_DIR);

    let mut scan = LibraryScan::default();
    let mut info_dirs: Vec<PathBuf> = WalkDir::new(&images)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                error!("Error reading {}: {}", images.display(), err);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(INFO_SUFFIX))
        .map(|entry| entry.into_path())
        .collect();
    info_dirs.sort();

    for info_dir in info_dirs {
        match read_item(&info_dir) {
            Ok(item) => {
                debug!("Found {}: {:?}", item.file_name(), item.tags);
                scan.items.push(item);
            }
            Err(message) => {
                warn!("Skipping {}: {}", info_dir.display(), message);
                scan.unreadable += 1;
            }
        }
    }

    info!(
        "Found {} media files ({} skipped)",
        scan.items.len(),
        scan.unreadable
    );
    Ok(scan)
}

fn read_item(info_dir: &Path) -> Result<MediaItem, String> {
    let metadata_path = info_dir.join(METADATA_FILE);
    if !metadata_path.is_file() {
        return Err(format!("no {}", METADATA_FILE));
    }
    let raw = fs::read_to_string(&metadata_path).map_err(|e| e.to_string())?;
    let metadata: ItemMetadata = serde_json::from_str(&raw)
        .map_err(|e| format!("invalid {}: {}", METADATA_FILE, e))?;

    let media = find_media_file(info_dir, &metadata.ext)
        .ok_or_else(|| format!("no media file with extension '{}'", metadata.ext))?;
    let path = canonical(&media)?;
    let container_path = canonical(info_dir)?;

    let display_name = if metadata.name.trim().is_empty() {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        metadata.name
    };

    Ok(MediaItem {
        path,
        tags: normalize_tags(metadata.tags),
        display_name,
        container_path,
    })
}

/// Canonical path in the form the media server knows it by.
fn canonical(path: &Path) -> Result<PathBuf, String> {
    fs::canonicalize(path)
        .map(strip_verbatim_prefix)
        .map_err(|e| e.to_string())
}

/// On Windows `canonicalize` yields `\\?\C:\...` or `\\?\UNC\host\...`;
/// the server matches plain `C:\...` and `\\host\...` paths.
fn strip_verbatim_prefix(path: PathBuf) -> PathBuf {
    let stripped = path.to_str().and_then(|raw| {
        if let Some(rest) = raw.strip_prefix(r"\\?\UNC\") {
            return Some(PathBuf::from(format!(r"\\{}", rest)));
        }
        raw.strip_prefix(r"\\?\")
            .filter(|rest| rest.as_bytes().get(1) == Some(&b':'))
            .map(PathBuf::from)
    });
    stripped.unwrap_or(path)
}

/// Empty strings cannot round-trip through a sidecar, so they are dropped here.
fn normalize_tags(tags: Vec<String>) -> TagSet {
    tags.into_iter().filter(|t| !t.is_empty()).collect()
}

fn find_media_file(info_dir: &Path, ext: &str) -> Option<PathBuf> {
    if ext.is_empty() {
        return None;
    }
    let wanted = ext.to_lowercase();
    let mut candidates: Vec<PathBuf> = fs::read_dir(info_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .map(|e| e.to_string_lossy().to_lowercase() == wanted)
                .unwrap_or(false)
        })
        .filter(|path| {
            !path
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase().contains(THUMBNAIL_MARKER))
                .unwrap_or(true)
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}
