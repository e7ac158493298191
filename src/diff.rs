use crate::model::{MediaItem, TagDelta, TagSet};
use crate::sidecar::SidecarTagStore;
use tracing::debug;

/// Plain set difference between the library's tags and the sidecar's.
/// Strings compare exactly; trimming and case folding belong to the caller.
pub fn compute_delta(current: &TagSet, existing: &TagSet) -> TagDelta {
    TagDelta {
        added: current.difference(existing).cloned().collect(),
        removed: existing.difference(current).cloned().collect(),
    }
}

/// Read-only pass over the batch: does any sidecar carry a tag the library
/// no longer has? Items without a sidecar cannot contribute a removal.
pub fn prescan_deletions(items: &[MediaItem], store: &SidecarTagStore) -> bool {
    for item in items {
        let path = store.sidecar_path(item);
        if !path.exists() {
            continue;
        }
        let existing = store.read_tags(&path);
        let delta = compute_delta(&item.tags, &existing);
        if delta.has_removals() {
            debug!(
                "Deletion detected for {}: {:?}",
                item.file_name(),
                delta.removed
            );
            return true;
        }
    }
    false
}
