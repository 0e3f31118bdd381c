//! Empty-directory pruning after deletions.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Remove every directory under each root that is empty, bottom-up.
///
/// The roots themselves are never removed. Returns the removed directories
/// in removal order; failures are logged and leave the directory in place.
pub fn prune_empty_directories(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    for root in roots {
        if root.is_dir() {
            prune_children(root, &mut removed);
        }
    }
    removed
}

/// Prune below `dir`, returning whether `dir` is now empty.
fn prune_children(dir: &Path, removed: &mut Vec<PathBuf>) -> bool {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to read directory {}: {}", dir.display(), e);
            return false;
        }
    };

    let mut empty = true;
    for entry in entries {
        let Ok(entry) = entry else {
            empty = false;
            continue;
        };
        let path = entry.path();
        // Symlinks count as content, never followed
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);

        if is_dir && prune_children(&path, removed) {
            match fs::remove_dir(&path) {
                Ok(()) => {
                    debug!("Removed empty directory {}", path.display());
                    removed.push(path);
                    continue;
                }
                Err(e) => warn!("Failed to remove directory {}: {}", path.display(), e),
            }
        }
        empty = false;
    }
    empty
}
