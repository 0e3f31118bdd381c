//! Directory scanning and content hashing.
//!
//! Produces the path -> hash map used on both sides of the exchange. Keys
//! are `/`-separated paths relative to the scan root, values are BLAKE3
//! digests in lowercase hex.

use crate::index::FileHashes;
use ignore::WalkBuilder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Component, Path};
use tracing::{debug, warn};

/// Read buffer for hashing (64KB)
const HASH_BUFFER_SIZE: usize = 64 * 1024;

pub fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Key for `path` relative to `root`. `None` for the root itself, paths
/// outside it, and names that are not valid UTF-8.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(name) => parts.push(name.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Hash every regular file under `root/<dir>` for each managed directory.
///
/// Blocking; call through `spawn_blocking` from async code. Entries that
/// cannot be read are logged and left out rather than failing the scan.
pub fn scan_directories(root: &Path, directories: &[String]) -> FileHashes {
    let mut files = FileHashes::new();

    for dir in directories {
        let dir_path = root.join(dir);
        if !dir_path.is_dir() {
            debug!("Managed directory {} does not exist", dir_path.display());
            continue;
        }

        let walker = WalkBuilder::new(&dir_path)
            .standard_filters(false)
            .follow_links(false)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", dir_path.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }

            let Some(key) = relative_key(root, entry.path()) else {
                warn!("Skipping non-UTF-8 path {}", entry.path().display());
                continue;
            };

            match hash_file(entry.path()) {
                Ok(hash) => {
                    files.insert(key, hash);
                }
                Err(e) => warn!("Failed to hash {}: {}", entry.path().display(), e),
            }
        }
    }

    files
}
