//! File index: what the server owns, and how either side describes a tree.

pub mod patterns;
pub mod prune;
pub mod scan;

pub use patterns::IgnoreMatcher;
pub use prune::prune_empty_directories;
pub use scan::{hash_file, scan_directories};

use crate::error::{Result, SyncError};
use std::collections::BTreeMap;
use std::path::{Component, Path};
use tracing::info;

/// Relative path -> content hash, iterated in path order
pub type FileHashes = BTreeMap<String, String>;

/// The server's canonical state: managed directories plus every file in them.
///
/// Built once at startup and shared read-only between sessions.
#[derive(Debug, Clone, Default)]
pub struct FileIndex {
    directories: Vec<String>,
    files: FileHashes,
}

impl FileIndex {
    pub fn new(directories: Vec<String>, files: FileHashes) -> Self {
        Self { directories, files }
    }

    /// Scan `root` for the given managed directories. Blocking.
    pub fn load(root: &Path, directories: Vec<String>) -> Result<Self> {
        for dir in &directories {
            validate_relative_path(dir)?;
        }
        let files = scan_directories(root, &directories);
        info!(
            "Indexed {} files across {} managed directories in {}",
            files.len(),
            directories.len(),
            root.display()
        );
        Ok(Self { directories, files })
    }

    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    pub fn files(&self) -> &FileHashes {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Validate that a relative path is safe and doesn't escape its root.
pub fn validate_relative_path(relative: &str) -> Result<()> {
    if relative.is_empty() {
        return Err(SyncError::InvalidPath("Empty path not allowed".to_string()));
    }

    let rel_path = Path::new(relative);
    if rel_path.is_absolute() || relative.starts_with('/') || relative.starts_with('\\') {
        return Err(SyncError::InvalidPath(format!(
            "Absolute paths not allowed: {relative}"
        )));
    }

    for component in rel_path.components() {
        match component {
            Component::ParentDir => {
                return Err(SyncError::InvalidPath(format!(
                    "Path traversal not allowed: {relative}"
                )));
            }
            Component::Prefix(_) | Component::RootDir => {
                return Err(SyncError::InvalidPath(format!(
                    "Rooted paths not allowed: {relative}"
                )));
            }
            Component::CurDir | Component::Normal(_) => {}
        }
    }

    // Windows separators would slip past component parsing on unix
    if relative.split(['/', '\\']).any(|part| part == "..") {
        return Err(SyncError::InvalidPath(format!(
            "Path traversal not allowed: {relative}"
        )));
    }

    Ok(())
}
