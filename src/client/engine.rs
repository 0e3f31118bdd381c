//! Client sync engine.
//!
//! One attempt:
//! 1. Scan managed directories into a fresh path -> hash map
//! 2. Walk the server's offers, answering yes for matches and receiving the rest
//! 3. Whatever the server never mentioned becomes a deletion candidate
//!
//! A run makes one attempt, and a second one on the same connection if any
//! transfer failed. Only the final attempt drives deletion; empty
//! directories are pruned afterwards.

use crate::client::connection::ServerConnection;
use crate::client::progress::{percent, ProgressSink};
use crate::error::{Result, SyncError};
use crate::index::{
    prune_empty_directories, scan_directories, validate_relative_path, FileHashes, IgnoreMatcher,
};
use crate::protocol::BinaryAnswer;
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error, info, warn};

/// Read buffer for incoming file bodies (64KB)
const TRANSFER_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Client already had the server's content
    Match,
    /// Received and written
    Updated,
    /// Transfer attempted and failed
    Retry,
    /// Client-only file, slated for removal
    Delete,
    /// Client-only file protected by an ignore pattern
    Ignored,
}

/// Per-path outcomes of one attempt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttemptResult {
    outcomes: BTreeMap<String, SyncOutcome>,
}

impl AttemptResult {
    pub fn outcome(&self, path: &str) -> Option<SyncOutcome> {
        self.outcomes.get(path).copied()
    }

    pub fn paths_with(&self, outcome: SyncOutcome) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(move |(_, o)| **o == outcome)
            .map(|(path, _)| path.as_str())
    }

    pub fn count(&self, outcome: SyncOutcome) -> usize {
        self.outcomes.values().filter(|o| **o == outcome).count()
    }

    pub fn has_retries(&self) -> bool {
        self.count(SyncOutcome::Retry) > 0
    }

    fn set(&mut self, path: impl Into<String>, outcome: SyncOutcome) {
        self.outcomes.insert(path.into(), outcome);
    }
}

/// Summary of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files written, across both attempts
    pub updated: usize,
    pub deleted: usize,
    /// Deletion candidates left alone because of an ignore pattern
    pub ignored: usize,
    /// Deletions that failed on the filesystem
    pub delete_failures: usize,
    pub directories_pruned: usize,
    /// Transfers still failing after the second attempt
    pub failed: bool,
}

pub struct SyncEngine {
    root: PathBuf,
    directories: Vec<String>,
    ignore: IgnoreMatcher,
    progress: Arc<dyn ProgressSink>,
}

impl SyncEngine {
    /// `directories` come from the server; unsafe names are dropped here so
    /// nothing outside `root` is ever scanned, written or pruned.
    pub fn new(
        root: PathBuf,
        directories: Vec<String>,
        ignore: IgnoreMatcher,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        let directories = directories
            .into_iter()
            .map(|dir| dir.trim_end_matches('/').to_string())
            .filter(|dir| match validate_relative_path(dir) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Ignoring managed directory {:?} from server: {}", dir, e);
                    false
                }
            })
            .collect();

        Self {
            root,
            directories,
            ignore,
            progress,
        }
    }

    pub fn directories(&self) -> &[String] {
        &self.directories
    }

    /// Full two-pass run over an established connection.
    pub async fn run<R, W>(&self, conn: &mut ServerConnection<R, W>) -> Result<SyncReport>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        self.ensure_directories().await;

        let mut report = SyncReport::default();
        let mut result = self.run_attempt(conn).await?;
        report.updated += result.count(SyncOutcome::Updated);

        if result.has_retries() {
            warn!(
                "{} files failed to sync, retrying once more",
                result.count(SyncOutcome::Retry)
            );
            result = self.run_attempt(conn).await?;
            report.updated += result.count(SyncOutcome::Updated);

            if result.has_retries() {
                let failed: Vec<&str> = result.paths_with(SyncOutcome::Retry).collect();
                error!(
                    "Files failed to sync on second pass: {}",
                    failed.join(", ")
                );
                report.failed = true;
            }
        }

        let (deleted, delete_failures) = self.delete_files(&mut result).await;
        report.deleted = deleted;
        report.delete_failures = delete_failures;
        report.ignored = result.count(SyncOutcome::Ignored);
        report.directories_pruned = self.prune().await.len();

        self.progress.finish();
        Ok(report)
    }

    /// Current client state of all managed directories, read fresh from disk.
    pub async fn client_state(&self) -> Result<FileHashes> {
        let root = self.root.clone();
        let directories = self.directories.clone();
        tokio::task::spawn_blocking(move || scan_directories(&root, &directories))
            .await
            .map_err(|e| SyncError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }

    /// One diff-and-transfer pass.
    pub async fn run_attempt<R, W>(&self, conn: &mut ServerConnection<R, W>) -> Result<AttemptResult>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!("Starting update");
        let state = self.client_state().await?;
        let mut remaining = state.clone();
        let mut result = AttemptResult::default();

        let total = conn.fetch_file_count().await?;
        if total == 0 {
            info!("Server has no files to sync");
            if !state.is_empty() {
                warn!(
                    "Server index is empty; {} local files under managed directories will be deleted",
                    state.len()
                );
            }
        }

        conn.begin_sync().await?;
        let mut processed = 0usize;
        while let Some(offer) = conn.next_offer().await? {
            processed += 1;

            let destination = match self.resolve(&offer.path) {
                Ok(destination) => destination,
                Err(e) => {
                    warn!("Skipping {:?} offered by server: {}", offer.path, e);
                    conn.answer(BinaryAnswer::Yes).await?;
                    self.progress.report(percent(processed, total), &offer.path);
                    continue;
                }
            };

            if state.get(&offer.path) == Some(&offer.hash) {
                conn.answer(BinaryAnswer::Yes).await?;
                remaining.remove(&offer.path);
                result.set(offer.path.as_str(), SyncOutcome::Match);
            } else {
                conn.answer(BinaryAnswer::No).await?;
                let length = conn.read_length().await?;
                match self.receive_file(conn, &destination, length).await? {
                    Ok(()) => {
                        info!("Updated {}", offer.path);
                        remaining.remove(&offer.path);
                        result.set(offer.path.as_str(), SyncOutcome::Updated);
                    }
                    Err(e) => {
                        error!("Failed to update {}: {}", offer.path, e);
                        result.set(offer.path.as_str(), SyncOutcome::Retry);
                    }
                }
            }

            self.progress.report(percent(processed, total), &offer.path);
        }

        if result.count(SyncOutcome::Updated) == 0 && !result.has_retries() {
            info!("All files match the server");
        }

        for path in remaining.into_keys() {
            result.outcomes.entry(path).or_insert(SyncOutcome::Delete);
        }
        debug!("Attempt finished: {:?}", result);
        Ok(result)
    }

    /// Stream exactly `length` bytes from the connection into `destination`.
    ///
    /// Local write failures keep draining the body so the exchange stays
    /// aligned, and come back as the inner error. Connection failures are
    /// the outer error and end the run.
    async fn receive_file<R, W>(
        &self,
        conn: &mut ServerConnection<R, W>,
        destination: &Path,
        length: u64,
    ) -> Result<io::Result<()>>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        debug!("Receiving {} ({} bytes)", destination.display(), length);

        let mut local_error = None;
        let mut file = match open_destination(destination).await {
            Ok(file) => Some(file),
            Err(e) => {
                local_error = Some(e);
                None
            }
        };

        let reader = conn.body_reader();
        let mut buf = vec![0u8; TRANSFER_BUFFER_SIZE];
        let mut remaining = length;
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = reader.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(SyncError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "connection closed with {remaining} of {length} bytes of {} outstanding",
                        destination.display()
                    ),
                )));
            }
            remaining -= n as u64;

            if let Some(f) = file.as_mut() {
                if let Err(e) = f.write_all(&buf[..n]).await {
                    local_error = Some(e);
                    file = None;
                }
            }
        }

        if let Some(mut f) = file {
            if let Err(e) = f.flush().await {
                local_error = Some(e);
            }
        }

        Ok(match local_error {
            Some(e) => Err(e),
            None => Ok(()),
        })
    }

    /// Map a server path onto disk, refusing anything outside the managed directories.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        validate_relative_path(path)?;
        let managed = self.directories.iter().any(|dir| {
            path.strip_prefix(dir.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        });
        if !managed {
            return Err(SyncError::InvalidPath(format!(
                "{path} is outside the managed directories"
            )));
        }
        Ok(self.root.join(path))
    }

    async fn ensure_directories(&self) {
        for dir in &self.directories {
            let path = self.root.join(dir);
            if let Err(e) = fs::create_dir_all(&path).await {
                warn!("{}", SyncError::filesystem(&path, e));
            }
        }
    }

    /// Delete every `Delete` candidate not protected by an ignore pattern.
    /// Returns (deleted, failed).
    async fn delete_files(&self, result: &mut AttemptResult) -> (usize, usize) {
        info!("Starting deletion");
        let candidates: Vec<String> = result
            .paths_with(SyncOutcome::Delete)
            .map(str::to_string)
            .collect();
        if candidates.is_empty() {
            info!("No files to delete");
            return (0, 0);
        }

        if !self.ignore.is_empty() {
            info!("Ignore patterns: {}", self.ignore.patterns().join(", "));
        }

        let mut deleted = 0;
        let mut failures = 0;
        for path in candidates {
            if self.ignore.is_match(&path) {
                info!("Ignoring {}, not deleted", path);
                result.set(path, SyncOutcome::Ignored);
                continue;
            }

            let full = self.root.join(&path);
            match fs::remove_file(&full).await {
                Ok(()) => {
                    info!("Deleted {}", path);
                    deleted += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} already gone", path);
                }
                Err(e) => {
                    warn!("Failed to delete: {}", SyncError::filesystem(&full, e));
                    failures += 1;
                }
            }
        }
        (deleted, failures)
    }

    async fn prune(&self) -> Vec<PathBuf> {
        let roots: Vec<PathBuf> = self.directories.iter().map(|d| self.root.join(d)).collect();
        let removed = tokio::task::spawn_blocking(move || prune_empty_directories(&roots))
            .await
            .unwrap_or_else(|e| {
                warn!("Directory pruning did not complete: {}", e);
                Vec::new()
            });
        for dir in &removed {
            info!("Removed empty directory {}", dir.display());
        }
        removed
    }
}

/// Replace whatever is at `path` with a fresh, empty file.
async fn open_destination(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    match fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is a directory", path.display()),
            ));
        }
        Ok(_) => fs::remove_file(path).await?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    File::create(path).await
}
