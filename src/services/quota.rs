//! Storage quota for the public upload directory.
//!
//! Usage is recomputed with a full recursive walk on every admission check.
//! The working area is excluded so partial uploads never count against the
//! ceiling; only published bytes do.

use super::{UploadError, UploadResult};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct QuotaTracker {
    root: PathBuf,
    excluded: PathBuf,
    ceiling: u64,
}

impl QuotaTracker {
    /// Track `root`, skipping the `excluded` subtree (the working area).
    pub fn new(root: impl Into<PathBuf>, excluded: impl Into<PathBuf>, ceiling: u64) -> Self {
        Self {
            root: root.into(),
            excluded: excluded.into(),
            ceiling,
        }
    }

    /// Total size of all regular files under the root.
    ///
    /// Entries that disappear mid-walk are ignored.
    pub async fn usage(&self) -> io::Result<u64> {
        let mut total = 0u64;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err),
            };

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = match entry.file_type().await {
                    Ok(ft) => ft,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err),
                };

                if file_type.is_dir() {
                    if !same_path(&path, &self.excluded).await {
                        pending.push(path);
                    }
                } else if file_type.is_file() {
                    match entry.metadata().await {
                        Ok(meta) => total += meta.len(),
                        Err(err) if err.kind() == ErrorKind::NotFound => {}
                        Err(err) => return Err(err),
                    }
                }
            }
        }

        Ok(total)
    }

    /// Bytes that can still be admitted right now.
    pub async fn headroom(&self) -> io::Result<u64> {
        Ok(self.ceiling.saturating_sub(self.usage().await?))
    }

    /// Admit `candidate` bytes iff `usage + candidate <= ceiling`.
    ///
    /// Returns the usage measured before admission. Not a reservation: callers
    /// serialise admission and publication themselves.
    pub async fn admit(&self, candidate: u64) -> UploadResult<u64> {
        let used = self.usage().await?;
        let projected = used.saturating_add(candidate);
        debug!(
            "quota check: used={} incoming={} ceiling={}",
            used, candidate, self.ceiling
        );

        if projected > self.ceiling {
            return Err(UploadError::QuotaExceeded {
                limit: self.ceiling,
                used,
                incoming: candidate,
            });
        }
        Ok(used)
    }
}

async fn same_path(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    if a.file_name() != b.file_name() {
        return false;
    }
    match (fs::canonicalize(a).await, fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Human-readable size with two decimals, base 1024.
pub fn format_size(size_bytes: u64) -> String {
    let mut size = size_bytes as f64;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if size < 1024.0 {
            return format!("{:.2} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.2} PB", size)
}
