//! ChunkStore: persists chunk payloads of in-flight uploads beneath
//! `root/{file_id}/chunk_{index}` together with a `status.json` progress record.
//!
//! Payloads are first streamed to a staging file directly under `root`, then
//! renamed into place, so a failed transfer never clobbers a chunk that was
//! already stored for the same index.

use super::{UploadError, UploadResult};
use crate::models::upload::{ChunkMeta, UploadStatus};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use std::{
    collections::BTreeSet,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use uuid::Uuid;

pub const STATUS_FILE: &str = "status.json";
const CHUNK_PREFIX: &str = "chunk_";
const STAGING_PREFIX: &str = ".incoming-";
const MAX_FILE_ID_LEN: usize = 255;

/// A payload written to the working area but not yet attached to an upload.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    size: u64,
}

impl StagedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Remove the staged payload, best-effort.
    pub async fn discard(self) {
        if let Err(err) = fs::remove_file(&self.path).await {
            debug!("failed to discard {}: {}", self.path.display(), err);
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject identifiers that could escape the working area.
    ///
    /// Leading dots are refused so ids never collide with staging files.
    pub fn validate_file_id(file_id: &str) -> UploadResult<()> {
        let invalid = file_id.is_empty()
            || file_id.len() > MAX_FILE_ID_LEN
            || file_id.starts_with('.')
            || file_id
                .chars()
                .any(|c| c == '/' || c == '\\' || c.is_control());
        if invalid {
            return Err(UploadError::InvalidFileId(file_id.to_string()));
        }
        Ok(())
    }

    pub fn session_dir(&self, file_id: &str) -> PathBuf {
        self.root.join(file_id)
    }

    pub fn chunk_path(&self, file_id: &str, index: u32) -> PathBuf {
        self.session_dir(file_id)
            .join(format!("{}{}", CHUNK_PREFIX, index))
    }

    /// Stream a payload into a fresh staging file.
    ///
    /// The staging file is removed again if the stream or the disk fails.
    pub async fn stage<S>(&self, stream: S) -> UploadResult<StagedFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        fs::create_dir_all(&self.root).await?;
        let path = self
            .root
            .join(format!("{}{}", STAGING_PREFIX, Uuid::new_v4()));
        let mut file = File::create(&path).await?;

        let mut size = 0u64;
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&path).await;
                    return Err(UploadError::Io(err));
                }
            };
            size += chunk.len() as u64;
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&path).await;
                return Err(UploadError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&path).await;
            return Err(UploadError::Io(err));
        }

        Ok(StagedFile { path, size })
    }

    /// Attach a staged payload as chunk `meta.chunk_index` of `meta.file_id`.
    ///
    /// Creates the upload's working directory on first use. Re-sending an index
    /// replaces the stored chunk.
    pub async fn commit_chunk(&self, meta: &ChunkMeta, staged: StagedFile) -> UploadResult<()> {
        if let Err(err) = validate_meta(meta) {
            staged.discard().await;
            return Err(err);
        }

        let dir = self.session_dir(&meta.file_id);
        if let Err(err) = fs::create_dir_all(&dir).await {
            staged.discard().await;
            return Err(UploadError::Io(err));
        }

        let target = self.chunk_path(&meta.file_id, meta.chunk_index);
        if let Err(err) = fs::rename(&staged.path, &target).await {
            staged.discard().await;
            return Err(UploadError::Io(err));
        }

        debug!(
            "stored chunk {}/{} ({} bytes) for upload {}",
            meta.chunk_index + 1,
            meta.total_chunks,
            staged.size,
            meta.file_id
        );
        Ok(())
    }

    /// Received chunk indices and their combined size.
    ///
    /// A missing working directory means nothing has been received.
    pub async fn scan(&self, file_id: &str) -> io::Result<(BTreeSet<u32>, u64)> {
        let mut indices = BTreeSet::new();
        let mut total = 0u64;

        let mut entries = match fs::read_dir(self.session_dir(file_id)).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok((indices, total)),
            Err(err) => return Err(err),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(index) = name
                .to_str()
                .and_then(|n| n.strip_prefix(CHUNK_PREFIX))
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            match entry.metadata().await {
                Ok(meta) if meta.is_file() => {
                    indices.insert(index);
                    total += meta.len();
                }
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        Ok((indices, total))
    }

    /// Bytes already stored for `file_id`; 0 for unknown uploads.
    pub async fn uploaded_size(&self, file_id: &str) -> UploadResult<u64> {
        Self::validate_file_id(file_id)?;
        let (_, total) = self.scan(file_id).await?;
        Ok(total)
    }

    /// Recompute progress from the chunk files on disk and persist it.
    pub async fn write_status(&self, meta: &ChunkMeta) -> UploadResult<UploadStatus> {
        let (received_chunks, uploaded_size) = self.scan(&meta.file_id).await?;
        let status = UploadStatus {
            file_id: meta.file_id.clone(),
            filename: meta.filename.clone(),
            filesize: meta.filesize,
            total_chunks: meta.total_chunks,
            uploaded_chunks: received_chunks.len() as u32,
            received_chunks,
            is_compressed: meta.is_compressed,
            uploaded_size,
        };

        let dir = self.session_dir(&meta.file_id);
        let json = serde_json::to_vec_pretty(&status).map_err(io::Error::other)?;
        let tmp_path = dir.join(format!(".{}-{}", STATUS_FILE, Uuid::new_v4()));
        fs::write(&tmp_path, json).await?;
        if let Err(err) = fs::rename(&tmp_path, dir.join(STATUS_FILE)).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(UploadError::Io(err));
        }

        Ok(status)
    }

    pub async fn read_status(&self, file_id: &str) -> UploadResult<Option<UploadStatus>> {
        Self::validate_file_id(file_id)?;
        let raw = match fs::read(self.session_dir(file_id).join(STATUS_FILE)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(UploadError::Io(err)),
        };
        let status = serde_json::from_slice(&raw)
            .map_err(|err| io::Error::new(ErrorKind::InvalidData, err))?;
        Ok(Some(status))
    }

    /// Delete the working directory of `file_id`, including every chunk.
    pub async fn remove_session(&self, file_id: &str) -> io::Result<()> {
        match fs::remove_dir_all(self.session_dir(file_id)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Remove working directories and staging files untouched for `ttl`.
    ///
    /// Uploads for which `is_busy` returns true are skipped.
    pub async fn sweep_stale<F>(&self, ttl: Duration, is_busy: F) -> io::Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };

            let last_touched = if meta.is_dir() {
                if is_busy(&name) {
                    continue;
                }
                match newest_mtime(&entry.path()).await {
                    Ok(modified) => modified,
                    Err(err) if err.kind() == ErrorKind::NotFound => continue,
                    Err(err) => return Err(err),
                }
            } else if name.starts_with(STAGING_PREFIX) {
                meta.modified()?
            } else {
                continue;
            };

            let idle = now.duration_since(last_touched).unwrap_or_default();
            if idle < ttl {
                continue;
            }

            let result = if meta.is_dir() {
                fs::remove_dir_all(entry.path()).await
            } else {
                fs::remove_file(entry.path()).await
            };
            match result {
                Ok(()) => {
                    info!("swept abandoned upload state {} (idle {:?})", name, idle);
                    removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }

        Ok(removed)
    }
}

fn validate_meta(meta: &ChunkMeta) -> UploadResult<()> {
    ChunkStore::validate_file_id(&meta.file_id)?;
    if meta.total_chunks == 0 {
        return Err(UploadError::Validation(
            "total_chunks must be at least 1".into(),
        ));
    }
    if meta.chunk_index >= meta.total_chunks {
        return Err(UploadError::ChunkOutOfRange {
            index: meta.chunk_index,
            total: meta.total_chunks,
        });
    }
    Ok(())
}

/// Latest modification time of a directory and the files directly inside it.
async fn newest_mtime(dir: &Path) -> io::Result<SystemTime> {
    let mut newest = fs::metadata(dir).await?.modified()?;
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if let Ok(modified) = entry.metadata().await.and_then(|m| m.modified()) {
            newest = newest.max(modified);
        }
    }
    Ok(newest)
}
