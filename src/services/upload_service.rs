//! src/services/upload_service.rs
//!
//! UploadService: drives a chunked upload from its first fragment to a
//! published file: chunk persistence, reassembly, optional gzip inflation,
//! quota admission and publication. Also publishes single-request uploads.
//!
//! Two locks keep concurrent requests honest:
//! - a per-`file_id` mutex around "record chunk → check completion → reassemble
//!   → decompress → admit → publish → clean up", so an upload completes once;
//! - a global publish mutex around "admit → pick name → move", so concurrent
//!   uploads can neither overshoot the quota together nor claim the same name.

use super::{
    UploadResult,
    chunk_store::{ChunkStore, StagedFile},
    decompress, listing,
    finalizer::Finalizer,
    quota::QuotaTracker,
    reassembler,
};
use crate::{
    config::AppConfig,
    models::{
        published::{Attribution, PublishedFile},
        upload::{ChunkMeta, ChunkOutcome, UploadStatus},
    },
};
use bytes::Bytes;
use dashmap::DashMap;
use futures::Stream;
use std::{io, path::Path, sync::Arc, time::Duration};
use tokio::{
    fs,
    sync::{Mutex, MutexGuard},
};
use tracing::{info, warn};

#[derive(Clone)]
pub struct UploadService {
    inner: Arc<Inner>,
}

struct Inner {
    chunks: ChunkStore,
    quota: QuotaTracker,
    finalizer: Finalizer,
    strict_decompression: bool,
    locks: DashMap<String, Arc<Mutex<()>>>,
    publish_lock: Mutex<()>,
}

impl UploadService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                chunks: ChunkStore::new(&config.temp_dir),
                quota: QuotaTracker::new(
                    &config.upload_dir,
                    &config.temp_dir,
                    config.max_folder_size,
                ),
                finalizer: Finalizer::new(&config.upload_dir),
                strict_decompression: config.strict_decompression,
                locks: DashMap::new(),
                publish_lock: Mutex::new(()),
            }),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        self.inner.finalizer.upload_dir()
    }

    pub fn temp_dir(&self) -> &Path {
        self.inner.chunks.root()
    }

    /// Bytes already received for `file_id`, used by clients to resume.
    ///
    /// Lock-free; may lag behind writes that are in flight.
    pub async fn uploaded_size(&self, file_id: &str) -> UploadResult<u64> {
        self.inner.chunks.uploaded_size(file_id).await
    }

    /// Last recorded progress of `file_id`, if any chunk has been accepted.
    pub async fn status(&self, file_id: &str) -> UploadResult<Option<UploadStatus>> {
        self.inner.chunks.read_status(file_id).await
    }

    /// Stream a request payload into the working area.
    pub async fn stage<S>(&self, stream: S) -> UploadResult<StagedFile>
    where
        S: Stream<Item = io::Result<Bytes>>,
    {
        self.inner.chunks.stage(stream).await
    }

    /// Record one chunk and, once every chunk is present, publish the file.
    pub async fn accept_chunk(
        &self,
        meta: ChunkMeta,
        staged: StagedFile,
        attribution: &Attribution,
    ) -> UploadResult<ChunkOutcome> {
        if let Err(err) = ChunkStore::validate_file_id(&meta.file_id) {
            staged.discard().await;
            return Err(err);
        }

        let key = self.lock_for(&meta.file_id);
        let _guard = key.lock().await;
        self.record_and_complete(&meta, staged, attribution).await
    }

    async fn record_and_complete(
        &self,
        meta: &ChunkMeta,
        staged: StagedFile,
        attribution: &Attribution,
    ) -> UploadResult<ChunkOutcome> {
        let chunks = &self.inner.chunks;
        chunks.commit_chunk(meta, staged).await?;
        let status = chunks.write_status(meta).await?;

        match self.complete(&status, attribution).await {
            Ok(Some(outcome)) => Ok(outcome),
            Ok(None) => Ok(ChunkOutcome::Partial {
                uploaded_size: status.uploaded_size,
            }),
            Err(err) => {
                warn!("upload {} aborted: {}", status.file_id, err);
                self.discard_session(&status.file_id).await;
                Err(err)
            }
        }
    }

    /// COMPLETE → [DECOMPRESSED] → ADMITTED → PUBLISHED. `None` while chunks
    /// are missing. The caller cleans up on error.
    async fn complete(
        &self,
        status: &UploadStatus,
        attribution: &Attribution,
    ) -> UploadResult<Option<ChunkOutcome>> {
        let Some(artifact) = reassembler::try_complete(&self.inner.chunks, status).await? else {
            return Ok(None);
        };

        // Inflation stops once the output could no longer be admitted.
        let limit = if artifact.compressed {
            self.inner.quota.headroom().await?
        } else {
            u64::MAX
        };
        let final_path = decompress::maybe_decompress(
            artifact.path.clone(),
            artifact.compressed,
            limit,
            self.inner.strict_decompression,
        )
        .await?;
        let size = fs::metadata(&final_path).await?.len();

        // A stream that failed to inflate is published still compressed.
        let filename = if artifact.compressed && final_path == artifact.path {
            format!("{}.gz", status.filename)
        } else {
            status.filename.clone()
        };

        let published_name = {
            let _publish = self.inner.publish_lock.lock().await;
            self.inner.quota.admit(size).await?;
            self.inner
                .finalizer
                .publish(&final_path, &filename, attribution)
                .await?
        };

        self.discard_session(&status.file_id).await;
        info!(
            "upload {} completed: {} ({} bytes, {} chunks)",
            status.file_id, published_name, size, status.total_chunks
        );
        Ok(Some(ChunkOutcome::Completed {
            published_name,
            size,
        }))
    }

    /// Publish every payload of a single request, or none of them.
    ///
    /// The combined size is admitted at once, so a batch that would cross the
    /// ceiling leaves nothing behind.
    pub async fn publish_batch(
        &self,
        files: Vec<(StagedFile, String)>,
        attribution: &Attribution,
    ) -> UploadResult<Vec<String>> {
        let total = files
            .iter()
            .fold(0u64, |acc, (staged, _)| acc.saturating_add(staged.size()));

        let _publish = self.inner.publish_lock.lock().await;
        if let Err(err) = self.inner.quota.admit(total).await {
            for (staged, _) in files {
                staged.discard().await;
            }
            return Err(err);
        }

        let mut published = Vec::with_capacity(files.len());
        let mut pending = files.into_iter();
        while let Some((staged, filename)) = pending.next() {
            match self
                .inner
                .finalizer
                .publish(staged.path(), &filename, attribution)
                .await
            {
                Ok(name) => published.push(name),
                Err(err) => {
                    staged.discard().await;
                    for (rest, _) in pending {
                        rest.discard().await;
                    }
                    return Err(err);
                }
            }
        }
        Ok(published)
    }

    pub async fn list_published(
        &self,
        attribution: &Attribution,
    ) -> UploadResult<Vec<PublishedFile>> {
        Ok(listing::list_for(self.upload_dir(), attribution).await?)
    }

    /// Remove working state of uploads idle for longer than `ttl`.
    pub async fn sweep_stale(&self, ttl: Duration) -> UploadResult<usize> {
        let locks = &self.inner.locks;
        let removed = self
            .inner
            .chunks
            .sweep_stale(ttl, |file_id| locks.contains_key(file_id))
            .await?;
        Ok(removed)
    }

    async fn discard_session(&self, file_id: &str) {
        if let Err(err) = self.inner.chunks.remove_session(file_id).await {
            warn!("failed to remove working directory of {}: {}", file_id, err);
        }
    }

    fn lock_for(&self, file_id: &str) -> KeyLock<'_> {
        let lock = self
            .inner
            .locks
            .entry(file_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        KeyLock {
            locks: &self.inner.locks,
            file_id: file_id.to_string(),
            lock: Some(lock),
        }
    }
}

/// Handle on a per-`file_id` mutex.
///
/// Dropping it removes the map entry once no other request holds or awaits
/// the same key, including when the owning request is cancelled mid-upload.
struct KeyLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    file_id: String,
    lock: Option<Arc<Mutex<()>>>,
}

impl KeyLock<'_> {
    /// `None` only once the handle has been dropped.
    async fn lock(&self) -> Option<MutexGuard<'_, ()>> {
        let lock = self.lock.as_deref()?;
        Some(lock.lock().await)
    }
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        // Our own handle must be gone before the count is checked.
        self.lock.take();
        self.locks
            .remove_if(&self.file_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
