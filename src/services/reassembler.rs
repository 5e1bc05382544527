//! Reassembly of stored chunks into a single artifact.

use super::{UploadResult, chunk_store::ChunkStore, finalizer::sanitize_filename};
use crate::models::upload::UploadStatus;
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::debug;

const ARTIFACT_DIR: &str = "assembled";

/// A reassembled upload awaiting decompression and publication.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub compressed: bool,
}

/// Reassemble the upload described by `status` if every chunk has arrived.
///
/// Returns `None` while chunks are still missing, regardless of which index
/// arrived last.
pub async fn try_complete(
    store: &ChunkStore,
    status: &UploadStatus,
) -> UploadResult<Option<Artifact>> {
    if !status.is_complete() {
        return Ok(None);
    }
    assemble(store, status).await.map(Some)
}

/// Concatenate chunks `0..total_chunks` in order.
///
/// The artifact lives in the upload's working directory, named after the
/// original file with `.gz` appended when compressed. A chunk missing at this
/// point is an error rather than a silent gap.
pub async fn assemble(store: &ChunkStore, status: &UploadStatus) -> UploadResult<Artifact> {
    let dir = store.session_dir(&status.file_id).join(ARTIFACT_DIR);
    fs::create_dir_all(&dir).await?;

    let mut name = sanitize_filename(&status.filename);
    if status.is_compressed {
        name.push_str(".gz");
    }
    let path = dir.join(name);

    let mut out = File::create(&path).await?;
    let mut written = 0u64;
    for index in 0..status.total_chunks {
        let mut chunk = match File::open(store.chunk_path(&status.file_id, index)).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let _ = fs::remove_file(&path).await;
                return Err(io::Error::new(
                    ErrorKind::NotFound,
                    format!("chunk {} of upload {} is missing", index, status.file_id),
                )
                .into());
            }
            Err(err) => return Err(err.into()),
        };
        written += tokio::io::copy(&mut chunk, &mut out).await?;
    }
    out.flush().await?;
    out.sync_all().await?;

    debug!(
        "reassembled {} chunks of upload {} into {} ({} bytes)",
        status.total_chunks,
        status.file_id,
        path.display(),
        written
    );
    Ok(Artifact {
        path,
        compressed: status.is_compressed,
    })
}
