//! Gzip inflation of reassembled artifacts.

use super::{UploadError, UploadResult};
use async_compression::tokio::bufread::GzipDecoder;
use std::{
    io,
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt, BufReader},
};
use tracing::{debug, warn};

/// Inflate `artifact` when `is_compressed` is set and return the path of the
/// file to publish.
///
/// On success the plaintext sits next to the artifact without its `.gz`
/// suffix and the compressed file is gone. A corrupt stream, or one that
/// inflates past `limit` bytes, is a failure: the partial output is removed;
/// with `strict` the failure is returned, otherwise it is logged and the
/// compressed artifact is published as-is.
pub async fn maybe_decompress(
    artifact: PathBuf,
    is_compressed: bool,
    limit: u64,
    strict: bool,
) -> UploadResult<PathBuf> {
    if !is_compressed {
        return Ok(artifact);
    }

    let target = inflated_path(&artifact);
    match inflate(&artifact, &target, limit).await {
        Ok(size) => {
            fs::remove_file(&artifact).await?;
            debug!("inflated {} to {} bytes", artifact.display(), size);
            Ok(target)
        }
        Err(err) => {
            let _ = fs::remove_file(&target).await;
            let filename = artifact
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if strict {
                return Err(UploadError::DecompressionFailed {
                    filename,
                    reason: err.to_string(),
                });
            }
            warn!(
                "decompression of {} failed ({}); keeping compressed artifact",
                filename, err
            );
            Ok(artifact)
        }
    }
}

fn inflated_path(artifact: &Path) -> PathBuf {
    let name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.strip_suffix(".gz") {
        Some(stem) if !stem.is_empty() => artifact.with_file_name(stem),
        _ => artifact.with_file_name(format!("{}.inflated", name)),
    }
}

async fn inflate(source: &Path, target: &Path, limit: u64) -> io::Result<u64> {
    let input = BufReader::new(File::open(source).await?);
    let mut decoder = GzipDecoder::new(input);
    decoder.multiple_members(true);

    let mut output = File::create(target).await?;
    let mut bounded = decoder.take(limit.saturating_add(1));
    let size = tokio::io::copy(&mut bounded, &mut output).await?;
    if size > limit {
        return Err(io::Error::other(format!(
            "inflated size exceeds {} bytes",
            limit
        )));
    }
    output.flush().await?;
    output.sync_all().await?;
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_compression::tokio::write::GzipEncoder;

    async fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzipEncoder::new(Vec::new());
        encoder.write_all(data).await.unwrap();
        encoder.shutdown().await.unwrap();
        encoder.into_inner()
    }

    #[tokio::test]
    async fn uncompressed_artifact_is_returned_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        fs::write(&path, b"hello").await.unwrap();

        let result = maybe_decompress(path.clone(), false, u64::MAX, true).await.unwrap();
        assert_eq!(result, path);
        assert_eq!(fs::read(&path).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn round_trips_and_removes_compressed_intermediate() {
        let dir = tempfile::tempdir().unwrap();
        let plaintext: Vec<u8> = (0..10_000u32).flat_map(|i| i.to_le_bytes()).collect();
        let gz = dir.path().join("data.bin.gz");
        fs::write(&gz, gzip(&plaintext).await).await.unwrap();

        let result = maybe_decompress(gz.clone(), true, u64::MAX, false).await.unwrap();
        assert_eq!(result, dir.path().join("data.bin"));
        assert_eq!(fs::read(&result).await.unwrap(), plaintext);
        assert!(!gz.exists());
    }

    #[tokio::test]
    async fn corrupt_stream_keeps_compressed_artifact_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("broken.txt.gz");
        fs::write(&gz, b"definitely not gzip").await.unwrap();

        let result = maybe_decompress(gz.clone(), true, u64::MAX, false).await.unwrap();
        assert_eq!(result, gz);
        assert!(gz.exists());
        assert!(!dir.path().join("broken.txt").exists());
    }

    #[tokio::test]
    async fn corrupt_stream_fails_in_strict_mode() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("broken.txt.gz");
        fs::write(&gz, b"definitely not gzip").await.unwrap();

        let err = maybe_decompress(gz, true, u64::MAX, true).await.unwrap_err();
        assert!(matches!(err, UploadError::DecompressionFailed { ref filename, .. } if filename == "broken.txt.gz"));
        assert!(!dir.path().join("broken.txt").exists());
    }

    #[tokio::test]
    async fn inflation_stops_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        let gz = dir.path().join("bomb.bin.gz");
        fs::write(&gz, gzip(&vec![0u8; 64 * 1024]).await).await.unwrap();

        let err = maybe_decompress(gz.clone(), true, 1024, true).await.unwrap_err();
        assert!(matches!(err, UploadError::DecompressionFailed { ref reason, .. } if reason.contains("1024")));
        assert!(!dir.path().join("bomb.bin").exists());

        let result = maybe_decompress(gz.clone(), true, 1024, false).await.unwrap();
        assert_eq!(result, gz);

        let exact = maybe_decompress(gz, true, 64 * 1024, true).await.unwrap();
        assert_eq!(fs::metadata(&exact).await.unwrap().len(), 64 * 1024);
    }
}
