//! Per-client, per-day view of the upload directory.

use crate::models::published::{Attribution, PublishedFile};
use chrono::{DateTime, Utc};
use std::{
    io::{self, ErrorKind},
    path::Path,
};
use tokio::fs;

/// Files in `upload_dir` published by `attribution`'s client on its date,
/// newest first.
pub async fn list_for(upload_dir: &Path, attribution: &Attribution) -> io::Result<Vec<PublishedFile>> {
    let addr = attribution.safe_addr();
    let date = attribution.date_string();

    let mut entries = match fs::read_dir(upload_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let stored_name = entry.file_name().to_string_lossy().into_owned();
        let mut parts = stored_name.splitn(3, '_');
        let (Some(file_addr), Some(file_date)) = (parts.next(), parts.next()) else {
            continue;
        };
        if file_addr != addr || file_date != date {
            continue;
        }
        let name = parts.next().unwrap_or(&stored_name).to_string();

        let meta = match entry.metadata().await {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => continue,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        let modified: DateTime<Utc> = meta.modified()?.into();

        files.push(PublishedFile {
            name,
            stored_name,
            size: meta.len(),
            modified,
        });
    }

    files.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(files)
}
