//! HTTP handlers for resumable and direct uploads.
//! Chunk bodies are streamed into the working area rather than buffered, and
//! everything after parsing is delegated to `UploadService`.

use super::extractors::{Authenticated, ClientAddr, FormFields};
use crate::{
    errors::AppError,
    models::{
        published::{Attribution, PublishedFile},
        upload::{ChunkMeta, ChunkOutcome},
    },
    services::chunk_store::StagedFile,
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, State},
};
use futures::TryStreamExt;
use serde_json::{Value, json};
use std::{collections::HashMap, io, str::FromStr};
use tracing::{debug, info};

const CHUNK_FIELD: &str = "chunk";
const FILE_FIELD: &str = "file";

/// `POST /upload/check`: bytes already received for `file_id`.
pub async fn check_upload(
    State(state): State<AppState>,
    _auth: Authenticated,
    fields: FormFields,
) -> Result<Json<Value>, AppError> {
    let file_id = fields
        .get("file_id")
        .ok_or_else(|| AppError::bad_request("missing file_id"))?;

    let uploaded_size = state.uploads.uploaded_size(file_id).await?;
    let mut body = json!({ "uploaded_size": uploaded_size });
    if let Some(status) = state.uploads.status(file_id).await? {
        body["total_chunks"] = json!(status.total_chunks);
        body["received_chunks"] = json!(status.received_chunks);
    }
    Ok(Json(body))
}

/// `POST /upload/chunk`: store one chunk; publish when the last one arrives.
pub async fn upload_chunk(
    State(state): State<AppState>,
    _auth: Authenticated,
    ClientAddr(client_addr): ClientAddr,
    multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let (fields, staged) = read_chunk_form(&state, multipart).await?;

    let Some(staged) = staged else {
        return Err(AppError::bad_request("missing required parameters: chunk"));
    };
    let meta = match parse_chunk_meta(&fields) {
        Ok(meta) => meta,
        Err(err) => {
            staged.discard().await;
            return Err(err);
        }
    };

    let attribution = Attribution::today(client_addr);
    let outcome = state.uploads.accept_chunk(meta, staged, &attribution).await?;

    let body = match outcome {
        ChunkOutcome::Partial { uploaded_size } => json!({
            "success": true,
            "message": "chunk stored",
            "uploaded_size": uploaded_size,
        }),
        ChunkOutcome::Completed {
            published_name,
            size,
        } => json!({
            "success": true,
            "message": "upload complete",
            "completed": true,
            "filename": published_name,
            "size": size,
        }),
    };
    Ok(Json(body))
}

/// `POST /upload`: publish every `file` part of a single multipart request.
///
/// Parts are staged first and published together; if their combined size
/// does not fit under the ceiling, none of them is kept.
pub async fn upload_files(
    State(state): State<AppState>,
    _auth: Authenticated,
    ClientAddr(client_addr): ClientAddr,
    mut multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let attribution = Attribution::today(client_addr);
    let mut staged: Vec<(StagedFile, String)> = Vec::new();
    let mut rejected = Vec::new();

    let result = async {
        while let Some(field) = multipart.next_field().await? {
            if field.name() != Some(FILE_FIELD) {
                continue;
            }
            let filename = field.file_name().unwrap_or_default().to_string();
            if filename.is_empty() {
                continue;
            }
            if !state.config.is_extension_allowed(&filename) {
                debug!("rejected {}: extension not allowed", filename);
                rejected.push(filename);
                continue;
            }

            let file = state.uploads.stage(field.map_err(io::Error::other)).await?;
            staged.push((file, filename));
        }
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(err) = result {
        for (file, _) in staged {
            file.discard().await;
        }
        return Err(err);
    }
    if staged.is_empty() && rejected.is_empty() {
        return Err(AppError::bad_request("no file was uploaded"));
    }

    let uploaded = if staged.is_empty() {
        Vec::new()
    } else {
        state.uploads.publish_batch(staged, &attribution).await?
    };

    info!(
        "direct upload from {}: {} stored, {} rejected",
        attribution.client_addr,
        uploaded.len(),
        rejected.len()
    );
    Ok(Json(json!({
        "success": !uploaded.is_empty(),
        "uploaded": uploaded,
        "rejected": rejected,
    })))
}

/// `GET /upload/files`: the caller's uploads from today, newest first.
pub async fn list_files(
    State(state): State<AppState>,
    _auth: Authenticated,
    ClientAddr(client_addr): ClientAddr,
) -> Result<Json<Vec<PublishedFile>>, AppError> {
    let files = state
        .uploads
        .list_published(&Attribution::today(client_addr))
        .await?;
    Ok(Json(files))
}

/// Collect text fields and stage the `chunk` part.
///
/// The staged payload is discarded if the form turns out to be malformed.
async fn read_chunk_form(
    state: &AppState,
    mut multipart: Multipart,
) -> Result<(HashMap<String, String>, Option<StagedFile>), AppError> {
    let mut fields = HashMap::new();
    let mut staged: Option<StagedFile> = None;

    let result = async {
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            if name == CHUNK_FIELD {
                let file = state.uploads.stage(field.map_err(io::Error::other)).await?;
                if let Some(previous) = staged.replace(file) {
                    previous.discard().await;
                }
            } else {
                fields.insert(name, field.text().await?);
            }
        }
        Ok::<(), AppError>(())
    }
    .await;

    if let Err(err) = result {
        if let Some(file) = staged {
            file.discard().await;
        }
        return Err(err);
    }
    Ok((fields, staged))
}

fn parse_chunk_meta(fields: &HashMap<String, String>) -> Result<ChunkMeta, AppError> {
    let file_id = fields
        .get("file_id")
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request("missing required parameters: file_id"))?;

    Ok(ChunkMeta {
        file_id: file_id.to_string(),
        chunk_index: parse_field(fields, "chunk_index", 0)?,
        total_chunks: parse_field(fields, "total_chunks", 1)?,
        filename: fields
            .get("filename")
            .filter(|v| !v.is_empty())
            .cloned()
            .unwrap_or_else(|| "unknown".into()),
        filesize: parse_field(fields, "filesize", 0)?,
        is_compressed: fields
            .get("is_compressed")
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
    })
}

fn parse_field<T: FromStr>(
    fields: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, AppError> {
    match fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| AppError::bad_request(format!("invalid {}: `{}`", name, raw))),
        None => Ok(default),
    }
}
