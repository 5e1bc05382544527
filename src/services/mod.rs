//! Upload subsystem: chunk persistence, reassembly, decompression, quota
//! admission and publication, plus the shared-password session store.

pub mod chunk_store;
pub mod decompress;
pub mod finalizer;
pub mod listing;
pub mod quota;
pub mod reassembler;
pub mod session;
pub mod upload_service;

use std::io;
use thiserror::Error;

pub use quota::format_size;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid file_id `{0}`")]
    InvalidFileId(String),
    #[error("{0}")]
    Validation(String),
    #[error("chunk index {index} is out of range for {total} chunks")]
    ChunkOutOfRange { index: u32, total: u32 },
    #[error(
        "upload folder size limit exceeded ({}): {} already stored, {} incoming",
        human(.limit),
        human(.used),
        human(.incoming)
    )]
    QuotaExceeded { limit: u64, used: u64, incoming: u64 },
    #[error("could not decompress `{filename}`: {reason}")]
    DecompressionFailed { filename: String, reason: String },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type UploadResult<T> = Result<T, UploadError>;

fn human(size: &u64) -> String {
    format_size(*size)
}
