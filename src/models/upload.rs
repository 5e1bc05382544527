//! Represents chunked upload sessions and their on-disk progress record.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Metadata sent alongside every chunk of a resumable upload.
#[derive(Clone, Debug)]
pub struct ChunkMeta {
    /// Client-chosen token identifying the upload across all its chunks.
    pub file_id: String,

    /// Zero-based index of this chunk.
    pub chunk_index: u32,

    /// Number of chunks the client will send in total.
    pub total_chunks: u32,

    /// Original filename as reported by the client.
    pub filename: String,

    /// Declared size of the whole file, in bytes.
    pub filesize: u64,

    /// Whether the client gzip-compressed the file before splitting it.
    pub is_compressed: bool,
}

/// Progress record stored as `status.json` in an upload's working directory.
///
/// Rewritten after every accepted chunk so progress can be inspected without
/// replaying chunk files.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadStatus {
    pub file_id: String,
    pub filename: String,
    pub filesize: u64,
    pub total_chunks: u32,

    /// Number of distinct chunk indices stored so far.
    pub uploaded_chunks: u32,

    /// Chunk indices stored so far, ascending.
    pub received_chunks: BTreeSet<u32>,

    pub is_compressed: bool,

    /// Sum of the sizes of all stored chunk files.
    pub uploaded_size: u64,
}

impl UploadStatus {
    /// True once every index in `0..total_chunks` has been received.
    pub fn is_complete(&self) -> bool {
        self.first_missing().is_none()
    }

    /// Lowest chunk index not yet received, if any.
    pub fn first_missing(&self) -> Option<u32> {
        (0..self.total_chunks).find(|index| !self.received_chunks.contains(index))
    }
}

/// Result of accepting a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkOutcome {
    /// More chunks are expected; `uploaded_size` bytes are stored so far.
    Partial { uploaded_size: u64 },

    /// The upload was reassembled and published under `published_name`.
    Completed { published_name: String, size: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(total: u32, received: &[u32]) -> UploadStatus {
        UploadStatus {
            file_id: "abc".into(),
            filename: "a.bin".into(),
            filesize: 0,
            total_chunks: total,
            uploaded_chunks: received.len() as u32,
            received_chunks: received.iter().copied().collect(),
            is_compressed: false,
            uploaded_size: 0,
        }
    }

    #[test]
    fn completion_requires_every_index() {
        assert!(status(3, &[0, 1, 2]).is_complete());
        assert!(!status(3, &[0, 2]).is_complete());
        // Final index arriving first must not look complete.
        assert!(!status(3, &[2]).is_complete());
        assert_eq!(status(3, &[0, 2]).first_missing(), Some(1));
        assert_eq!(status(1, &[0]).first_missing(), None);
    }

    #[test]
    fn status_record_uses_flat_json_fields() {
        let json = serde_json::to_value(status(2, &[0])).unwrap();
        assert_eq!(json["file_id"], "abc");
        assert_eq!(json["uploaded_chunks"], 1);
        assert_eq!(json["received_chunks"], serde_json::json!([0]));
        assert_eq!(json["is_compressed"], false);
    }
}
