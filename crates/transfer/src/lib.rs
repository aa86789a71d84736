//! Chunked file transfer against an archive service.
//!
//! Files are read in power-of-two sized chunks, each tagged with its byte
//! range and tree hash, and sent as the parts of a multipart upload.
//! Downloads fetch consecutive byte ranges of a retrieval job's output and
//! write them at their offsets in the target file.

mod chunked;
mod engine;
mod progress;
mod types;
mod validation;

use coldvault_protocol::{EmptyTreeError, ServiceError};

pub use chunked::{ChunkReader, ChunkWriter, LEGACY_DEDUP_PREFIX, content_checksum, file_tree_hash};
pub use engine::{ProgressFn, TransferEngine};
pub use progress::{SpeedCalculator, format_bytes};
pub use types::{Chunk, Direction, DownloadReceipt, TransferProgress, UploadReceipt};
pub use validation::{MAX_CHUNK_MB, chunk_size_from_mb, validate_chunk_size};

const MIB: u64 = 1024 * 1024;

/// Part size used for uploads when none is configured: 16 MiB.
pub const DEFAULT_UPLOAD_CHUNK_SIZE: u64 = 16 * MIB;

/// Range width used for downloads when none is configured: 4 MiB.
///
/// Smaller than the upload default so that a failed range costs less to
/// fetch again.
pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: u64 = 4 * MIB;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    Validation(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("file changed while reading: {0}")]
    FileChanged(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<EmptyTreeError> for TransferError {
    fn from(e: EmptyTreeError) -> Self {
        TransferError::Validation(e.to_string())
    }
}
