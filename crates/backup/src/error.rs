//! Backup error types.

use coldvault_inventory::InventoryError;
use coldvault_protocol::ServiceError;
use coldvault_transfer::TransferError;

/// Errors produced by backup operations.
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Missing or malformed input, rejected before any I/O.
    #[error("invalid argument: {0}")]
    Validation(String),

    /// The service does not know the archive or job.
    #[error("not found on the service: {0}")]
    NotFoundRemote(String),

    #[error("archive service error: {0}")]
    Service(ServiceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),
}

impl From<ServiceError> for BackupError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotFound(what) => BackupError::NotFoundRemote(what),
            ServiceError::ChecksumMismatch(what) => BackupError::ChecksumMismatch(what),
            other => BackupError::Service(other),
        }
    }
}

impl From<TransferError> for BackupError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Io(e) => BackupError::Io(e),
            TransferError::Validation(msg) => BackupError::Validation(msg),
            TransferError::ChecksumMismatch { expected, actual } => {
                BackupError::ChecksumMismatch(format!("expected {expected}, got {actual}"))
            }
            TransferError::FileChanged(msg) => BackupError::Io(std::io::Error::other(msg)),
            TransferError::Service(e) => e.into(),
        }
    }
}
