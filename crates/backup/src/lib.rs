//! Backup coordinator for coldvault.
//!
//! [`BackupService`] composes chunked transfers, the retrieval job state
//! machine ([`JobLifecycle`]) and the inventory into the operations an
//! operator runs: upload, request a download, download, check jobs, list
//! and remove.

mod error;
mod lifecycle;
mod service;
mod types;

pub use error::BackupError;
pub use lifecycle::JobLifecycle;
pub use service::BackupService;
pub use types::{
    BackupOptions, DedupScope, DownloadOutcome, DownloadRequest, JobReport, JobState,
    RemoveOutcome, RequestOutcome, UploadOutcome, UploadRequest,
};
