use std::path::PathBuf;

use coldvault_inventory::{Item, Job};
use coldvault_transfer::{DEFAULT_DOWNLOAD_CHUNK_SIZE, DEFAULT_UPLOAD_CHUNK_SIZE, LEGACY_DEDUP_PREFIX};

/// How much of a file the deduplication checksum covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupScope {
    #[default]
    FullFile,
    /// Only the first `n` bytes, as older inventories recorded.
    Prefix(u64),
}

impl DedupScope {
    pub fn legacy() -> Self {
        DedupScope::Prefix(LEGACY_DEDUP_PREFIX)
    }

    /// Byte limit passed to the checksum, `None` for the whole file.
    pub fn limit(&self) -> Option<u64> {
        match self {
            DedupScope::FullFile => None,
            DedupScope::Prefix(n) => Some(*n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub dedup: DedupScope,
    /// Default part size in bytes.
    pub upload_chunk_size: u64,
    /// Default range width in bytes.
    pub download_chunk_size: u64,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            dedup: DedupScope::default(),
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            download_chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub file: PathBuf,
    /// Defaults to the file name.
    pub name: Option<String>,
    pub vault: String,
    pub region: String,
    /// Part size in bytes; the configured default when `None`.
    pub chunk_size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded(Item),
    /// An item with the same content checksum exists; nothing was sent.
    AlreadyUploaded(Item),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Requested(Job),
    /// A job for this item is already recorded.
    AlreadyRequested(Job),
    ItemNotFound,
    /// The service no longer has the item's archive.
    ArchiveMissing(Item),
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub name: String,
    pub target: PathBuf,
    /// Range width in bytes; the configured default when `None`.
    pub chunk_size: Option<u64>,
    /// Keep the job record after a successful download.
    pub keep_job: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Downloaded {
        job: Job,
        bytes: u64,
        verified: bool,
        job_removed: bool,
    },
    NotReady(Job),
    /// The job expired on the service and was removed from the inventory.
    Expired(Job),
    /// No job is recorded for the name.
    NoJob,
}

/// State of a retrieval job as last reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Ready,
    Expired,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Ready => "ready",
            JobState::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job: Job,
    pub state: JobState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed {
        item: Item,
        /// The archive was already gone from the service.
        remote_missing: bool,
    },
    ItemNotFound,
}
