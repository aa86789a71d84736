use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Version written to new inventory documents.
pub const SCHEMA_VERSION: u32 = 1;

/// An archive uploaded to the service.
///
/// Two items are equal when they refer to the same archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub name: String,
    /// Hex deduplication checksum of the file content.
    #[serde(default)]
    pub checksum: String,
    pub archive_id: String,
    pub size: u64,
    pub vault: String,
    pub region: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub upload_date: DateTime<Utc>,
    /// Hex tree hash of the archive, absent for items recorded before it
    /// was tracked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tree_hash: Option<String>,
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.archive_id == other.archive_id
    }
}

impl Eq for Item {}

/// A retrieval job requested for an item.
///
/// Two jobs are equal when they have the same job id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: String,
    pub archive_id: String,
    #[serde(alias = "fileName")]
    pub name: String,
    pub region: String,
    pub vault: String,
    #[serde(default)]
    pub urgent: bool,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub creation: DateTime<Utc>,
    #[serde(
        default,
        alias = "lastStatus",
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_status_check: Option<DateTime<Utc>>,
}

impl Job {
    /// A job just acknowledged by the service.
    pub fn new(job_id: impl Into<String>, item: &Item, urgent: bool) -> Self {
        Self {
            job_id: job_id.into(),
            archive_id: item.archive_id.clone(),
            name: item.name.clone(),
            region: item.region.clone(),
            vault: item.vault.clone(),
            urgent,
            creation: Utc::now(),
            last_status_check: None,
        }
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.job_id == other.job_id
    }
}

impl Eq for Job {}

/// The persisted document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Inventory {
    /// Documents written before versioning carry no version and read as 1.
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub items: Vec<Item>,
    #[serde(default)]
    pub jobs: Vec<Job>,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for Inventory {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            items: Vec::new(),
            jobs: Vec::new(),
        }
    }
}
