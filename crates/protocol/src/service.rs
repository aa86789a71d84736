//! The archive service seam.
//!
//! Transfer and job logic talk to the remote service only through
//! [`ArchiveService`], which keeps them independent of HTTP and testable
//! against [`MemoryArchive`](crate::memory::MemoryArchive).

use std::collections::HashMap;

use tracing::debug;

use crate::error::ServiceError;
use crate::types::{ByteRange, JobDescription, Tier};

/// Blocking operations offered by a cold-storage archive service.
///
/// All calls block until the service answers. Implementations must report
/// unknown archives, jobs and upload sessions as [`ServiceError::NotFound`].
pub trait ArchiveService {
    /// Opens a multipart upload and returns its session id.
    fn open_multipart_upload(
        &self,
        vault: &str,
        part_size: u64,
        description: &str,
    ) -> Result<String, ServiceError>;

    /// Sends one part. `checksum` is the hex tree hash of `data`.
    fn upload_part(
        &self,
        upload_id: &str,
        vault: &str,
        range: ByteRange,
        checksum: &str,
        data: &[u8],
    ) -> Result<(), ServiceError>;

    /// Completes the upload and returns the new archive id.
    fn close_multipart_upload(
        &self,
        upload_id: &str,
        vault: &str,
        total_size: u64,
        checksum: &str,
    ) -> Result<String, ServiceError>;

    /// Discards an unfinished upload session.
    fn abort_multipart_upload(&self, upload_id: &str, vault: &str) -> Result<(), ServiceError>;

    /// Starts an archive retrieval job and returns its id.
    fn request_retrieval(
        &self,
        archive_id: &str,
        vault: &str,
        tier: Tier,
    ) -> Result<String, ServiceError>;

    fn describe_job(&self, job_id: &str, vault: &str) -> Result<JobDescription, ServiceError>;

    /// Fetches one range of a completed job's output.
    fn fetch_job_output(
        &self,
        job_id: &str,
        vault: &str,
        range: ByteRange,
    ) -> Result<Vec<u8>, ServiceError>;

    fn delete_archive(&self, archive_id: &str, vault: &str) -> Result<(), ServiceError>;
}

/// Builds service handles for a region.
pub trait ServiceConnector {
    type Service: ArchiveService;

    fn connect(&self, region: &str) -> Result<Self::Service, ServiceError>;
}

/// Service handles cached per region.
///
/// Handles are created on first use and live as long as the map.
pub struct RegionClients<C: ServiceConnector> {
    connector: C,
    clients: HashMap<String, C::Service>,
}

impl<C: ServiceConnector> RegionClients<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            clients: HashMap::new(),
        }
    }

    /// Returns the handle for `region`, connecting on first use.
    pub fn get(&mut self, region: &str) -> Result<&C::Service, ServiceError> {
        if !self.clients.contains_key(region) {
            let client = self.connector.connect(region)?;
            debug!(region, "archive service handle created");
            self.clients.insert(region.to_string(), client);
        }
        self.clients
            .get(region)
            .ok_or_else(|| ServiceError::NotFound(format!("region {region}")))
    }

    /// Number of regions connected so far.
    pub fn connected(&self) -> usize {
        self.clients.len()
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}
