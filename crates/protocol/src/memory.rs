//! In-process archive service.
//!
//! [`MemoryArchive`] keeps vaults, upload sessions and retrieval jobs in
//! memory and enforces the same checks a real service does: part ranges must
//! line up with the part size, part and archive tree hashes must match the
//! received bytes, and job output is only available once the job completed.
//! Jobs never complete on their own; callers drive them with
//! [`complete_job`](MemoryArchive::complete_job) and
//! [`expire_job`](MemoryArchive::expire_job).

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::error::ServiceError;
use crate::service::{ArchiveService, ServiceConnector};
use crate::treehash::{self, Digest};
use crate::types::{ByteRange, JobDescription, JobStatus, Tier};

const INVALID_PARAMETER: &str = "InvalidParameterValueException";

/// Number of calls received per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub open_uploads: usize,
    pub parts: usize,
    pub closes: usize,
    pub aborts: usize,
    pub retrievals: usize,
    pub describes: usize,
    pub fetches: usize,
    pub deletes: usize,
}

/// Shared in-memory archive service. Clones see the same state.
#[derive(Clone, Default)]
pub struct MemoryArchive {
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    uploads: HashMap<String, StoredUpload>,
    archives: HashMap<String, StoredArchive>,
    jobs: HashMap<String, StoredJob>,
    calls: CallCounts,
    fail_part: Option<usize>,
    expire_after: Option<(String, usize)>,
}

struct StoredUpload {
    vault: String,
    description: String,
    part_size: u64,
    parts: BTreeMap<u64, (Vec<u8>, Digest)>,
}

struct StoredArchive {
    vault: String,
    description: String,
    data: Arc<Vec<u8>>,
    tree_hash: Digest,
}

struct StoredJob {
    vault: String,
    tier: Tier,
    status: JobStatus,
    data: Arc<Vec<u8>>,
    tree_hash: Digest,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls received so far.
    pub fn calls(&self) -> CallCounts {
        self.state().calls
    }

    pub fn archive_count(&self) -> usize {
        self.state().archives.len()
    }

    /// Upload sessions opened but neither closed nor aborted.
    pub fn open_upload_count(&self) -> usize {
        self.state().uploads.len()
    }

    pub fn archive_data(&self, archive_id: &str) -> Option<Vec<u8>> {
        self.state()
            .archives
            .get(archive_id)
            .map(|a| a.data.as_ref().clone())
    }

    pub fn archive_description(&self, archive_id: &str) -> Option<String> {
        self.state()
            .archives
            .get(archive_id)
            .map(|a| a.description.clone())
    }

    /// Tier a job was requested with.
    pub fn job_tier(&self, job_id: &str) -> Option<Tier> {
        self.state().jobs.get(job_id).map(|j| j.tier)
    }

    /// Marks a job as succeeded. Returns `false` for unknown jobs.
    pub fn complete_job(&self, job_id: &str) -> bool {
        match self.state().jobs.get_mut(job_id) {
            Some(job) => {
                job.status = JobStatus::Succeeded;
                true
            }
            None => false,
        }
    }

    /// Marks every job as succeeded and returns how many there were.
    pub fn complete_all_jobs(&self) -> usize {
        let mut state = self.state();
        for job in state.jobs.values_mut() {
            job.status = JobStatus::Succeeded;
        }
        state.jobs.len()
    }

    /// Forgets a job, as the service does once job output expires.
    pub fn expire_job(&self, job_id: &str) -> bool {
        self.state().jobs.remove(job_id).is_some()
    }

    /// Deletes an archive without going through [`ArchiveService`].
    pub fn drop_archive(&self, archive_id: &str) -> bool {
        self.state().archives.remove(archive_id).is_some()
    }

    /// Registers an already completed job serving `data`.
    pub fn insert_completed_job(&self, vault: &str, data: Vec<u8>) -> String {
        let job_id = uuid::Uuid::new_v4().to_string();
        let tree_hash = treehash::tree_hash(&data);
        self.state().jobs.insert(
            job_id.clone(),
            StoredJob {
                vault: vault.to_string(),
                tier: Tier::Standard,
                status: JobStatus::Succeeded,
                data: Arc::new(data),
                tree_hash,
            },
        );
        job_id
    }

    /// Flips the first byte served by a job while keeping its reported hash.
    pub fn corrupt_job_output(&self, job_id: &str) -> bool {
        let mut state = self.state();
        let Some(job) = state.jobs.get_mut(job_id) else {
            return false;
        };
        let data = Arc::make_mut(&mut job.data);
        match data.first_mut() {
            Some(byte) => {
                *byte ^= 0xff;
                true
            }
            None => false,
        }
    }

    /// Makes the `index`-th (zero-based, counted over all sessions) part
    /// upload fail with a transport error.
    pub fn fail_part(&self, index: usize) {
        self.state().fail_part = Some(index);
    }

    /// Lets `fetches` more output fetches of a job succeed, then expires it.
    pub fn expire_job_after_fetches(&self, job_id: &str, fetches: usize) {
        self.state().expire_after = Some((job_id.to_string(), fetches));
    }
}

fn not_found(kind: &str, id: &str) -> ServiceError {
    ServiceError::NotFound(format!("{kind} {id}"))
}

impl ArchiveService for MemoryArchive {
    fn open_multipart_upload(
        &self,
        vault: &str,
        part_size: u64,
        description: &str,
    ) -> Result<String, ServiceError> {
        let mut state = self.state();
        state.calls.open_uploads += 1;
        if !part_size.is_power_of_two() {
            return Err(ServiceError::rejected(
                INVALID_PARAMETER,
                format!("part size {part_size} is not a power of two"),
            ));
        }
        let upload_id = uuid::Uuid::new_v4().to_string();
        state.uploads.insert(
            upload_id.clone(),
            StoredUpload {
                vault: vault.to_string(),
                description: description.to_string(),
                part_size,
                parts: BTreeMap::new(),
            },
        );
        debug!(%upload_id, vault, part_size, "memory upload opened");
        Ok(upload_id)
    }

    fn upload_part(
        &self,
        upload_id: &str,
        vault: &str,
        range: ByteRange,
        checksum: &str,
        data: &[u8],
    ) -> Result<(), ServiceError> {
        let mut guard = self.state();
        let state = &mut *guard;
        let index = state.calls.parts;
        state.calls.parts += 1;
        if state.fail_part == Some(index) {
            state.fail_part = None;
            return Err(ServiceError::Transport("connection reset".into()));
        }

        let upload = state
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.vault == vault)
            .ok_or_else(|| not_found("upload", upload_id))?;

        if data.len() as u64 != range.len() {
            return Err(ServiceError::rejected(
                INVALID_PARAMETER,
                format!("range {range} does not match body of {} bytes", data.len()),
            ));
        }
        if range.start % upload.part_size != 0 || range.len() > upload.part_size {
            return Err(ServiceError::rejected(
                INVALID_PARAMETER,
                format!("range {range} is not aligned to part size {}", upload.part_size),
            ));
        }

        let digest = treehash::tree_hash(data);
        if !treehash::to_hex(&digest).eq_ignore_ascii_case(checksum) {
            return Err(ServiceError::ChecksumMismatch(format!("part {range}")));
        }

        upload.parts.insert(range.start, (data.to_vec(), digest));
        Ok(())
    }

    fn close_multipart_upload(
        &self,
        upload_id: &str,
        vault: &str,
        total_size: u64,
        checksum: &str,
    ) -> Result<String, ServiceError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.calls.closes += 1;

        let upload = state
            .uploads
            .get(upload_id)
            .filter(|u| u.vault == vault)
            .ok_or_else(|| not_found("upload", upload_id))?;

        let mut data = Vec::with_capacity(usize::try_from(total_size).unwrap_or(0));
        let mut digests = Vec::with_capacity(upload.parts.len());
        for (start, (bytes, digest)) in &upload.parts {
            if *start != data.len() as u64 {
                return Err(ServiceError::rejected(
                    INVALID_PARAMETER,
                    format!("missing bytes before offset {start}"),
                ));
            }
            data.extend_from_slice(bytes);
            digests.push(*digest);
        }
        if data.len() as u64 != total_size {
            return Err(ServiceError::rejected(
                INVALID_PARAMETER,
                format!("received {} bytes, declared {total_size}", data.len()),
            ));
        }

        let aggregate = treehash::combine(&digests)
            .map_err(|e| ServiceError::rejected(INVALID_PARAMETER, e.to_string()))?;
        if !treehash::to_hex(&aggregate).eq_ignore_ascii_case(checksum) {
            return Err(ServiceError::ChecksumMismatch("archive tree hash".into()));
        }

        let Some(upload) = state.uploads.remove(upload_id) else {
            return Err(not_found("upload", upload_id));
        };
        // Equal to `aggregate` once parts are whole megabytes.
        let tree_hash = treehash::tree_hash(&data);
        let archive_id = uuid::Uuid::new_v4().to_string();
        state.archives.insert(
            archive_id.clone(),
            StoredArchive {
                vault: upload.vault,
                description: upload.description,
                data: Arc::new(data),
                tree_hash,
            },
        );
        debug!(%archive_id, total_size, "memory upload closed");
        Ok(archive_id)
    }

    fn abort_multipart_upload(&self, upload_id: &str, vault: &str) -> Result<(), ServiceError> {
        let mut state = self.state();
        state.calls.aborts += 1;
        match state.uploads.get(upload_id) {
            Some(upload) if upload.vault == vault => {
                state.uploads.remove(upload_id);
                Ok(())
            }
            _ => Err(not_found("upload", upload_id)),
        }
    }

    fn request_retrieval(
        &self,
        archive_id: &str,
        vault: &str,
        tier: Tier,
    ) -> Result<String, ServiceError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.calls.retrievals += 1;

        let archive = state
            .archives
            .get(archive_id)
            .filter(|a| a.vault == vault)
            .ok_or_else(|| not_found("archive", archive_id))?;

        let job_id = uuid::Uuid::new_v4().to_string();
        let job = StoredJob {
            vault: vault.to_string(),
            tier,
            status: JobStatus::InProgress,
            data: Arc::clone(&archive.data),
            tree_hash: archive.tree_hash,
        };
        state.jobs.insert(job_id.clone(), job);
        Ok(job_id)
    }

    fn describe_job(&self, job_id: &str, vault: &str) -> Result<JobDescription, ServiceError> {
        let mut state = self.state();
        state.calls.describes += 1;
        let job = state
            .jobs
            .get(job_id)
            .filter(|j| j.vault == vault)
            .ok_or_else(|| not_found("job", job_id))?;
        Ok(JobDescription {
            job_id: job_id.to_string(),
            status: job.status,
            archive_size: job.data.len() as u64,
            tree_hash: Some(treehash::to_hex(&job.tree_hash)),
        })
    }

    fn fetch_job_output(
        &self,
        job_id: &str,
        vault: &str,
        range: ByteRange,
    ) -> Result<Vec<u8>, ServiceError> {
        let mut guard = self.state();
        let state = &mut *guard;
        state.calls.fetches += 1;
        let expire_now = match &mut state.expire_after {
            Some((id, remaining)) if id.as_str() == job_id => {
                if *remaining == 0 {
                    true
                } else {
                    *remaining -= 1;
                    false
                }
            }
            _ => false,
        };
        if expire_now {
            state.expire_after = None;
            state.jobs.remove(job_id);
        }
        let job = state
            .jobs
            .get(job_id)
            .filter(|j| j.vault == vault)
            .ok_or_else(|| not_found("job", job_id))?;

        if job.status != JobStatus::Succeeded {
            return Err(ServiceError::rejected(
                INVALID_PARAMETER,
                format!("job {job_id} is not complete"),
            ));
        }
        if range.end >= job.data.len() as u64 {
            return Err(ServiceError::rejected(
                INVALID_PARAMETER,
                format!("range {range} exceeds {} bytes", job.data.len()),
            ));
        }
        // Bounds checked above.
        let (start, end) = (range.start as usize, range.end as usize);
        Ok(job.data[start..=end].to_vec())
    }

    fn delete_archive(&self, archive_id: &str, vault: &str) -> Result<(), ServiceError> {
        let mut state = self.state();
        state.calls.deletes += 1;
        match state.archives.get(archive_id) {
            Some(archive) if archive.vault == vault => {
                state.archives.remove(archive_id);
                Ok(())
            }
            _ => Err(not_found("archive", archive_id)),
        }
    }
}

impl ServiceConnector for MemoryArchive {
    type Service = MemoryArchive;

    fn connect(&self, _region: &str) -> Result<MemoryArchive, ServiceError> {
        Ok(self.clone())
    }
}
