//! Operator-level backup operations.

use std::path::Path;

use chrono::Utc;
use coldvault_inventory::{InventoryStore, Item, Job, PersistentStore};
use coldvault_protocol::{ArchiveService, RegionClients, ServiceConnector};
use coldvault_transfer::{TransferEngine, TransferError, TransferProgress, content_checksum, validate_chunk_size};
use tracing::{debug, info, warn};

use crate::error::BackupError;
use crate::lifecycle::JobLifecycle;
use crate::types::{
    BackupOptions, DownloadOutcome, DownloadRequest, JobReport, JobState, RemoveOutcome,
    RequestOutcome, UploadOutcome, UploadRequest,
};

type ProgressCallback = Box<dyn Fn(TransferProgress)>;

/// Coordinates transfers, retrieval jobs and the inventory.
///
/// Owns the inventory and one service handle per region used so far.
/// Expected non-success conditions (item missing, job not ready, job
/// expired) are returned as outcomes; only failures are errors.
pub struct BackupService<C: ServiceConnector, P: PersistentStore> {
    clients: RegionClients<C>,
    store: InventoryStore<P>,
    options: BackupOptions,
    progress: Option<ProgressCallback>,
}

impl<C: ServiceConnector, P: PersistentStore> BackupService<C, P> {
    pub fn new(connector: C, store: InventoryStore<P>, options: BackupOptions) -> Self {
        Self {
            clients: RegionClients::new(connector),
            store,
            options,
            progress: None,
        }
    }

    /// Sets a callback receiving transfer progress after every part or range.
    pub fn with_progress(mut self, progress: impl Fn(TransferProgress) + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn store(&self) -> &InventoryStore<P> {
        &self.store
    }

    pub fn clients(&self) -> &RegionClients<C> {
        &self.clients
    }

    pub fn options(&self) -> &BackupOptions {
        &self.options
    }

    /// Uploads a file unless an item with the same content checksum exists.
    pub fn upload(&mut self, request: UploadRequest) -> Result<UploadOutcome, BackupError> {
        let chunk_size = request.chunk_size.unwrap_or(self.options.upload_chunk_size);
        validate_chunk_size(chunk_size)?;
        let name = match request.name {
            Some(name) => name,
            None => default_name(&request.file)?,
        };
        if name.trim().is_empty() {
            return Err(BackupError::Validation("name must not be empty".into()));
        }
        require("vault", &request.vault)?;
        require("region", &request.region)?;

        let metadata = std::fs::metadata(&request.file)?;
        if !metadata.is_file() {
            return Err(BackupError::Validation(format!(
                "{} is not a regular file",
                request.file.display()
            )));
        }
        if metadata.len() == 0 {
            return Err(BackupError::Validation(format!(
                "{} is empty",
                request.file.display()
            )));
        }

        let checksum = content_checksum(&request.file, self.options.dedup.limit())?;
        if let Some(existing) = self.store.find_item_by_checksum(&checksum) {
            info!(name = %existing.name, archive_id = %existing.archive_id, "already uploaded, skipping");
            return Ok(UploadOutcome::AlreadyUploaded(existing.clone()));
        }
        if let Some(existing) = self.store.find_item_by_name(&name) {
            return Err(BackupError::Validation(format!(
                "an item named {name} already exists with different content (archive {})",
                existing.archive_id
            )));
        }

        let client = self.clients.get(&request.region)?;
        let mut engine = TransferEngine::new(client);
        if let Some(progress) = self.progress.as_deref() {
            engine = engine.with_progress(progress);
        }
        let receipt = engine.upload(&name, &request.file, &request.vault, chunk_size)?;

        let item = Item {
            name,
            checksum,
            archive_id: receipt.archive_id,
            size: receipt.size,
            vault: request.vault,
            region: request.region,
            upload_date: Utc::now(),
            tree_hash: Some(receipt.tree_hash),
        };
        self.store.add_item(item.clone())?;
        info!(name = %item.name, archive_id = %item.archive_id, size = item.size, "item recorded");
        Ok(UploadOutcome::Uploaded(item))
    }

    /// Starts a retrieval job for the named item.
    ///
    /// Jobs recorded under the same name for an archive the item no longer
    /// points at are dropped first.
    pub fn request_download(
        &mut self,
        name: &str,
        urgent: bool,
    ) -> Result<RequestOutcome, BackupError> {
        let Some(item) = self.store.find_item_by_name(name).cloned() else {
            return Ok(RequestOutcome::ItemNotFound);
        };
        let stale: Vec<Job> = self
            .store
            .jobs()
            .iter()
            .filter(|j| j.name == name && j.archive_id != item.archive_id)
            .cloned()
            .collect();
        for job in stale {
            self.store.remove_job(&job)?;
            info!(name, job_id = %job.job_id, archive_id = %job.archive_id, "dropped job for replaced archive");
        }
        if let Some(job) = self.store.find_job_by_name(name) {
            debug!(name, job_id = %job.job_id, "retrieval already requested");
            return Ok(RequestOutcome::AlreadyRequested(job.clone()));
        }

        let client = self.clients.get(&item.region)?;
        match JobLifecycle::new(client, &mut self.store).request(&item, urgent)? {
            Some(job) => Ok(RequestOutcome::Requested(job)),
            None => Ok(RequestOutcome::ArchiveMissing(item)),
        }
    }

    /// Downloads the output of the named item's job once it is ready.
    pub fn download(&mut self, request: DownloadRequest) -> Result<DownloadOutcome, BackupError> {
        let chunk_size = request
            .chunk_size
            .unwrap_or(self.options.download_chunk_size);
        validate_chunk_size(chunk_size)?;
        let Some(job) = self.store.find_job_by_name(&request.name).cloned() else {
            return Ok(DownloadOutcome::NoJob);
        };

        let client = self.clients.get(&job.region)?;
        match JobLifecycle::new(client, &mut self.store).poll(&job)? {
            JobState::Pending => {
                let job = self.store.find_job(&job.job_id).cloned().unwrap_or(job);
                return Ok(DownloadOutcome::NotReady(job));
            }
            JobState::Expired => return Ok(DownloadOutcome::Expired(job)),
            JobState::Ready => {}
        }

        let expected = self
            .store
            .find_item_by_name(&job.name)
            .filter(|i| i.archive_id == job.archive_id)
            .and_then(|i| i.tree_hash.clone());
        let mut engine = TransferEngine::new(client);
        if let Some(progress) = self.progress.as_deref() {
            engine = engine.with_progress(progress);
        }
        let receipt = match engine.download(
            &job.job_id,
            &job.vault,
            &request.target,
            chunk_size,
            expected.as_deref(),
        ) {
            Ok(receipt) => receipt,
            Err(TransferError::Service(e)) if e.is_not_found() => {
                self.store.remove_job(&job)?;
                warn!(name = %job.name, job_id = %job.job_id, "job expired during download, removed from inventory");
                return Ok(DownloadOutcome::Expired(job));
            }
            Err(e) => return Err(e.into()),
        };

        let job_removed = if request.keep_job {
            false
        } else {
            self.store.remove_job(&job)?
        };
        info!(
            name = %job.name,
            bytes = receipt.bytes,
            verified = receipt.verified,
            job_removed,
            "item downloaded"
        );
        Ok(DownloadOutcome::Downloaded {
            job,
            bytes: receipt.bytes,
            verified: receipt.verified,
            job_removed,
        })
    }

    /// Polls every recorded job in order.
    ///
    /// Expired jobs are removed; the reports carry the records as they were
    /// after the poll.
    pub fn job_status(&mut self) -> Result<Vec<JobReport>, BackupError> {
        let jobs = self.store.jobs().to_vec();
        let mut reports = Vec::with_capacity(jobs.len());
        for job in jobs {
            let client = self.clients.get(&job.region)?;
            let state = JobLifecycle::new(client, &mut self.store).poll(&job)?;
            let job = self.store.find_job(&job.job_id).cloned().unwrap_or(job);
            reports.push(JobReport { job, state });
        }
        Ok(reports)
    }

    pub fn list(&self) -> &[Item] {
        self.store.items()
    }

    pub fn jobs(&self) -> &[Job] {
        self.store.jobs()
    }

    /// Deletes the named item's archive and forgets the item.
    ///
    /// An archive the service no longer has is still forgotten locally.
    pub fn remove(&mut self, name: &str) -> Result<RemoveOutcome, BackupError> {
        let Some(item) = self.store.find_item_by_name(name).cloned() else {
            return Ok(RemoveOutcome::ItemNotFound);
        };

        let client = self.clients.get(&item.region)?;
        let remote_missing = match client.delete_archive(&item.archive_id, &item.vault) {
            Ok(()) => false,
            Err(e) if e.is_not_found() => {
                info!(name, archive_id = %item.archive_id, "archive already gone from the service");
                true
            }
            Err(e) => return Err(e.into()),
        };
        self.store.remove_item(&item)?;
        info!(name, archive_id = %item.archive_id, "item removed");
        Ok(RemoveOutcome::Removed {
            item,
            remote_missing,
        })
    }

    /// Drops the named item's job record without contacting the service.
    pub fn forget_job(&mut self, name: &str) -> Result<Option<Job>, BackupError> {
        let Some(job) = self.store.find_job_by_name(name).cloned() else {
            return Ok(None);
        };
        self.store.remove_job(&job)?;
        info!(name, job_id = %job.job_id, "job forgotten");
        Ok(Some(job))
    }
}

fn default_name(file: &Path) -> Result<String, BackupError> {
    file.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| {
            BackupError::Validation(format!("cannot derive a name from {}", file.display()))
        })
}

fn require(field: &str, value: &str) -> Result<(), BackupError> {
    if value.trim().is_empty() {
        return Err(BackupError::Validation(format!("{field} is required")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use coldvault_inventory::MemoryStore;
    use coldvault_protocol::memory::MemoryArchive;
    use tempfile::TempDir;

    use super::*;

    fn service(archive: &MemoryArchive) -> BackupService<MemoryArchive, MemoryStore> {
        let store = InventoryStore::open(MemoryStore::new()).unwrap();
        BackupService::new(archive.clone(), store, BackupOptions::default())
    }

    fn upload_request(file: PathBuf) -> UploadRequest {
        UploadRequest {
            file,
            name: None,
            vault: "vault".into(),
            region: "eu-west-1".into(),
            chunk_size: Some(1 << 20),
        }
    }

    #[test]
    fn validation_happens_before_any_io() {
        let archive = MemoryArchive::new();
        let mut svc = service(&archive);
        let missing = PathBuf::from("/definitely/not/here.bin");

        let mut req = upload_request(missing.clone());
        req.chunk_size = Some(3 << 20);
        assert!(matches!(svc.upload(req), Err(BackupError::Validation(_))));

        let mut req = upload_request(missing);
        req.vault = " ".into();
        assert!(matches!(svc.upload(req), Err(BackupError::Validation(_))));

        assert_eq!(svc.clients().connected(), 0);
        assert_eq!(archive.calls().open_uploads, 0);
    }

    #[test]
    fn directories_and_empty_files_are_rejected() {
        let dir = TempDir::new().unwrap();
        let archive = MemoryArchive::new();
        let mut svc = service(&archive);

        let err = svc.upload(upload_request(dir.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)));

        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        let err = svc.upload(upload_request(empty)).unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)));
        assert_eq!(archive.calls().open_uploads, 0);
    }

    #[test]
    fn upload_names_item_after_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"remember the milk").unwrap();
        let archive = MemoryArchive::new();
        let mut svc = service(&archive);

        let UploadOutcome::Uploaded(item) = svc.upload(upload_request(path)).unwrap() else {
            panic!("expected a fresh upload");
        };
        assert_eq!(item.name, "notes.txt");
        assert_eq!(item.size, 17);
        assert_eq!(svc.list(), std::slice::from_ref(&item));
        assert_eq!(archive.archive_description(&item.archive_id).unwrap(), "notes.txt");
    }

    #[test]
    fn missing_names_are_expected_outcomes() {
        let archive = MemoryArchive::new();
        let mut svc = service(&archive);

        assert_eq!(svc.request_download("nope", false).unwrap(), RequestOutcome::ItemNotFound);
        let req = DownloadRequest {
            name: "nope".into(),
            target: PathBuf::from("/tmp/never-written"),
            chunk_size: None,
            keep_job: false,
        };
        assert_eq!(svc.download(req).unwrap(), DownloadOutcome::NoJob);
        assert_eq!(svc.remove("nope").unwrap(), RemoveOutcome::ItemNotFound);
        assert!(svc.forget_job("nope").unwrap().is_none());
        assert_eq!(svc.clients().connected(), 0);
    }

    #[test]
    fn repeated_request_reports_existing_job() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"remember the milk").unwrap();
        let archive = MemoryArchive::new();
        let mut svc = service(&archive);
        svc.upload(upload_request(path)).unwrap();

        let RequestOutcome::Requested(job) = svc.request_download("notes.txt", false).unwrap()
        else {
            panic!("expected a new job");
        };
        assert_eq!(
            svc.request_download("notes.txt", true).unwrap(),
            RequestOutcome::AlreadyRequested(job.clone())
        );
        assert_eq!(archive.calls().retrievals, 1);

        assert_eq!(svc.forget_job("notes.txt").unwrap(), Some(job));
        assert!(svc.jobs().is_empty());
    }

    #[test]
    fn clients_are_cached_per_region() {
        let dir = TempDir::new().unwrap();
        let archive = MemoryArchive::new();
        let mut svc = service(&archive);
        for (i, region) in ["eu-west-1", "us-east-1", "eu-west-1"].iter().enumerate() {
            let path = dir.path().join(format!("f{i}"));
            std::fs::write(&path, format!("content {i}")).unwrap();
            let mut req = upload_request(path);
            req.region = region.to_string();
            svc.upload(req).unwrap();
        }
        assert_eq!(svc.clients().connected(), 2);
    }
}
