//! Retrieval job state machine.
//!
//! A job is recorded once the service acknowledges the request and is
//! `Pending` until the service reports it succeeded (`Ready`). A job the
//! service no longer knows is `Expired`: its record is removed by the poll
//! that discovers it and it is never retried.

use coldvault_inventory::{InventoryStore, Item, Job, PersistentStore};
use coldvault_protocol::{ArchiveService, JobStatus, Tier};
use tracing::{info, warn};

use crate::error::BackupError;
use crate::types::JobState;

pub struct JobLifecycle<'a, S: ArchiveService + ?Sized, P: PersistentStore> {
    service: &'a S,
    store: &'a mut InventoryStore<P>,
}

impl<'a, S: ArchiveService + ?Sized, P: PersistentStore> JobLifecycle<'a, S, P> {
    pub fn new(service: &'a S, store: &'a mut InventoryStore<P>) -> Self {
        Self { service, store }
    }

    /// Requests retrieval of `item`, expedited when `urgent`.
    ///
    /// Returns `None` without recording anything if the service no longer
    /// has the archive.
    pub fn request(&mut self, item: &Item, urgent: bool) -> Result<Option<Job>, BackupError> {
        let tier = Tier::from_urgent(urgent);
        match self
            .service
            .request_retrieval(&item.archive_id, &item.vault, tier)
        {
            Ok(job_id) => {
                let job = Job::new(job_id, item, urgent);
                self.store.add_job(job.clone())?;
                info!(name = %item.name, job_id = %job.job_id, %tier, "retrieval requested");
                Ok(Some(job))
            }
            Err(e) if e.is_not_found() => {
                warn!(name = %item.name, archive_id = %item.archive_id, "archive not found on the service");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Asks the service for the job's status.
    ///
    /// The last check time is only stamped after a definite answer. An
    /// expired job is removed from the inventory.
    pub fn poll(&mut self, job: &Job) -> Result<JobState, BackupError> {
        match self.service.describe_job(&job.job_id, &job.vault) {
            Ok(description) => {
                self.store.mark_job_checked(job)?;
                Ok(match description.status {
                    JobStatus::Succeeded => JobState::Ready,
                    JobStatus::InProgress => JobState::Pending,
                })
            }
            Err(e) if e.is_not_found() => {
                self.store.remove_job(job)?;
                warn!(name = %job.name, job_id = %job.job_id, "job expired, removed from inventory");
                Ok(JobState::Expired)
            }
            Err(e) => Err(e.into()),
        }
    }
}
