use chrono::{DateTime, Utc};
use tracing::debug;

use crate::InventoryError;
use crate::model::{Inventory, Item, Job};
use crate::store::PersistentStore;

/// Sole owner and mutator of the inventory.
///
/// Each mutation is applied to a copy, saved through the backend and only
/// then made visible, so a failed save leaves both copies unchanged.
pub struct InventoryStore<P: PersistentStore> {
    backend: P,
    inventory: Inventory,
}

impl<P: PersistentStore> InventoryStore<P> {
    /// Loads the inventory from `backend`.
    pub fn open(backend: P) -> Result<Self, InventoryError> {
        let inventory = backend.load()?;
        Ok(Self { backend, inventory })
    }

    pub fn backend(&self) -> &P {
        &self.backend
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    fn commit(&mut self, next: Inventory) -> Result<(), InventoryError> {
        self.backend.save(&next)?;
        self.inventory = next;
        debug!(
            items = self.inventory.items.len(),
            jobs = self.inventory.jobs.len(),
            "inventory persisted"
        );
        Ok(())
    }

    /// Records an uploaded archive, replacing any item with the same
    /// archive id.
    ///
    /// Fails with [`InventoryError::DuplicateName`] if another archive is
    /// already recorded under the same name.
    pub fn add_item(&mut self, item: Item) -> Result<(), InventoryError> {
        if let Some(existing) = self.find_item_by_name(&item.name) {
            if *existing != item {
                return Err(InventoryError::DuplicateName {
                    name: item.name,
                    archive_id: existing.archive_id.clone(),
                });
            }
        }
        let mut next = self.inventory.clone();
        next.items.retain(|i| *i != item);
        next.items.push(item);
        self.commit(next)
    }

    /// Returns `false` if the item was not recorded.
    pub fn remove_item(&mut self, item: &Item) -> Result<bool, InventoryError> {
        if !self.inventory.items.contains(item) {
            return Ok(false);
        }
        let mut next = self.inventory.clone();
        next.items.retain(|i| i != item);
        self.commit(next)?;
        Ok(true)
    }

    /// Records a job, replacing any job with the same id.
    pub fn add_job(&mut self, job: Job) -> Result<(), InventoryError> {
        let mut next = self.inventory.clone();
        next.jobs.retain(|j| *j != job);
        next.jobs.push(job);
        self.commit(next)
    }

    /// Returns `false` if the job was not recorded.
    pub fn remove_job(&mut self, job: &Job) -> Result<bool, InventoryError> {
        if !self.inventory.jobs.contains(job) {
            return Ok(false);
        }
        let mut next = self.inventory.clone();
        next.jobs.retain(|j| j != job);
        self.commit(next)?;
        Ok(true)
    }

    /// Stamps the job's last status check with the current time.
    pub fn mark_job_checked(&mut self, job: &Job) -> Result<Option<Job>, InventoryError> {
        self.mark_job_checked_at(job, Utc::now())
    }

    /// Stamps the job's last status check and returns the updated record,
    /// or `None` if the job is not recorded.
    pub fn mark_job_checked_at(
        &mut self,
        job: &Job,
        at: DateTime<Utc>,
    ) -> Result<Option<Job>, InventoryError> {
        let mut next = self.inventory.clone();
        let Some(stored) = next.jobs.iter_mut().find(|j| j.job_id == job.job_id) else {
            return Ok(None);
        };
        stored.last_status_check = Some(at);
        let updated = stored.clone();
        self.commit(next)?;
        Ok(Some(updated))
    }

    /// First item with exactly this name.
    pub fn find_item_by_name(&self, name: &str) -> Option<&Item> {
        self.inventory.items.iter().find(|i| i.name == name)
    }

    /// First item with this checksum. An empty checksum never matches.
    pub fn find_item_by_checksum(&self, checksum: &str) -> Option<&Item> {
        if checksum.is_empty() {
            return None;
        }
        self.inventory.items.iter().find(|i| i.checksum == checksum)
    }

    /// First job for an item with exactly this name.
    pub fn find_job_by_name(&self, name: &str) -> Option<&Job> {
        self.inventory.jobs.iter().find(|j| j.name == name)
    }

    pub fn find_job(&self, job_id: &str) -> Option<&Job> {
        self.inventory.jobs.iter().find(|j| j.job_id == job_id)
    }

    pub fn items(&self) -> &[Item] {
        &self.inventory.items
    }

    pub fn jobs(&self) -> &[Job] {
        &self.inventory.jobs
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::{JsonFileStore, MemoryStore};

    fn item(name: &str, checksum: &str, archive_id: &str) -> Item {
        Item {
            name: name.into(),
            checksum: checksum.into(),
            archive_id: archive_id.into(),
            size: 100,
            vault: "backups".into(),
            region: "eu-west-1".into(),
            upload_date: Utc::now(),
            tree_hash: None,
        }
    }

    fn open() -> InventoryStore<MemoryStore> {
        InventoryStore::open(MemoryStore::new()).unwrap()
    }

    #[test]
    fn every_mutation_saves() {
        let mut store = open();
        let photos = item("photos.tar", "c1", "a1");
        store.add_item(photos.clone()).unwrap();
        let job = Job::new("j1", &photos, false);
        store.add_job(job.clone()).unwrap();
        store.mark_job_checked(&job).unwrap();
        store.remove_job(&job).unwrap();
        store.remove_item(&photos).unwrap();

        assert_eq!(store.backend().saves(), 5);
        let saved = store.backend().snapshot().unwrap();
        assert!(saved.items.is_empty());
        assert!(saved.jobs.is_empty());
    }

    #[test]
    fn lookups() {
        let mut store = open();
        store.add_item(item("a.tar", "c1", "a1")).unwrap();
        store.add_item(item("b.tar", "c2", "a2")).unwrap();

        assert_eq!(store.find_item_by_name("b.tar").unwrap().archive_id, "a2");
        assert!(store.find_item_by_name("B.tar").is_none());
        assert_eq!(store.find_item_by_checksum("c1").unwrap().name, "a.tar");
        assert!(store.find_item_by_checksum("c3").is_none());
        assert!(store.find_item_by_checksum("").is_none());
    }

    #[test]
    fn same_name_for_other_archive_is_rejected() {
        let mut store = open();
        store.add_item(item("a.tar", "c1", "a1")).unwrap();

        let err = store.add_item(item("a.tar", "c2", "a2")).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::DuplicateName { ref archive_id, .. } if archive_id == "a1"
        ));
        assert_eq!(store.items().len(), 1);
    }

    #[test]
    fn re_adding_an_archive_replaces_it() {
        let mut store = open();
        store.add_item(item("a.tar", "c1", "a1")).unwrap();
        let mut updated = item("a.tar", "c1", "a1");
        updated.size = 999;
        store.add_item(updated).unwrap();

        assert_eq!(store.items().len(), 1);
        assert_eq!(store.items()[0].size, 999);
    }

    #[test]
    fn removing_unknown_records_is_a_no_op() {
        let mut store = open();
        let ghost = item("ghost", "c", "a9");
        assert!(!store.remove_item(&ghost).unwrap());
        assert!(!store.remove_job(&Job::new("j9", &ghost, false)).unwrap());
        assert_eq!(store.backend().saves(), 0);
    }

    #[test]
    fn mark_job_checked_updates_timestamp() {
        let mut store = open();
        let photos = item("photos.tar", "c1", "a1");
        let job = Job::new("j1", &photos, true);
        store.add_job(job.clone()).unwrap();

        let at = Utc.timestamp_millis_opt(1_700_000_123_000).unwrap();
        let updated = store.mark_job_checked_at(&job, at).unwrap().unwrap();
        assert_eq!(updated.last_status_check, Some(at));
        assert_eq!(store.find_job_by_name("photos.tar").unwrap().last_status_check, Some(at));
        assert_eq!(store.find_job("j1").unwrap().last_status_check, Some(at));

        let other = Job::new("j2", &photos, false);
        assert!(store.mark_job_checked_at(&other, at).unwrap().is_none());
    }

    #[test]
    fn failed_save_leaves_state_unchanged() {
        let mut store = open();
        store.add_item(item("a.tar", "c1", "a1")).unwrap();
        store.backend().fail_saves(true);

        assert!(store.add_item(item("b.tar", "c2", "a2")).is_err());
        assert_eq!(store.items().len(), 1);
        assert_eq!(store.backend().snapshot().unwrap().items.len(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("inventory.json");
        {
            let mut store = InventoryStore::open(JsonFileStore::new(&path)).unwrap();
            let photos = item("photos.tar", "c1", "a1");
            store.add_item(photos.clone()).unwrap();
            store.add_job(Job::new("j1", &photos, false)).unwrap();
        }

        let store = InventoryStore::open(JsonFileStore::new(&path)).unwrap();
        assert_eq!(store.items().len(), 1);
        assert_eq!(store.find_job_by_name("photos.tar").unwrap().job_id, "j1");
    }
}
