use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::InventoryError;
use crate::model::{Inventory, SCHEMA_VERSION};

/// Where an [`Inventory`] is kept between runs.
pub trait PersistentStore {
    /// Returns the stored inventory, or an empty one if nothing was saved yet.
    fn load(&self) -> Result<Inventory, InventoryError>;

    /// Replaces the stored inventory. A failed save leaves the previous
    /// copy intact.
    fn save(&self, inventory: &Inventory) -> Result<(), InventoryError>;
}

/// Pretty-printed JSON document on disk.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentStore for JsonFileStore {
    fn load(&self) -> Result<Inventory, InventoryError> {
        if !self.path.exists() {
            debug!("no inventory at {:?}, starting empty", self.path);
            return Ok(Inventory::default());
        }
        let data = std::fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Inventory::default());
        }

        let inventory: Inventory = serde_json::from_str(&data)?;
        if inventory.version > SCHEMA_VERSION {
            return Err(InventoryError::UnsupportedVersion {
                found: inventory.version,
                supported: SCHEMA_VERSION,
            });
        }
        debug!(
            "loaded {} item(s) and {} job(s) from {:?}",
            inventory.items.len(),
            inventory.jobs.len(),
            self.path
        );
        Ok(inventory)
    }

    /// Writes to a temporary file next to the inventory and renames it into
    /// place. The file is only readable by its owner.
    fn save(&self, inventory: &Inventory) -> Result<(), InventoryError> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut tmp, inventory)?;
        tmp.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file()
                .set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(
            "persisted {} item(s) and {} job(s) to {:?}",
            inventory.items.len(),
            inventory.jobs.len(),
            self.path
        );
        Ok(())
    }
}

/// Store kept in memory, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    saved: Option<Inventory>,
    saves: usize,
    fail_saves: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `inventory`.
    pub fn with_inventory(inventory: Inventory) -> Self {
        let store = Self::default();
        store.inner.lock().unwrap().saved = Some(inventory);
        store
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.inner.lock().unwrap().saves
    }

    /// Last saved inventory.
    pub fn snapshot(&self) -> Option<Inventory> {
        self.inner.lock().unwrap().saved.clone()
    }

    /// Makes every following save fail until called again with `false`.
    pub fn fail_saves(&self, fail: bool) {
        self.inner.lock().unwrap().fail_saves = fail;
    }
}

impl PersistentStore for MemoryStore {
    fn load(&self) -> Result<Inventory, InventoryError> {
        Ok(self.snapshot().unwrap_or_default())
    }

    fn save(&self, inventory: &Inventory) -> Result<(), InventoryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_saves {
            return Err(std::io::Error::other("memory store rejects writes").into());
        }
        inner.saved = Some(inventory.clone());
        inner.saves += 1;
        Ok(())
    }
}
