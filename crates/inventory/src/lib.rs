//! Local registry of uploaded archives and retrieval jobs.
//!
//! [`InventoryStore`] owns the in-memory [`Inventory`] and writes it through
//! a [`PersistentStore`] after every change, so the persisted copy is always
//! current once a call returns.

mod model;
mod registry;
mod store;

pub use model::{Inventory, Item, Job, SCHEMA_VERSION};
pub use registry::InventoryStore;
pub use store::{JsonFileStore, MemoryStore, PersistentStore};

/// Errors produced by the inventory crate.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("an item named {name:?} already exists (archive {archive_id})")]
    DuplicateName { name: String, archive_id: String },

    #[error("inventory version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },
}
