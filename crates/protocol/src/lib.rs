//! Archive service contract for coldvault.
//!
//! Everything that crosses the boundary to the remote cold-storage service
//! lives here: the SHA-256 tree hash used for part and archive checksums,
//! byte ranges, retrieval tiers, job descriptions and the [`ArchiveService`]
//! trait itself. Concrete services are provided by `coldvault-glacier`
//! (HTTP) and [`memory::MemoryArchive`] (in-process).

mod error;
pub mod memory;
mod service;
pub mod treehash;
mod types;

pub use error::ServiceError;
pub use service::{ArchiveService, RegionClients, ServiceConnector};
pub use treehash::{Digest, EmptyTreeError, ONE_MB};
pub use types::{ByteRange, JobDescription, JobStatus, Ranges, Tier};
