//! Amazon Glacier backend for coldvault.
//!
//! Implements [`ArchiveService`](coldvault_protocol::ArchiveService) over the
//! Glacier REST API with blocking `reqwest` calls signed with AWS Signature
//! Version 4.

mod client;
mod credentials;
pub mod sigv4;

pub use client::{API_VERSION, GlacierClient, GlacierConnector, default_endpoint};
pub use credentials::{Credentials, mask};
