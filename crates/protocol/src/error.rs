//! Errors reported by archive services.

/// Errors produced by an [`ArchiveService`](crate::ArchiveService).
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The archive, job or upload session is unknown to the service.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("request rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("missing or invalid credentials: {0}")]
    Unauthenticated(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound(_))
    }

    pub(crate) fn rejected(code: &str, message: impl Into<String>) -> Self {
        ServiceError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }
}
