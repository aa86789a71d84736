use crate::TransferError;

/// Largest chunk size accepted, in MiB.
pub const MAX_CHUNK_MB: u64 = 4096;

/// Checks that a chunk size in bytes is a positive power of two.
pub fn validate_chunk_size(bytes: u64) -> Result<(), TransferError> {
    if !bytes.is_power_of_two() {
        return Err(TransferError::Validation(format!(
            "chunk size must be a power of two, got {bytes} bytes"
        )));
    }
    Ok(())
}

/// Converts an operator-supplied chunk size in MiB to bytes.
///
/// Accepts powers of two from 1 to [`MAX_CHUNK_MB`].
pub fn chunk_size_from_mb(mb: u64) -> Result<u64, TransferError> {
    if !mb.is_power_of_two() || mb > MAX_CHUNK_MB {
        return Err(TransferError::Validation(format!(
            "chunk size must be a power of two between 1 and {MAX_CHUNK_MB} MB, got {mb}"
        )));
    }
    Ok(mb * 1024 * 1024)
}
