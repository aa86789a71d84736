use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use coldvault_protocol::treehash::{self, TreeHasher};
use coldvault_protocol::{Digest, ONE_MB};
use sha2::{Digest as _, Sha256};

use crate::TransferError;
use crate::types::Chunk;
use crate::validation::validate_chunk_size;

/// Prefix length hashed by the legacy deduplication checksum: 40 MiB.
pub const LEGACY_DEDUP_PREFIX: u64 = 40 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// SHA-256 of a file, or of its first `limit` bytes, as hex.
///
/// This is the deduplication key stored on inventory items.
pub fn content_checksum(path: &Path, limit: Option<u64>) -> Result<String, TransferError> {
    let file = File::open(path)?;
    let mut reader: Box<dyn Read> = match limit {
        Some(limit) => Box::new(file.take(limit)),
        None => Box::new(file),
    };
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Tree hash of a whole file, streamed in 1 MiB blocks.
pub fn file_tree_hash(path: &Path) -> Result<Digest, TransferError> {
    let mut file = File::open(path)?;
    let mut hasher = TreeHasher::new();
    let mut buf = vec![0u8; ONE_MB];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finish())
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file as a forward-only sequence of tree-hashed chunks.
///
/// Every chunk but the last is exactly `chunk_size` bytes long. A failed
/// read ends the sequence after yielding the error.
pub struct ChunkReader {
    file: File,
    path: PathBuf,
    chunk_size: u64,
    file_size: u64,
    offset: u64,
    failed: bool,
}

impl ChunkReader {
    /// Opens `path` for chunked reading.
    ///
    /// `chunk_size` is validated before the file is touched.
    pub fn open(path: &Path, chunk_size: u64) -> Result<Self, TransferError> {
        validate_chunk_size(chunk_size)?;
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        Ok(Self {
            file,
            path: path.to_path_buf(),
            chunk_size,
            file_size,
            offset: 0,
            failed: false,
        })
    }

    /// File size measured when the reader was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of chunks the whole file splits into.
    pub fn expected_chunks(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    /// Offset of the next chunk.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    fn read_chunk(&mut self) -> Result<Chunk, TransferError> {
        let len = (self.file_size - self.offset).min(self.chunk_size);
        let len = usize::try_from(len)
            .map_err(|_| TransferError::Validation(format!("chunk of {len} bytes is too large")))?;

        let mut data = vec![0u8; len];
        self.file.read_exact(&mut data).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                TransferError::FileChanged(format!(
                    "{} is shorter than {} bytes",
                    self.path.display(),
                    self.file_size
                ))
            } else {
                TransferError::Io(e)
            }
        })?;

        let chunk = Chunk {
            start: self.offset,
            checksum: treehash::tree_hash(&data),
            data,
        };
        self.offset += chunk.len();
        Ok(chunk)
    }
}

impl Iterator for ChunkReader {
    type Item = Result<Chunk, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.file_size {
            return None;
        }
        let result = self.read_chunk();
        if result.is_err() {
            self.failed = true;
        }
        Some(result)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

/// Writes byte ranges into a file of known size at their exact offsets.
///
/// Writing the same range twice leaves the rest of the file untouched.
pub struct ChunkWriter {
    file: File,
    path: PathBuf,
    size: u64,
    written: u64,
}

impl ChunkWriter {
    /// Creates (or truncates) `path` and sizes it to `size` bytes.
    ///
    /// Creates intermediate directories as needed.
    pub fn create(path: &Path, size: u64) -> Result<Self, TransferError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
            written: 0,
        })
    }

    /// Writes `data` at `offset`.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), TransferError> {
        let end = offset + data.len() as u64;
        if end > self.size {
            return Err(TransferError::Validation(format!(
                "write of {} bytes at {offset} exceeds {} ({} bytes)",
                data.len(),
                self.path.display(),
                self.size
            )));
        }
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Total bytes written so far, counting rewrites.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size the file was created with.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Flushes the file to disk and returns its size.
    pub fn finish(self) -> Result<u64, TransferError> {
        self.file.sync_all()?;
        Ok(self.size)
    }
}
