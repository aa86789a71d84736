use coldvault_protocol::{ByteRange, Digest, treehash};

/// One part of a file being uploaded.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the file.
    pub start: u64,
    pub data: Vec<u8>,
    /// Tree hash of `data`.
    pub checksum: Digest,
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Range covered by this chunk, `None` for an empty chunk.
    pub fn range(&self) -> Option<ByteRange> {
        ByteRange::new(self.start, self.len())
    }

    pub fn checksum_hex(&self) -> String {
        treehash::to_hex(&self.checksum)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upload,
    Download,
}

/// Advisory progress of a transfer, reported after each part or range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub direction: Direction,
    /// Parts or ranges completed.
    pub done: u64,
    pub total: u64,
    pub bytes: u64,
    pub total_bytes: u64,
}

impl TransferProgress {
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        self.bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Result of a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub archive_id: String,
    /// Hex tree hash of the whole archive.
    pub tree_hash: String,
    pub size: u64,
    pub parts: u64,
}

/// Result of a completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReceipt {
    pub bytes: u64,
    pub ranges: u64,
    /// Whether the output was checked against a known tree hash.
    pub verified: bool,
}
