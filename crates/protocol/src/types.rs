use std::fmt;

/// An inclusive byte range within an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub start: u64,
    /// Last byte of the range (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Creates the range `[start, start + len - 1]`. Returns `None` for `len == 0`.
    pub fn new(start: u64, len: u64) -> Option<Self> {
        if len == 0 {
            return None;
        }
        Some(Self {
            start,
            end: start + len - 1,
        })
    }

    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// A range always covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for a `Content-Range` request header, e.g. `bytes 0-1023/*`.
    pub fn content_range(&self) -> String {
        format!("bytes {}-{}/*", self.start, self.end)
    }

    /// Value for a `Range` request header, e.g. `bytes=0-1023`.
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }

    /// Splits `[0, total)` into consecutive ranges of `width` bytes; the last
    /// one may be shorter. Yields nothing when `total` is 0.
    pub fn split(total: u64, width: u64) -> Ranges {
        Ranges {
            next: 0,
            total,
            width: width.max(1),
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Iterator returned by [`ByteRange::split`].
#[derive(Debug, Clone)]
pub struct Ranges {
    next: u64,
    total: u64,
    width: u64,
}

impl Ranges {
    /// Number of ranges not yet yielded.
    pub fn remaining(&self) -> u64 {
        (self.total - self.next).div_ceil(self.width)
    }
}

impl Iterator for Ranges {
    type Item = ByteRange;

    fn next(&mut self) -> Option<ByteRange> {
        let pending = self.total - self.next;
        let range = ByteRange::new(self.next, pending.min(self.width))?;
        self.next = range.end + 1;
        Some(range)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

/// Retrieval speed class of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Standard,
    Expedited,
}

impl Tier {
    pub fn from_urgent(urgent: bool) -> Self {
        if urgent {
            Tier::Expedited
        } else {
            Tier::Standard
        }
    }

    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Standard => "Standard",
            Tier::Expedited => "Expedited",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote status of a retrieval job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    InProgress,
    Succeeded,
}

/// Result of describing a retrieval job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDescription {
    pub job_id: String,
    pub status: JobStatus,
    /// Size of the retrieved archive in bytes.
    pub archive_size: u64,
    /// Hex tree hash of the archive, when the service reports one.
    pub tree_hash: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_headers() {
        let r = ByteRange::new(0, 1024).unwrap();
        assert_eq!(r.end, 1023);
        assert_eq!(r.len(), 1024);
        assert_eq!(r.content_range(), "bytes 0-1023/*");
        assert_eq!(r.range_header(), "bytes=0-1023");
        assert_eq!(r.to_string(), "0-1023");
    }

    #[test]
    fn zero_length_range_is_none() {
        assert!(ByteRange::new(10, 0).is_none());
    }

    #[test]
    fn split_partitions_total() {
        let ranges: Vec<ByteRange> = ByteRange::split(10, 4).collect();
        assert_eq!(
            ranges,
            vec![
                ByteRange { start: 0, end: 3 },
                ByteRange { start: 4, end: 7 },
                ByteRange { start: 8, end: 9 },
            ]
        );
    }

    #[test]
    fn split_exact_multiple() {
        let split = ByteRange::split(8, 4);
        assert_eq!(split.remaining(), 2);
        assert_eq!(split.count(), 2);
    }

    #[test]
    fn split_of_nothing_is_empty() {
        let mut split = ByteRange::split(0, 4);
        assert_eq!(split.remaining(), 0);
        assert!(split.next().is_none());
    }

    #[test]
    fn tier_from_urgent() {
        assert_eq!(Tier::from_urgent(true), Tier::Expedited);
        assert_eq!(Tier::from_urgent(false), Tier::Standard);
        assert_eq!(Tier::Expedited.to_string(), "Expedited");
    }
}
