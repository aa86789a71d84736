//! SHA-256 tree hash.
//!
//! Data is split into 1 MiB blocks and each block is hashed. Adjacent
//! digests are then concatenated and hashed pairwise, level by level, with
//! an odd trailing digest carried up unchanged, until one digest remains.
//! The same combination step joins per-part checksums into the checksum of
//! a whole archive.

use sha2::{Digest as _, Sha256};

/// Size of the blocks hashed at the leaves of the tree.
pub const ONE_MB: usize = 1024 * 1024;

/// A raw SHA-256 digest.
pub type Digest = [u8; 32];

/// Returned when [`combine`] is given no digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("tree hash requires at least one digest")]
pub struct EmptyTreeError;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> Digest {
    Sha256::digest(data).into()
}

fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Combines an ordered sequence of digests into their tree root.
///
/// A single digest is returned unchanged. The result depends on order.
pub fn combine(hashes: &[Digest]) -> Result<Digest, EmptyTreeError> {
    if hashes.is_empty() {
        return Err(EmptyTreeError);
    }

    let mut level = hashes.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [odd] => *odd,
                _ => unreachable!("chunks(2) yields one or two elements"),
            })
            .collect();
    }
    Ok(level[0])
}

/// Tree hash of an in-memory buffer.
///
/// An empty buffer hashes to the SHA-256 of no bytes.
pub fn tree_hash(data: &[u8]) -> Digest {
    if data.is_empty() {
        return sha256(data);
    }
    let leaves: Vec<Digest> = data.chunks(ONE_MB).map(sha256).collect();
    // `leaves` is non-empty because `data` is.
    combine(&leaves).unwrap_or_else(|_| sha256(data))
}

/// Lowercase hex encoding of a digest.
pub fn to_hex(digest: &Digest) -> String {
    hex::encode(digest)
}

/// Parses a 64-character hex digest.
pub fn from_hex(s: &str) -> Option<Digest> {
    let mut out = [0u8; 32];
    hex::decode_to_slice(s, &mut out).ok()?;
    Some(out)
}

/// Incremental tree hasher for streamed data.
///
/// Bytes may be fed in arbitrary slices; leaf boundaries are always at
/// multiples of [`ONE_MB`] from the start of the stream.
#[derive(Default)]
pub struct TreeHasher {
    leaves: Vec<Digest>,
    current: Sha256,
    current_len: usize,
}

impl TreeHasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next bytes of the stream.
    pub fn update(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            let take = (ONE_MB - self.current_len).min(data.len());
            self.current.update(&data[..take]);
            self.current_len += take;
            data = &data[take..];

            if self.current_len == ONE_MB {
                let block = std::mem::take(&mut self.current);
                self.leaves.push(block.finalize().into());
                self.current_len = 0;
            }
        }
    }

    /// Total number of complete and partial leaves seen so far.
    pub fn leaf_count(&self) -> usize {
        self.leaves.len() + usize::from(self.current_len > 0)
    }

    /// Finishes the stream and returns its tree hash.
    pub fn finish(mut self) -> Digest {
        if self.current_len > 0 || self.leaves.is_empty() {
            self.leaves.push(self.current.finalize().into());
        }
        combine(&self.leaves).unwrap_or_else(|_| sha256(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(s: &str) -> Digest {
        sha256(s.as_bytes())
    }

    #[test]
    fn single_digest_is_identity() {
        let h = leaf("a");
        assert_eq!(combine(&[h]).unwrap(), h);
    }

    #[test]
    fn empty_input_is_rejected() {
        assert_eq!(combine(&[]), Err(EmptyTreeError));
    }

    #[test]
    fn three_leaves_carry_odd_digest() {
        let hashes = [leaf("a"), leaf("b"), leaf("c")];
        let root = combine(&hashes).unwrap();
        assert_eq!(
            to_hex(&root),
            "7075152d03a5cd92104887b476862778ec0c87be5c2fa1c0a90f87c49fad6eff"
        );
        // The carried digest is paired only on the second level.
        let expected = hash_pair(&hash_pair(&hashes[0], &hashes[1]), &hashes[2]);
        assert_eq!(root, expected);
    }

    #[test]
    fn five_leaves() {
        let hashes = [leaf("a"), leaf("b"), leaf("c"), leaf("d"), leaf("e")];
        let root = combine(&hashes).unwrap();
        assert_eq!(
            to_hex(&root),
            "d71f8983ad4ee170f8129f1ebcdd7440be7798d8e1c80420bf11f1eced610dba"
        );
    }

    #[test]
    fn order_sensitive() {
        let a = leaf("a");
        let b = leaf("b");
        let ab = combine(&[a, b]).unwrap();
        assert_eq!(
            to_hex(&ab),
            "e5a01fee14e0ed5c48714f22180f25ad8365b53f9779f79dc4a3d7e93963f94a"
        );
        assert_ne!(ab, combine(&[b, a]).unwrap());
    }

    #[test]
    fn tree_hash_of_multi_megabyte_buffer() {
        let data: Vec<u8> = (0..2 * ONE_MB + 100).map(|i| (i % 251) as u8).collect();
        assert_eq!(
            to_hex(&tree_hash(&data)),
            "be4f946c0c3de121706c4a284ffc49ce8f05886845d0c62864cbde6c321063ca"
        );
    }

    #[test]
    fn tree_hash_below_one_megabyte_is_plain_sha256() {
        assert_eq!(
            to_hex(&tree_hash(b"hello world")),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn empty_buffer_hashes_to_empty_sha256() {
        assert_eq!(
            to_hex(&tree_hash(&[])),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(TreeHasher::new().finish(), tree_hash(&[]));
    }

    #[test]
    fn incremental_matches_buffer() {
        let data: Vec<u8> = (0..3 * ONE_MB + 17).map(|i| (i * 7 % 256) as u8).collect();
        let mut hasher = TreeHasher::new();
        for piece in data.chunks(300_001) {
            hasher.update(piece);
        }
        assert_eq!(hasher.leaf_count(), 4);
        assert_eq!(hasher.finish(), tree_hash(&data));
    }

    #[test]
    fn hex_roundtrip_rejects_bad_input() {
        let h = leaf("x");
        assert_eq!(from_hex(&to_hex(&h)), Some(h));
        assert_eq!(from_hex("abc"), None);
        assert_eq!(from_hex(&"zz".repeat(32)), None);
    }
}
