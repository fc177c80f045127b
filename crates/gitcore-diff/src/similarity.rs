//! Content similarity for rename and copy detection.
//!
//! A metric turns file content into a [`Signature`] once per file and then
//! scores pairs of signatures. Scoring never needs the content again, so a
//! signature is computed at most once per candidate however many pairs it
//! takes part in.

use std::fs;
use std::io;
use std::path::Path;

use crate::DiffFile;

/// Feature multiset produced by a metric. Metrics decide what the values
/// mean; the built-in one stores sorted chunk hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Signature(pub Vec<u64>);

pub trait SimilarityMetric: Send + Sync {
    /// Signature of a work-tree file.
    fn file_signature(&self, file: &DiffFile, path: &Path) -> io::Result<Signature>;

    /// Signature of content held in memory.
    fn buffer_signature(&self, file: &DiffFile, data: &[u8]) -> Signature;

    /// Score in `0..=100`.
    fn similarity(&self, a: &Signature, b: &Signature) -> u8;
}

const CHUNK_MAX: usize = 64;

/// Hashes chunks ending at a newline or after 64 bytes, then scores pairs
/// by how much of the two chunk multisets overlap.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashSignatureMetric {
    pub ignore_whitespace: bool,
}

impl HashSignatureMetric {
    pub fn new(ignore_whitespace: bool) -> Self {
        Self { ignore_whitespace }
    }

    fn signature(&self, data: &[u8]) -> Signature {
        let mut hashes = Vec::new();
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let mut len = 0;
        for &c in data {
            if self.ignore_whitespace && c.is_ascii_whitespace() && c != b'\n' {
                continue;
            }
            hash = (hash ^ u64::from(c)).wrapping_mul(0x0100_0000_01b3);
            len += 1;
            if c == b'\n' || len == CHUNK_MAX {
                hashes.push(hash);
                hash = 0xcbf2_9ce4_8422_2325;
                len = 0;
            }
        }
        if len > 0 {
            hashes.push(hash);
        }
        hashes.sort_unstable();
        Signature(hashes)
    }
}

impl SimilarityMetric for HashSignatureMetric {
    fn file_signature(&self, file: &DiffFile, path: &Path) -> io::Result<Signature> {
        let meta = fs::symlink_metadata(path)?;
        let data = if meta.file_type().is_symlink() {
            use bstr::ByteVec;
            Vec::from_path_lossy(&fs::read_link(path)?).into_owned()
        } else {
            fs::read(path)?
        };
        Ok(self.buffer_signature(file, &data))
    }

    fn buffer_signature(&self, _file: &DiffFile, data: &[u8]) -> Signature {
        self.signature(data)
    }

    fn similarity(&self, a: &Signature, b: &Signature) -> u8 {
        let (a, b) = (&a.0, &b.0);
        if a.is_empty() && b.is_empty() {
            return 100;
        }
        if a.is_empty() || b.is_empty() {
            return 0;
        }
        let (mut i, mut j, mut common) = (0, 0, 0usize);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    common += 1;
                    i += 1;
                    j += 1;
                }
            }
        }
        (common * 200 / (a.len() + b.len())) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_hash::ObjectId;

    fn score(metric: &HashSignatureMetric, a: &[u8], b: &[u8]) -> u8 {
        let file = DiffFile::absent("f".into(), ObjectId::NULL_SHA1);
        metric.similarity(&metric.buffer_signature(&file, a), &metric.buffer_signature(&file, b))
    }

    #[test]
    fn identical_and_disjoint() {
        let m = HashSignatureMetric::default();
        assert_eq!(score(&m, b"a\nb\nc\n", b"a\nb\nc\n"), 100);
        assert_eq!(score(&m, b"a\nb\n", b"x\ny\n"), 0);
        assert_eq!(score(&m, b"", b""), 100);
        assert_eq!(score(&m, b"", b"x\n"), 0);
    }

    #[test]
    fn partial_overlap() {
        let m = HashSignatureMetric::default();
        // 3 of 4 lines shared on each side.
        assert_eq!(score(&m, b"1\n2\n3\n4\n", b"1\n2\n3\n5\n"), 75);
    }

    #[test]
    fn long_lines_are_chunked() {
        let m = HashSignatureMetric::default();
        let sig = m.signature(&[b'x'; 200]);
        assert_eq!(sig.0.len(), 4);
    }

    #[test]
    fn whitespace_can_be_ignored() {
        let strict = HashSignatureMetric::default();
        let loose = HashSignatureMetric::new(true);
        assert!(score(&strict, b"a b\nc\n", b"ab\nc\n") < 100);
        assert_eq!(score(&loose, b"a b\nc\n", b"ab\nc\n"), 100);
    }
}
