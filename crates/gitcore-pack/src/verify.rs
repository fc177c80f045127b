//! Whole-pack integrity checks.

use std::path::Path;

use gitcore_hash::HashAlgorithm;

use crate::pack::PackFile;
use crate::{BaseLookup, PackError};

/// What [`verify_pack`] looked at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub objects: usize,
    pub deltas: usize,
}

/// Check a pack against its index: both trailers, the pack checksum
/// recorded in the index, every entry's CRC32, and every object's id.
pub fn verify_pack(
    pack_path: impl AsRef<Path>,
    algo: HashAlgorithm,
    bases: &dyn BaseLookup,
) -> Result<VerifyReport, PackError> {
    let pack = PackFile::open(pack_path, algo)?;
    pack.verify_checksum()?;
    pack.index().verify_checksum()?;

    let mut entries = pack.index().iter().collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.offset);
    let data = pack.bytes();
    let body_end = (data.len() - algo.digest_len()) as u64;

    let mut report = VerifyReport::default();
    for (i, e) in entries.iter().enumerate() {
        let end = entries.get(i + 1).map_or(body_end, |next| next.offset);
        if e.offset >= end || end > body_end {
            return Err(PackError::corrupt(e.offset, "entry bounds overlap"));
        }
        if crc32fast::hash(&data[e.offset as usize..end as usize]) != e.crc32 {
            return Err(PackError::corrupt(e.offset, "CRC32 mismatch"));
        }
        if pack.header_at(e.offset)?.kind.is_delta() {
            report.deltas += 1;
        }
        let obj = pack.read_at(e.offset, bases)?;
        let actual = obj.compute_id(algo)?;
        if actual != e.oid {
            return Err(PackError::ChecksumMismatch {
                expected: e.oid,
                actual,
            });
        }
        report.objects += 1;
    }
    tracing::debug!(path = %pack.path().display(), objects = report.objects, "pack verified");
    Ok(report)
}
