//! Pack index (`.idx`) version 2.
//!
//! Layout: magic `\377tOc`, version 2, the 256-entry fan-out table, the
//! sorted ids, one CRC32 per entry, one 31-bit offset per entry (high bit
//! set means "index into the 64-bit table"), the 64-bit offset table, the
//! pack checksum and finally the checksum of the index itself.

use std::cmp::Ordering;
use std::fs::File;
use std::io::Write;
use std::ops::Deref;
use std::path::Path;

use gitcore_hash::fanout::{Fanout, FANOUT_BYTES};
use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId, Prefix};
use memmap2::Mmap;

use crate::PackError;

pub const IDX_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];
pub const IDX_VERSION: u32 = 2;
const IDX_HEADER_LEN: usize = 8;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Backing {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Owned(bytes) => bytes,
        }
    }
}

/// One row of an index: id, pack offset and CRC32 of the raw entry bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdxEntry {
    pub oid: ObjectId,
    pub offset: u64,
    pub crc32: u32,
}

pub struct PackIndex {
    data: Backing,
    algo: HashAlgorithm,
    fanout: Fanout,
    count: usize,
    crc_start: usize,
    offset_start: usize,
    large_start: usize,
    large_count: usize,
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

impl PackIndex {
    pub fn open(path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, PackError> {
        let file = File::open(path.as_ref())?;
        // SAFETY: index files are written once and renamed into place; they
        // are never modified while mapped.
        let map = unsafe { Mmap::map(&file)? };
        Self::parse(Backing::Mapped(map), algo)
    }

    pub fn from_bytes(bytes: Vec<u8>, algo: HashAlgorithm) -> Result<Self, PackError> {
        Self::parse(Backing::Owned(bytes), algo)
    }

    fn parse(data: Backing, algo: HashAlgorithm) -> Result<Self, PackError> {
        let hash_len = algo.digest_len();
        if data.len() < IDX_HEADER_LEN + FANOUT_BYTES + 2 * hash_len {
            return Err(PackError::BadIndex(format!("file too small ({} bytes)", data.len())));
        }
        if data[..4] != IDX_SIGNATURE {
            return Err(PackError::BadIndex("missing v2 signature".into()));
        }
        let version = be32(&data, 4);
        if version != IDX_VERSION {
            return Err(PackError::BadIndex(format!("unsupported version {version}")));
        }
        let fanout = Fanout::from_bytes(&data[IDX_HEADER_LEN..])
            .map_err(|_| PackError::BadIndex("fan-out table is not monotonic".into()))?;
        let count = fanout.total() as usize;

        let ids_start = IDX_HEADER_LEN + FANOUT_BYTES;
        let crc_start = ids_start + count * hash_len;
        let offset_start = crc_start + count * 4;
        let large_start = offset_start + count * 4;
        let trailer = 2 * hash_len;
        let Some(large_bytes) = data.len().checked_sub(large_start + trailer) else {
            return Err(PackError::BadIndex(format!("truncated: {count} entries declared")));
        };
        if large_bytes % 8 != 0 {
            return Err(PackError::BadIndex("ragged 64-bit offset table".into()));
        }

        Ok(Self {
            data,
            algo,
            fanout,
            count,
            crc_start,
            offset_start,
            large_start,
            large_count: large_bytes / 8,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    fn id_bytes(&self, i: usize) -> &[u8] {
        let len = self.algo.digest_len();
        let start = IDX_HEADER_LEN + FANOUT_BYTES + i * len;
        &self.data[start..start + len]
    }

    pub fn oid_at(&self, i: usize) -> ObjectId {
        match self.algo {
            HashAlgorithm::Sha1 => {
                let mut raw = [0u8; 20];
                raw.copy_from_slice(self.id_bytes(i));
                ObjectId::Sha1(raw)
            }
            HashAlgorithm::Sha256 => {
                let mut raw = [0u8; 32];
                raw.copy_from_slice(self.id_bytes(i));
                ObjectId::Sha256(raw)
            }
        }
    }

    pub fn crc_at(&self, i: usize) -> u32 {
        be32(&self.data, self.crc_start + i * 4)
    }

    pub fn offset_at(&self, i: usize) -> Result<u64, PackError> {
        let word = be32(&self.data, self.offset_start + i * 4);
        if word & LARGE_OFFSET_FLAG == 0 {
            return Ok(u64::from(word));
        }
        let slot = (word & !LARGE_OFFSET_FLAG) as usize;
        if slot >= self.large_count {
            return Err(PackError::BadIndex(format!("large offset slot {slot} out of range")));
        }
        let at = self.large_start + slot * 8;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.data[at..at + 8]);
        Ok(u64::from_be_bytes(raw))
    }

    /// Position of `oid` in the sorted table.
    pub fn position(&self, oid: &ObjectId) -> Option<usize> {
        if oid.algorithm() != self.algo {
            return None;
        }
        let range = self.fanout.range(oid.first_byte());
        let target = oid.as_bytes();
        let (lo, hi) = (range.start, range.end);
        let mut size = hi - lo;
        let mut base = lo;
        while size > 0 {
            let half = size / 2;
            let mid = base + half;
            match self.id_bytes(mid).cmp(target) {
                Ordering::Equal => return Some(mid),
                Ordering::Less => {
                    base = mid + 1;
                    size -= half + 1;
                }
                Ordering::Greater => size = half,
            }
        }
        None
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.position(oid).is_some()
    }

    pub fn find_offset(&self, oid: &ObjectId) -> Result<Option<u64>, PackError> {
        self.position(oid).map(|i| self.offset_at(i)).transpose()
    }

    /// Ids matching `prefix`, at most `limit` of them.
    pub fn find_prefix(&self, prefix: &Prefix, limit: usize) -> Vec<ObjectId> {
        if prefix.algorithm() != self.algo {
            return Vec::new();
        }
        let range = self.fanout.range(prefix.as_padded_id().first_byte());
        let ids: Vec<usize> = range.collect();
        let start = ids.partition_point(|&i| prefix.cmp_oid(&self.oid_at(i)) == Ordering::Greater);
        ids[start..]
            .iter()
            .map(|&i| self.oid_at(i))
            .take_while(|oid| prefix.matches(oid))
            .take(limit)
            .collect()
    }

    pub fn pack_checksum(&self) -> ObjectId {
        let len = self.algo.digest_len();
        let at = self.data.len() - 2 * len;
        self.trailer_id(at)
    }

    pub fn checksum(&self) -> ObjectId {
        let at = self.data.len() - self.algo.digest_len();
        self.trailer_id(at)
    }

    fn trailer_id(&self, at: usize) -> ObjectId {
        let len = self.algo.digest_len();
        // Length matches the algorithm, so this cannot fail.
        ObjectId::from_bytes(&self.data[at..at + len], self.algo).unwrap_or(self.algo.null_oid())
    }

    /// Recompute the trailing checksum.
    pub fn verify_checksum(&self) -> Result<(), PackError> {
        let body = &self.data[..self.data.len() - self.algo.digest_len()];
        let actual = Hasher::digest(self.algo, body)?;
        let expected = self.checksum();
        if actual != expected {
            return Err(PackError::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = Result<IdxEntry, PackError>> + '_ {
        (0..self.count).map(move |i| {
            Ok(IdxEntry {
                oid: self.oid_at(i),
                offset: self.offset_at(i)?,
                crc32: self.crc_at(i),
            })
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        (0..self.count).map(move |i| self.oid_at(i))
    }
}

/// Serialize an index for `entries`, sorting them by id. Returns the
/// checksum written at the end.
pub fn write_idx(
    entries: &mut [IdxEntry],
    pack_checksum: &ObjectId,
    out: &mut impl Write,
) -> Result<ObjectId, PackError> {
    let algo = pack_checksum.algorithm();
    entries.sort_by(|a, b| a.oid.cmp(&b.oid));
    if let Some(pair) = entries.windows(2).find(|w| w[0].oid == w[1].oid) {
        return Err(PackError::BadIndex(format!("duplicate entry {}", pair[0].oid)));
    }

    let mut buf = Vec::with_capacity(IDX_HEADER_LEN + FANOUT_BYTES + entries.len() * 32);
    buf.extend_from_slice(&IDX_SIGNATURE);
    buf.extend_from_slice(&IDX_VERSION.to_be_bytes());
    buf.extend_from_slice(&Fanout::build(entries.iter().map(|e| &e.oid)).to_bytes());
    for e in entries.iter() {
        buf.extend_from_slice(e.oid.as_bytes());
    }
    for e in entries.iter() {
        buf.extend_from_slice(&e.crc32.to_be_bytes());
    }
    let mut large = Vec::new();
    for e in entries.iter() {
        let word = match u32::try_from(e.offset) {
            Ok(small) if small & LARGE_OFFSET_FLAG == 0 => small,
            _ => {
                let slot = large.len() as u32;
                large.push(e.offset);
                LARGE_OFFSET_FLAG | slot
            }
        };
        buf.extend_from_slice(&word.to_be_bytes());
    }
    for offset in large {
        buf.extend_from_slice(&offset.to_be_bytes());
    }
    buf.extend_from_slice(pack_checksum.as_bytes());
    let checksum = Hasher::digest(algo, &buf)?;
    buf.extend_from_slice(checksum.as_bytes());

    out.write_all(&buf)?;
    Ok(checksum)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8, fill: u8) -> ObjectId {
        let mut raw = [fill; 20];
        raw[0] = n;
        ObjectId::Sha1(raw)
    }

    fn build(entries: &mut [IdxEntry]) -> PackIndex {
        let mut bytes = Vec::new();
        write_idx(entries, &id(0xaa, 0xaa), &mut bytes).unwrap();
        PackIndex::from_bytes(bytes, HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn lookup_and_large_offsets() {
        let mut entries = vec![
            IdxEntry { oid: id(0x30, 1), offset: 12, crc32: 7 },
            IdxEntry { oid: id(0x10, 2), offset: 1 << 33, crc32: 8 },
            IdxEntry { oid: id(0x30, 0), offset: 0x8000_0000, crc32: 9 },
        ];
        let idx = build(&mut entries);
        assert_eq!(idx.len(), 3);
        assert_eq!(idx.oid_at(0), id(0x10, 2));
        assert_eq!(idx.find_offset(&id(0x10, 2)).unwrap(), Some(1 << 33));
        assert_eq!(idx.find_offset(&id(0x30, 0)).unwrap(), Some(0x8000_0000));
        assert_eq!(idx.find_offset(&id(0x30, 1)).unwrap(), Some(12));
        assert_eq!(idx.crc_at(idx.position(&id(0x30, 1)).unwrap()), 7);
        assert!(idx.find_offset(&id(0x31, 0)).unwrap().is_none());
        assert_eq!(idx.pack_checksum(), id(0xaa, 0xaa));
        idx.verify_checksum().unwrap();
    }

    #[test]
    fn prefix_search() {
        let mut entries = vec![
            IdxEntry { oid: ObjectId::from_hex("abcd100000000000000000000000000000000000").unwrap(), offset: 12, crc32: 0 },
            IdxEntry { oid: ObjectId::from_hex("abcd200000000000000000000000000000000000").unwrap(), offset: 40, crc32: 0 },
            IdxEntry { oid: ObjectId::from_hex("abce000000000000000000000000000000000000").unwrap(), offset: 80, crc32: 0 },
        ];
        let idx = build(&mut entries);
        let two = Prefix::from_hex("abcd", HashAlgorithm::Sha1).unwrap();
        assert_eq!(idx.find_prefix(&two, 8).len(), 2);
        assert_eq!(idx.find_prefix(&two, 1).len(), 1);
        let one = Prefix::from_hex("abcd2", HashAlgorithm::Sha1).unwrap();
        assert_eq!(idx.find_prefix(&one, 8), vec![entries[1].oid]);
    }

    #[test]
    fn duplicates_and_bad_files_rejected() {
        let mut dup = vec![
            IdxEntry { oid: id(1, 1), offset: 12, crc32: 0 },
            IdxEntry { oid: id(1, 1), offset: 30, crc32: 0 },
        ];
        assert!(write_idx(&mut dup, &id(0, 0), &mut Vec::new()).is_err());
        assert!(PackIndex::from_bytes(vec![0; 16], HashAlgorithm::Sha1).is_err());

        let mut ok = vec![IdxEntry { oid: id(1, 1), offset: 12, crc32: 0 }];
        let mut bytes = Vec::new();
        write_idx(&mut ok, &id(0, 0), &mut bytes).unwrap();
        bytes[0] = 0;
        assert!(PackIndex::from_bytes(bytes, HashAlgorithm::Sha1).is_err());
    }
}
