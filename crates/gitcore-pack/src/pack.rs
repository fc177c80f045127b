//! Random-access reads from a mapped `.pack` with its `.idx`.

use std::fs::File;
use std::path::{Path, PathBuf};

use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_object::{ObjectType, RawObject};
use memmap2::Mmap;

use crate::entry::{self, EntryHeader, EntryKind};
use crate::idx::PackIndex;
use crate::{delta, BaseLookup, PackError, MAX_DELTA_CHAIN_DEPTH, PACK_HEADER_LEN, PACK_SIGNATURE, PACK_VERSION};

/// Parse the 12-byte pack header, returning the entry count.
pub fn parse_pack_header(data: &[u8]) -> Result<u32, PackError> {
    if data.len() < PACK_HEADER_LEN {
        return Err(PackError::BadHeader(format!("{} bytes is too short", data.len())));
    }
    if &data[..4] != PACK_SIGNATURE {
        return Err(PackError::BadHeader("missing PACK signature".into()));
    }
    let version = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    if version != PACK_VERSION {
        return Err(PackError::UnsupportedVersion(version));
    }
    Ok(u32::from_be_bytes([data[8], data[9], data[10], data[11]]))
}

pub fn pack_header(count: u32) -> [u8; PACK_HEADER_LEN] {
    let mut out = [0u8; PACK_HEADER_LEN];
    out[..4].copy_from_slice(PACK_SIGNATURE);
    out[4..8].copy_from_slice(&PACK_VERSION.to_be_bytes());
    out[8..].copy_from_slice(&count.to_be_bytes());
    out
}

/// Where a delta chain bottoms out.
enum ChainBase {
    Packed(EntryHeader, u64),
    External(RawObject),
}

pub struct PackFile {
    path: PathBuf,
    data: Mmap,
    index: PackIndex,
    algo: HashAlgorithm,
    max_depth: usize,
}

impl PackFile {
    /// Open `pack-*.pack` together with the `.idx` next to it.
    pub fn open(pack_path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, PackError> {
        let pack_path = pack_path.as_ref();
        let index = PackIndex::open(pack_path.with_extension("idx"), algo)?;
        Self::with_index(pack_path, index)
    }

    pub fn with_index(pack_path: impl AsRef<Path>, index: PackIndex) -> Result<Self, PackError> {
        let path = pack_path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // SAFETY: packs are immutable once renamed into place.
        let data = unsafe { Mmap::map(&file)? };
        let algo = index.hash_algorithm();

        let count = parse_pack_header(&data)?;
        if data.len() < PACK_HEADER_LEN + algo.digest_len() {
            return Err(PackError::BadHeader("missing trailer".into()));
        }
        if count as usize != index.len() {
            return Err(PackError::BadIndex(format!(
                "pack has {count} entries, index has {}",
                index.len()
            )));
        }
        let pack = Self {
            path,
            data,
            index,
            algo,
            max_depth: MAX_DELTA_CHAIN_DEPTH,
        };
        if pack.checksum() != pack.index.pack_checksum() {
            return Err(PackError::BadIndex(format!(
                "index belongs to pack {}, not {}",
                pack.index.pack_checksum(),
                pack.checksum()
            )));
        }
        tracing::debug!(path = %pack.path.display(), objects = count, "opened pack");
        Ok(pack)
    }

    pub fn set_max_delta_depth(&mut self, depth: usize) {
        self.max_depth = depth.max(1);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// The trailing checksum, which also names the pack.
    pub fn checksum(&self) -> ObjectId {
        let len = self.algo.digest_len();
        let at = self.data.len() - len;
        ObjectId::from_bytes(&self.data[at..], self.algo).unwrap_or(self.algo.null_oid())
    }

    pub fn verify_checksum(&self) -> Result<(), PackError> {
        let body = &self.data[..self.data.len() - self.algo.digest_len()];
        let actual = Hasher::digest(self.algo, body)?;
        let expected = self.checksum();
        if actual != expected {
            return Err(PackError::ChecksumMismatch { expected, actual });
        }
        Ok(())
    }

    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.index.contains(oid)
    }

    pub fn header_at(&self, offset: u64) -> Result<EntryHeader, PackError> {
        entry::decode_header_at(&self.data, offset, self.algo)
    }

    fn inflate_at(&self, offset: u64, header: &EntryHeader) -> Result<Vec<u8>, PackError> {
        let start = offset as usize + header.header_len;
        let size = usize::try_from(header.size)
            .map_err(|_| PackError::corrupt(offset, "entry too large for memory"))?;
        let end = self.data.len() - self.algo.digest_len();
        if start > end {
            return Err(PackError::corrupt(offset, "entry runs into the trailer"));
        }
        let (data, _) =
            entry::inflate_exact(&self.data[start..end], size).map_err(|r| PackError::corrupt(offset, r))?;
        Ok(data)
    }

    /// Follow the chain from `offset` down to its base, collecting delta
    /// entries top first.
    fn walk_chain(
        &self,
        offset: u64,
        bases: &dyn BaseLookup,
    ) -> Result<(Vec<(u64, EntryHeader)>, ChainBase), PackError> {
        let mut deltas = Vec::new();
        let mut at = offset;
        loop {
            let header = self.header_at(at)?;
            let next = match header.kind {
                EntryKind::Base(_) => return Ok((deltas, ChainBase::Packed(header, at))),
                EntryKind::OfsDelta { base_offset } => base_offset,
                EntryKind::RefDelta { base } => match self.index.find_offset(&base)? {
                    Some(base_offset) => base_offset,
                    None => {
                        deltas.push((at, header));
                        let Some(obj) = bases.find_base(&base) else {
                            return Err(PackError::Unresolved { count: 1, first: base });
                        };
                        return Ok((deltas, ChainBase::External(obj)));
                    }
                },
            };
            deltas.push((at, header));
            if deltas.len() > self.max_depth {
                return Err(PackError::ChainTooDeep {
                    offset,
                    max: self.max_depth,
                });
            }
            at = next;
        }
    }

    /// Reconstruct the object whose entry starts at `offset`.
    pub fn read_at(&self, offset: u64, bases: &dyn BaseLookup) -> Result<RawObject, PackError> {
        let (deltas, base) = self.walk_chain(offset, bases)?;
        let (kind, mut data) = match base {
            ChainBase::Packed(header, at) => {
                let EntryKind::Base(kind) = header.kind else {
                    return Err(PackError::corrupt(at, "chain ended on a delta"));
                };
                (kind, self.inflate_at(at, &header)?)
            }
            ChainBase::External(obj) => (obj.kind, obj.data),
        };
        for (at, header) in deltas.iter().rev() {
            let instructions = self.inflate_at(*at, header)?;
            data = delta::apply(&data, &instructions)?;
        }
        Ok(RawObject::new(kind, data))
    }

    /// `Ok(None)` when the id is not in this pack.
    pub fn read(&self, oid: &ObjectId, bases: &dyn BaseLookup) -> Result<Option<RawObject>, PackError> {
        match self.index.find_offset(oid)? {
            Some(offset) => self.read_at(offset, bases).map(Some),
            None => Ok(None),
        }
    }

    /// Kind and size without applying any delta.
    pub fn read_header(
        &self,
        oid: &ObjectId,
        bases: &dyn BaseLookup,
    ) -> Result<Option<(ObjectType, u64)>, PackError> {
        let Some(offset) = self.index.find_offset(oid)? else {
            return Ok(None);
        };
        let top = self.header_at(offset)?;
        let size = if top.kind.is_delta() {
            delta::sizes(&self.inflate_at(offset, &top)?)?.1
        } else {
            top.size
        };
        let (_, base) = self.walk_chain(offset, bases)?;
        let kind = match base {
            ChainBase::Packed(EntryHeader { kind: EntryKind::Base(kind), .. }, _) => kind,
            ChainBase::Packed(_, at) => return Err(PackError::corrupt(at, "chain ended on a delta")),
            ChainBase::External(obj) => obj.kind,
        };
        Ok(Some((kind, size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::write::PackWriter;
    use crate::NoBases;

    #[test]
    fn header_codec() {
        let header = pack_header(3);
        assert_eq!(parse_pack_header(&header).unwrap(), 3);
        assert!(matches!(
            parse_pack_header(b"PACK\0\0\0\x03\0\0\0\0"),
            Err(PackError::UnsupportedVersion(3))
        ));
        assert!(parse_pack_header(b"JUNK\0\0\0\x02\0\0\0\0").is_err());
    }

    #[test]
    fn reads_ofs_delta_chain() {
        let dir = tempfile::tempdir().unwrap();
        let v1 = b"line one\nline two\nline three\nline four\n".repeat(8);
        let mut v2 = v1.clone();
        v2.extend_from_slice(b"line five\n");
        let mut v3 = v2.clone();
        v3.extend_from_slice(b"line six\n");

        let mut w = PackWriter::new(HashAlgorithm::Sha1);
        let (id1, off1) = w.add_object(ObjectType::Blob, &v1).unwrap();
        let (id2, off2) = w.add_ofs_delta(off1, &v1, ObjectType::Blob, &v2).unwrap();
        let (id3, _) = w.add_ofs_delta(off2, &v2, ObjectType::Blob, &v3).unwrap();
        let written = w.write_to_dir(dir.path()).unwrap();

        let pack = PackFile::open(&written.pack_path, HashAlgorithm::Sha1).unwrap();
        pack.verify_checksum().unwrap();
        assert_eq!(pack.len(), 3);
        assert_eq!(pack.read(&id1, &NoBases).unwrap().unwrap().data, v1);
        assert_eq!(pack.read(&id3, &NoBases).unwrap().unwrap().data, v3);
        assert_eq!(
            pack.read_header(&id2, &NoBases).unwrap(),
            Some((ObjectType::Blob, v2.len() as u64))
        );

        let mut shallow = PackFile::open(&written.pack_path, HashAlgorithm::Sha1).unwrap();
        shallow.set_max_delta_depth(1);
        assert!(matches!(
            shallow.read(&id3, &NoBases),
            Err(PackError::ChainTooDeep { max: 1, .. })
        ));
    }

    #[test]
    fn external_ref_delta_base() {
        let dir = tempfile::tempdir().unwrap();
        let base = RawObject::new(ObjectType::Blob, b"shared base content, long enough to copy".to_vec());
        let base_id = base.compute_id(HashAlgorithm::Sha1).unwrap();
        let target = b"shared base content, long enough to copy!!".to_vec();

        let mut w = PackWriter::new(HashAlgorithm::Sha1);
        let (id, _) = w.add_ref_delta(base_id, &base.data, ObjectType::Blob, &target).unwrap();
        let written = w.write_to_dir(dir.path()).unwrap();
        let pack = PackFile::open(&written.pack_path, HashAlgorithm::Sha1).unwrap();

        assert!(matches!(
            pack.read(&id, &NoBases),
            Err(PackError::Unresolved { first, .. }) if first == base_id
        ));
        let lookup = |oid: &ObjectId| (*oid == base_id).then(|| base.clone());
        assert_eq!(pack.read(&id, &lookup).unwrap().unwrap().data, target);
        assert_eq!(
            pack.read_header(&id, &lookup).unwrap(),
            Some((ObjectType::Blob, target.len() as u64))
        );
    }
}
