//! Building packs in memory and installing them next to their index.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_object::ObjectType;

use crate::entry::{self, EntryKind};
use crate::idx::{write_idx, IdxEntry};
use crate::pack::pack_header;
use crate::{delta, PackError, PACK_HEADER_LEN};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique scratch name inside a pack directory.
pub(crate) fn temp_name(prefix: &str) -> String {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

/// Write `bytes` to a temporary file in `dir` and rename it to `name`.
pub(crate) fn install_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, PackError> {
    let tmp = dir.join(temp_name("tmp_install"));
    let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
    let result = file
        .write_all(bytes)
        .and_then(|()| file.sync_all())
        .and_then(|()| finalize_file(&tmp, &dir.join(name)));
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(dir.join(name))
}

/// Mark read-only and move into place.
pub(crate) fn finalize_file(tmp: &Path, dest: &Path) -> std::io::Result<()> {
    let mut perms = fs::metadata(tmp)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(tmp, perms)?;
    fs::rename(tmp, dest)
}

pub(crate) fn pack_file_names(checksum: &ObjectId) -> (String, String) {
    let hex = checksum.to_hex();
    (format!("pack-{hex}.pack"), format!("pack-{hex}.idx"))
}

/// Bytes of a complete pack and its index.
#[derive(Debug, Clone)]
pub struct FinishedPack {
    pub pack: Vec<u8>,
    pub index: Vec<u8>,
    pub checksum: ObjectId,
}

/// Paths of a pack installed on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenPack {
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
    pub checksum: ObjectId,
}

/// Accumulates entries into an in-memory pack.
///
/// Deltas may name a base by id that is never added, which yields a thin
/// pack that only an indexer with access to that base can complete.
pub struct PackWriter {
    algo: HashAlgorithm,
    buf: Vec<u8>,
    entries: Vec<IdxEntry>,
    compression: Compression,
}

impl PackWriter {
    pub fn new(algo: HashAlgorithm) -> Self {
        Self {
            algo,
            buf: pack_header(0).to_vec(),
            entries: Vec::new(),
            compression: Compression::default(),
        }
    }

    pub fn set_compression_level(&mut self, level: u32) {
        self.compression = Compression::new(level.min(9));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn push_entry(&mut self, kind: EntryKind, payload: &[u8], oid: ObjectId) -> Result<u64, PackError> {
        let offset = self.buf.len() as u64;
        entry::encode_header(&kind, payload.len() as u64, offset, &mut self.buf);
        let mut enc = ZlibEncoder::new(&mut self.buf, self.compression);
        enc.write_all(payload)?;
        enc.finish()?;

        let crc32 = crc32fast::hash(&self.buf[offset as usize..]);
        self.entries.push(IdxEntry { oid, offset, crc32 });
        Ok(offset)
    }

    /// Add a whole object. Returns its id and pack offset.
    pub fn add_object(&mut self, kind: ObjectType, data: &[u8]) -> Result<(ObjectId, u64), PackError> {
        let oid = Hasher::hash_object(self.algo, kind.name(), data)?;
        let offset = self.push_entry(EntryKind::Base(kind), data, oid)?;
        Ok((oid, offset))
    }

    /// Add `target` as a delta against the entry already written at
    /// `base_offset`, whose content is `base`.
    pub fn add_ofs_delta(
        &mut self,
        base_offset: u64,
        base: &[u8],
        kind: ObjectType,
        target: &[u8],
    ) -> Result<(ObjectId, u64), PackError> {
        if base_offset < PACK_HEADER_LEN as u64 || base_offset >= self.buf.len() as u64 {
            return Err(PackError::corrupt(base_offset, "delta base is not an earlier entry"));
        }
        let oid = Hasher::hash_object(self.algo, kind.name(), target)?;
        let instructions = delta::compute(base, target);
        let offset = self.push_entry(EntryKind::OfsDelta { base_offset }, &instructions, oid)?;
        Ok((oid, offset))
    }

    /// Add `target` as a delta against the object `base_id`.
    pub fn add_ref_delta(
        &mut self,
        base_id: ObjectId,
        base: &[u8],
        kind: ObjectType,
        target: &[u8],
    ) -> Result<(ObjectId, u64), PackError> {
        let oid = Hasher::hash_object(self.algo, kind.name(), target)?;
        let instructions = delta::compute(base, target);
        let offset = self.push_entry(EntryKind::RefDelta { base: base_id }, &instructions, oid)?;
        Ok((oid, offset))
    }

    /// Patch the entry count, append the trailer and build the index.
    pub fn finish(mut self) -> Result<FinishedPack, PackError> {
        let count = u32::try_from(self.entries.len())
            .map_err(|_| PackError::BadHeader("more than 2^32 entries".into()))?;
        self.buf[..PACK_HEADER_LEN].copy_from_slice(&pack_header(count));
        let checksum = Hasher::digest(self.algo, &self.buf)?;
        self.buf.extend_from_slice(checksum.as_bytes());

        let mut index = Vec::new();
        write_idx(&mut self.entries, &checksum, &mut index)?;
        Ok(FinishedPack {
            pack: self.buf,
            index,
            checksum,
        })
    }

    /// Finish and install `pack-<hex>.pack` and `pack-<hex>.idx` in `dir`.
    pub fn write_to_dir(self, dir: impl AsRef<Path>) -> Result<WrittenPack, PackError> {
        let dir = dir.as_ref();
        let finished = self.finish()?;
        let (pack_name, idx_name) = pack_file_names(&finished.checksum);
        let pack_path = install_file(dir, &pack_name, &finished.pack)?;
        let index_path = install_file(dir, &idx_name, &finished.index)?;
        tracing::debug!(pack = %pack_path.display(), "wrote pack");
        Ok(WrittenPack {
            pack_path,
            index_path,
            checksum: finished.checksum,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idx::PackIndex;

    #[test]
    fn finished_pack_is_self_consistent() {
        let mut w = PackWriter::new(HashAlgorithm::Sha1);
        let (blob, _) = w.add_object(ObjectType::Blob, b"some content").unwrap();
        assert_eq!(blob.to_hex(), "f0eec86f614944a81f87d879ebdc9a79aea0d7ea");
        w.add_object(ObjectType::Blob, b"other").unwrap();
        let done = w.finish().unwrap();

        assert_eq!(&done.pack[..4], b"PACK");
        assert_eq!(&done.pack[8..12], &2u32.to_be_bytes());
        let body = &done.pack[..done.pack.len() - 20];
        assert_eq!(Hasher::digest(HashAlgorithm::Sha1, body).unwrap(), done.checksum);

        let idx = PackIndex::from_bytes(done.index, HashAlgorithm::Sha1).unwrap();
        assert_eq!(idx.pack_checksum(), done.checksum);
        assert_eq!(idx.find_offset(&blob).unwrap(), Some(12));
    }

    #[test]
    fn installs_named_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = PackWriter::new(HashAlgorithm::Sha1);
        w.add_object(ObjectType::Blob, b"x").unwrap();
        let written = w.write_to_dir(dir.path()).unwrap();
        let hex = written.checksum.to_hex();
        assert_eq!(written.pack_path, dir.path().join(format!("pack-{hex}.pack")));
        assert!(written.index_path.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("tmp_"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn ofs_delta_must_point_backwards() {
        let mut w = PackWriter::new(HashAlgorithm::Sha1);
        assert!(w.add_ofs_delta(400, b"a", ObjectType::Blob, b"b").is_err());
    }
}
