use std::fs;
use std::io::{self, Read};

use flate2::read::ZlibDecoder;
use gitcore_hash::hasher::Hasher;
use gitcore_hash::ObjectId;
use gitcore_object::header::{self, MAX_HEADER_LEN};
use gitcore_object::{ObjectType, RawObject};

use crate::{LooseError, LooseStore};

fn open_or_none(path: &std::path::Path) -> Result<Option<fs::File>, LooseError> {
    match fs::File::open(path) {
        Ok(f) => Ok(Some(f)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn corrupt(oid: &ObjectId, reason: impl Into<String>) -> LooseError {
    LooseError::Corrupt {
        oid: *oid,
        reason: reason.into(),
    }
}

impl LooseStore {
    pub fn contains(&self, oid: &ObjectId) -> bool {
        self.object_path(oid).is_file()
    }

    /// `Ok(None)` when absent; `Corrupt` when present but undecodable.
    pub fn read(&self, oid: &ObjectId) -> Result<Option<RawObject>, LooseError> {
        let Some(file) = open_or_none(&self.object_path(oid))? else {
            return Ok(None);
        };
        let mut inflated = Vec::new();
        ZlibDecoder::new(file)
            .read_to_end(&mut inflated)
            .map_err(|e| corrupt(oid, format!("inflate failed: {e}")))?;

        let (kind, size, header_len) = header::parse_header(&inflated)?;
        let body = &inflated[header_len..];
        if body.len() != size {
            return Err(corrupt(
                oid,
                format!("header says {size} bytes, found {}", body.len()),
            ));
        }
        Ok(Some(RawObject::new(kind, body.to_vec())))
    }

    /// Like [`read`](Self::read) but rehashes the content.
    pub fn read_verified(&self, oid: &ObjectId) -> Result<Option<RawObject>, LooseError> {
        let Some(obj) = self.read(oid)? else {
            return Ok(None);
        };
        let actual = Hasher::hash_object(self.algo, obj.kind.name(), &obj.data)?;
        if actual != *oid {
            return Err(LooseError::HashMismatch {
                expected: *oid,
                actual,
            });
        }
        Ok(Some(obj))
    }

    /// Kind and size, inflating only the header bytes.
    pub fn read_header(&self, oid: &ObjectId) -> Result<Option<(ObjectType, usize)>, LooseError> {
        let Some(file) = open_or_none(&self.object_path(oid))? else {
            return Ok(None);
        };
        let mut decoder = ZlibDecoder::new(file);
        let mut buf = [0u8; MAX_HEADER_LEN];
        let mut filled = 0;
        while !buf[..filled].contains(&0) {
            if filled == buf.len() {
                return Err(corrupt(oid, "header too long"));
            }
            let n = decoder
                .read(&mut buf[filled..])
                .map_err(|e| corrupt(oid, format!("inflate failed: {e}")))?;
            if n == 0 {
                return Err(corrupt(oid, "EOF inside header"));
            }
            filled += n;
        }
        let (kind, size, _) = header::parse_header(&buf[..filled])?;
        Ok(Some((kind, size)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_hash::HashAlgorithm;
    use gitcore_utils::{Classify, ErrorClass};

    #[test]
    fn absent_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let oid = HashAlgorithm::Sha1.null_oid();
        assert!(store.read(&oid).unwrap().is_none());
        assert!(store.read_header(&oid).unwrap().is_none());
    }

    #[test]
    fn garbage_is_corrupt_not_absent() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let oid = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
        let path = store.object_path(&oid);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"definitely not zlib").unwrap();
        let err = store.read(&oid).unwrap_err();
        assert_eq!(err.class(), ErrorClass::Corrupt);
    }

    #[test]
    fn tampered_content_fails_verification() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let real = store.write(ObjectType::Blob, b"original").unwrap();
        let fake = store.write(ObjectType::Blob, b"tampered").unwrap();
        // Put the tampered bytes under the original id.
        let real_path = store.object_path(&real);
        let mut perms = fs::metadata(&real_path).unwrap().permissions();
        #[allow(clippy::permissions_set_readonly_false)]
        perms.set_readonly(false);
        fs::set_permissions(&real_path, perms).unwrap();
        fs::copy(store.object_path(&fake), &real_path).unwrap();

        assert!(store.read(&real).unwrap().is_some());
        assert!(matches!(
            store.read_verified(&real),
            Err(LooseError::HashMismatch { .. })
        ));
    }
}
