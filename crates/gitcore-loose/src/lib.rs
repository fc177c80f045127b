//! Loose object backend.
//!
//! Each object is a zlib stream of `"<kind> <size>\0<content>"` stored at
//! `objects/<first two hex digits>/<remaining hex digits>`.

mod enumerate;
mod read;
mod write;
mod writer;

pub use enumerate::LooseIdIter;
pub use writer::LooseWriter;

use std::path::{Path, PathBuf};

use gitcore_hash::{HashAlgorithm, HashError, ObjectId};
use gitcore_object::ObjectError;
use gitcore_utils::{Classify, ErrorClass};

pub struct LooseStore {
    objects_dir: PathBuf,
    algo: HashAlgorithm,
    compression: flate2::Compression,
}

impl LooseStore {
    pub fn open(objects_dir: impl AsRef<Path>, algo: HashAlgorithm) -> Self {
        Self {
            objects_dir: objects_dir.as_ref().to_path_buf(),
            algo,
            compression: flate2::Compression::default(),
        }
    }

    /// Zlib level, clamped to 0..=9.
    pub fn set_compression_level(&mut self, level: u32) {
        self.compression = flate2::Compression::new(level.min(9));
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn object_path(&self, oid: &ObjectId) -> PathBuf {
        let (dir, file) = oid.loose_path_parts();
        self.objects_dir.join(dir).join(file)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LooseError {
    #[error("corrupt loose object {oid}: {reason}")]
    Corrupt { oid: ObjectId, reason: String },

    #[error("loose object {expected} hashes to {actual}")]
    HashMismatch { expected: ObjectId, actual: ObjectId },

    #[error("stream declared {declared} bytes but {written} were written")]
    SizeMismatch { declared: u64, written: u64 },

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Classify for LooseError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Corrupt { .. } | Self::HashMismatch { .. } => ErrorClass::Corrupt,
            Self::SizeMismatch { .. } => ErrorClass::InvalidArgument,
            Self::Object(e) => e.class(),
            Self::Hash(e) => e.class(),
            Self::Io(e) => ErrorClass::from_io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_path() {
        let store = LooseStore::open("/repo/.git/objects", HashAlgorithm::Sha1);
        let oid = ObjectId::from_hex("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391").unwrap();
        assert_eq!(
            store.object_path(&oid),
            PathBuf::from("/repo/.git/objects/e6/9de29bb2d1d6434b8b29ae775ad8c2e48c5391")
        );
    }
}
