//! Packfiles.
//!
//! A pack is `"PACK"`, a version word, an entry count, the entries, and a
//! trailing hash of everything before it. Each entry is a type+size varint
//! header followed by a zlib stream holding either a whole object or a
//! delta against a base named by a backwards offset (OFS) or by id (REF).
//! The companion `.idx` maps ids to offsets for binary search.

pub mod delta;
pub mod entry;
pub mod idx;
mod indexer;
pub mod pack;
pub mod verify;
pub mod write;

pub use idx::PackIndex;
pub use indexer::{Indexer, IndexerOptions, IndexerProgress, IndexerState};
pub use pack::PackFile;
pub use write::PackWriter;

use gitcore_hash::{HashError, ObjectId};
use gitcore_object::{ObjectError, RawObject};
use gitcore_utils::{Classify, ErrorClass};

pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
pub const PACK_VERSION: u32 = 2;
pub const PACK_HEADER_LEN: usize = 12;

/// Longest delta chain followed before giving up on an entry.
pub const MAX_DELTA_CHAIN_DEPTH: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error("bad pack header: {0}")]
    BadHeader(String),

    #[error("unsupported pack version {0}")]
    UnsupportedVersion(u32),

    #[error("bad pack index: {0}")]
    BadIndex(String),

    #[error("corrupt pack entry at offset {offset}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    #[error("bad delta: {0}")]
    BadDelta(&'static str),

    #[error("delta chain deeper than {max} at offset {offset}")]
    ChainTooDeep { offset: u64, max: usize },

    #[error("{count} delta(s) have no base; first missing base is {first}")]
    Unresolved { count: usize, first: ObjectId },

    #[error("checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: ObjectId, actual: ObjectId },

    #[error("indexer is {0:?}")]
    InvalidState(IndexerState),

    #[error("cancelled by progress callback")]
    Cancelled,

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl PackError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            offset,
            reason: reason.into(),
        }
    }
}

impl Classify for PackError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::BadHeader(_)
            | Self::UnsupportedVersion(_)
            | Self::BadIndex(_)
            | Self::CorruptEntry { .. }
            | Self::BadDelta(_)
            | Self::ChainTooDeep { .. }
            | Self::ChecksumMismatch { .. } => ErrorClass::Corrupt,
            Self::Unresolved { .. } => ErrorClass::Unresolved,
            Self::InvalidState(_) => ErrorClass::InvalidArgument,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Object(e) => e.class(),
            Self::Hash(e) => e.class(),
            Self::Io(e) => ErrorClass::from_io(e),
        }
    }
}

/// Source of delta bases that live outside the pack being read.
///
/// Implemented for closures so callers can pass `&|oid| store.read(oid)`.
pub trait BaseLookup {
    fn find_base(&self, oid: &ObjectId) -> Option<RawObject>;
}

impl<F> BaseLookup for F
where
    F: Fn(&ObjectId) -> Option<RawObject>,
{
    fn find_base(&self, oid: &ObjectId) -> Option<RawObject> {
        self(oid)
    }
}

/// A lookup that never finds anything.
pub struct NoBases;

impl BaseLookup for NoBases {
    fn find_base(&self, _oid: &ObjectId) -> Option<RawObject> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classes() {
        let unresolved = PackError::Unresolved {
            count: 1,
            first: ObjectId::NULL_SHA1,
        };
        assert_eq!(unresolved.class(), ErrorClass::Unresolved);
        assert_eq!(PackError::Cancelled.class(), ErrorClass::Cancelled);
        assert_eq!(PackError::BadDelta("x").class(), ErrorClass::Corrupt);
    }
}
