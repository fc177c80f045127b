//! Object database.
//!
//! An [`ObjectDatabase`] composes storage backends in priority order: the
//! loose store, the packs under `pack/`, and any alternates named in
//! `info/alternates`. Reads take the first backend that has the object,
//! existence checks fan out, and writes go to the first writable backend
//! that is not an alternate.

mod alternates;
pub mod backend;
mod db;
mod expand;
mod packs;

pub use backend::{ObjectStream, OdbBackend, OdbWriteStream};
pub use db::ObjectDatabase;
pub use expand::{ExpandedId, IdRequest};
pub use packs::PackDirBackend;

use gitcore_hash::{HashAlgorithm, HashError, ObjectId};
use gitcore_loose::LooseError;
use gitcore_object::ObjectError;
use gitcore_pack::{PackError, MAX_DELTA_CHAIN_DEPTH};
use gitcore_utils::{Classify, ErrorClass};

/// Priority of the loose backend added by [`ObjectDatabase::open`].
pub const LOOSE_PRIORITY: i32 = 1;
/// Priority of the pack backend added by [`ObjectDatabase::open`].
pub const PACKED_PRIORITY: i32 = 2;
/// Alternates nested deeper than this are ignored.
pub const MAX_ALTERNATE_DEPTH: usize = 5;

#[derive(Debug, thiserror::Error)]
pub enum OdbError {
    #[error("object {0} not found")]
    NotFound(ObjectId),

    #[error("no object matches prefix {0}")]
    PrefixNotFound(String),

    #[error("prefix {prefix} is ambiguous: {count} objects match")]
    Ambiguous { prefix: String, count: usize },

    #[error("object {oid} is a {actual}, expected a {expected}")]
    WrongKind {
        oid: ObjectId,
        expected: gitcore_object::ObjectType,
        actual: gitcore_object::ObjectType,
    },

    #[error("no writable backend")]
    NoWritableBackend,

    #[error("backend {0} is read-only")]
    ReadOnly(&'static str),

    #[error("object database has no directory")]
    NoDirectory,

    #[error("enumeration stopped by callback")]
    Cancelled,

    #[error(transparent)]
    Loose(#[from] LooseError),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Classify for OdbError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) | Self::PrefixNotFound(_) => ErrorClass::NotFound,
            Self::Ambiguous { .. } => ErrorClass::Ambiguous,
            Self::WrongKind { .. }
            | Self::NoWritableBackend
            | Self::ReadOnly(_)
            | Self::NoDirectory => ErrorClass::InvalidArgument,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Loose(e) => e.class(),
            Self::Pack(e) => e.class(),
            Self::Object(e) => e.class(),
            Self::Hash(e) => e.class(),
            Self::Io(e) => ErrorClass::from_io(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OdbOptions {
    /// Zlib level for new loose objects, 0..=9.
    pub compression_level: u32,
    /// Entries kept by the read cache behind [`ObjectDatabase::read_cached`].
    pub cache_capacity: usize,
    pub hash_algorithm: HashAlgorithm,
    pub max_delta_depth: usize,
}

impl Default for OdbOptions {
    fn default() -> Self {
        Self {
            compression_level: 6,
            cache_capacity: 1024,
            hash_algorithm: HashAlgorithm::Sha1,
            max_delta_depth: MAX_DELTA_CHAIN_DEPTH,
        }
    }
}
