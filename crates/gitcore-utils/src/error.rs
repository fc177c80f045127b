use std::path::PathBuf;

use crate::class::{Classify, ErrorClass};

/// Base error type for gitcore-utils operations.
#[derive(Debug, thiserror::Error)]
pub enum UtilError {
    #[error("lock file error: {0}")]
    Lock(#[from] LockError),

    #[error("invalid signature: {0}")]
    Signature(String),

    #[error("date parse error: {0}")]
    DateParse(String),

    #[error("invalid glob pattern: {0}")]
    Glob(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Lock file specific errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("unable to create lock file '{path}': already locked")]
    AlreadyLocked { path: PathBuf },

    #[error("unable to create lock file '{path}': {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unable to commit lock file '{path}': {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Classify for LockError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::AlreadyLocked { .. } => ErrorClass::Locked,
            Self::Create { .. } | Self::Commit { .. } => ErrorClass::Io,
        }
    }
}

impl Classify for UtilError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Lock(e) => e.class(),
            Self::Signature(_) | Self::DateParse(_) => ErrorClass::Corrupt,
            Self::Glob(_) => ErrorClass::InvalidArgument,
            Self::Io(e) => ErrorClass::from_io(e),
        }
    }
}
