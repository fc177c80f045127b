use std::path::PathBuf;

use gitcore_utils::{Classify, ErrorClass};

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("not a git repository: {0}")]
    NotFound(PathBuf),

    #[error("invalid git directory: {path}: {reason}")]
    InvalidGitDir { path: PathBuf, reason: String },

    #[error("bare repository has no working tree")]
    BareNoWorkTree,

    #[error("invalid reference name '{0}'")]
    InvalidRefName(String),

    #[error("reference '{0}' not found")]
    RefNotFound(String),

    #[error("reference '{name}' is malformed: {reason}")]
    MalformedRef { name: String, reason: String },

    #[error("symbolic reference chain starting at '{0}' is too deep")]
    SymrefLoop(String),

    #[error("reference iteration stopped by callback")]
    Cancelled,

    #[error("HEAD does not point to a commit yet")]
    UnbornHead,

    #[error("a merge is already in progress")]
    MergeInProgress,

    #[error("no merge in progress")]
    NoMergeInProgress,

    #[error("merge would overwrite local changes to '{0}'")]
    DirtyWorkTree(String),

    #[error("index has staged changes to '{0}' that a merge would discard")]
    StagedChanges(String),

    #[error("index still has {0} conflicted paths")]
    UnresolvedConflicts(usize),

    #[error(transparent)]
    Odb(#[from] gitcore_odb::OdbError),

    #[error(transparent)]
    Index(#[from] gitcore_index::IndexError),

    #[error(transparent)]
    Merge(#[from] gitcore_merge::MergeError),

    #[error(transparent)]
    RevWalk(#[from] gitcore_revwalk::RevWalkError),

    #[error(transparent)]
    Hash(#[from] gitcore_hash::HashError),

    #[error(transparent)]
    Util(#[from] gitcore_utils::UtilError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Classify for RepoError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::NotFound(_) | Self::RefNotFound(_) | Self::UnbornHead => ErrorClass::NotFound,
            Self::InvalidGitDir { .. } | Self::MalformedRef { .. } | Self::SymrefLoop(_) => ErrorClass::Corrupt,
            Self::BareNoWorkTree | Self::InvalidRefName(_) | Self::NoMergeInProgress => ErrorClass::InvalidArgument,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::MergeInProgress | Self::DirtyWorkTree(_) | Self::StagedChanges(_) | Self::UnresolvedConflicts(_) => ErrorClass::Conflict,
            Self::Odb(e) => e.class(),
            Self::Index(e) => e.class(),
            Self::Merge(e) => e.class(),
            Self::RevWalk(e) => e.class(),
            Self::Hash(e) => e.class(),
            Self::Util(e) => e.class(),
            Self::Io(e) => ErrorClass::from_io(e),
        }
    }
}
