//! Diff engine.
//!
//! A [`DiffList`] holds one [`DiffDelta`] per path that differs between two
//! sides: a tree, the index, or the work tree. Deltas are classified from
//! object ids and modes alone; content is read only when an id is unknown
//! (work-tree files) or when hunks are asked for through [`DiffList::patch`].
//! [`DiffList::find_similar`] pairs deletions with additions into renames
//! and copies.

pub mod algorithm;
pub mod binary;
mod hunk;
mod list;
mod patch;
mod rename;
mod side;
pub mod similarity;

pub use hunk::{DiffLine, Hunk, LineOrigin};
pub use list::{
    diff_index_to_workdir, diff_tree_to_index, diff_tree_to_tree, diff_tree_to_workdir, DiffList, DiffStats, Differ,
};
pub use patch::{diff_blob_to_buffer, diff_blobs, diff_buffers, DiffVisitor, Patch};
pub use rename::FindOptions;
pub use similarity::{HashSignatureMetric, Signature, SimilarityMetric};

use std::io;

use bstr::BString;
use gitcore_hash::{HashError, ObjectId};
use gitcore_index::IndexError;
use gitcore_object::{FileMode, ObjectError};
use gitcore_odb::OdbError;
use gitcore_utils::{Classify, ErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    #[error("unknown diff algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("delta index {index} out of range ({len} deltas)")]
    NoSuchDelta { index: usize, len: usize },

    #[error("diff stopped by callback")]
    Cancelled,

    #[error(transparent)]
    Odb(#[from] OdbError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Classify for DiffError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::UnknownAlgorithm(_) | Self::NoSuchDelta { .. } => ErrorClass::InvalidArgument,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Odb(e) => e.class(),
            Self::Index(e) => e.class(),
            Self::Object(e) => e.class(),
            Self::Hash(e) => e.class(),
            Self::Io(e) => ErrorClass::from_io(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiffAlgorithm {
    /// Myers with unique-line discarding.
    #[default]
    Myers,
    /// Myers searching for the shortest edit script.
    Minimal,
    Patience,
}

impl DiffAlgorithm {
    pub fn from_name(name: &str) -> Result<Self, DiffError> {
        match name {
            "myers" | "default" => Ok(Self::Myers),
            "minimal" => Ok(Self::Minimal),
            "patience" => Ok(Self::Patience),
            other => Err(DiffError::UnknownAlgorithm(other.to_owned())),
        }
    }
}

/// Options shared by every diff entry point.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    pub algorithm: DiffAlgorithm,
    /// Unchanged lines shown around each change (default 3).
    pub context_lines: u32,
    /// Hunks separated by at most this many extra lines are joined.
    pub interhunk_lines: u32,
    /// Compare lines with whitespace removed.
    pub ignore_whitespace: bool,
    pub include_unmodified: bool,
    /// Report work-tree files absent from the other side.
    pub include_untracked: bool,
    /// Report untracked files matched by `ignore` as `Ignored`.
    pub include_ignored: bool,
    /// Limit the diff to matching paths (pathspec syntax).
    pub pathspec: Vec<String>,
    /// Glob patterns marking untracked work-tree files as ignored.
    pub ignore: Vec<String>,
    /// Treat every file as binary.
    pub force_binary: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            algorithm: DiffAlgorithm::Myers,
            context_lines: 3,
            interhunk_lines: 0,
            ignore_whitespace: false,
            include_unmodified: false,
            include_untracked: false,
            include_ignored: false,
            pathspec: Vec::new(),
            ignore: Vec::new(),
            force_binary: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaStatus {
    Unmodified,
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    Typechange,
    Conflicted,
    Ignored,
    Untracked,
    Unreadable,
}

impl DeltaStatus {
    /// One-letter code in the style of `--name-status`.
    pub fn as_char(self) -> char {
        match self {
            Self::Unmodified => ' ',
            Self::Added => 'A',
            Self::Deleted => 'D',
            Self::Modified => 'M',
            Self::Renamed => 'R',
            Self::Copied => 'C',
            Self::Typechange => 'T',
            Self::Conflicted => 'U',
            Self::Ignored => '!',
            Self::Untracked => '?',
            Self::Unreadable => 'X',
        }
    }
}

impl std::fmt::Display for DeltaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DiffFileFlags: u32 {
        const BINARY = 1 << 0;
        const NOT_BINARY = 1 << 1;
        /// `id` is the file's real object id.
        const VALID_ID = 1 << 2;
        /// The file exists on this side.
        const EXISTS = 1 << 3;
    }
}

/// One side of a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFile {
    /// Null when the file is absent or its id has not been computed.
    pub id: ObjectId,
    pub path: BString,
    pub size: u64,
    pub mode: Option<FileMode>,
    pub flags: DiffFileFlags,
}

impl DiffFile {
    pub(crate) fn absent(path: BString, id: ObjectId) -> Self {
        Self {
            id,
            path,
            size: 0,
            mode: None,
            flags: DiffFileFlags::empty(),
        }
    }

    pub(crate) fn present(path: BString, id: ObjectId, mode: FileMode, known_id: bool) -> Self {
        let mut flags = DiffFileFlags::EXISTS;
        if known_id {
            flags |= DiffFileFlags::VALID_ID;
        }
        Self {
            id,
            path,
            size: 0,
            mode: Some(mode),
            flags,
        }
    }

    pub fn exists(&self) -> bool {
        self.flags.contains(DiffFileFlags::EXISTS)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDelta {
    pub status: DeltaStatus,
    pub old_file: DiffFile,
    pub new_file: DiffFile,
    /// 0..=100 for renames and copies, otherwise 0.
    pub similarity: u8,
}

impl DiffDelta {
    /// New path, or the old one for deletions.
    pub fn path(&self) -> &BString {
        if self.new_file.exists() {
            &self.new_file.path
        } else {
            &self.old_file.path
        }
    }

    pub fn is_binary(&self) -> bool {
        (self.old_file.flags | self.new_file.flags).contains(DiffFileFlags::BINARY)
    }
}
