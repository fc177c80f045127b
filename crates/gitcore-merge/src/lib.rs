//! Merge engine: three-way file merge, rename-aware tree merge and
//! commit merges over a (possibly virtual) merge base.
//!
//! File merges align ancestor, ours and theirs line by line and either
//! take the changed side, union non-overlapping changes, or emit conflict
//! markers. Tree merges classify every path and record the outcome in an
//! [`Index`]: clean paths at stage 0, conflicts at stages 1 to 3.

pub mod conflict;
pub mod content;
mod recursive;
mod tree;

pub use content::{merge_file_from_index, merge_files, MergeFileInput, MergeFileResult};
pub use recursive::merge_commits;
pub use tree::merge_trees;

use std::io;

use bstr::BString;
use gitcore_diff::{DiffAlgorithm, DiffError};
use gitcore_hash::ObjectId;
use gitcore_index::{Index, IndexError};
use gitcore_object::{FileMode, ObjectError};
use gitcore_odb::{ObjectDatabase, OdbError};
use gitcore_revwalk::RevWalkError;
use gitcore_utils::{Classify, ErrorClass};

/// Default width of conflict markers.
pub const DEFAULT_MARKER_SIZE: usize = 7;

/// Default depth for folding criss-cross merge bases into a virtual base.
pub const DEFAULT_RECURSION_LIMIT: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error("merge conflict in {path}")]
    Conflict { path: BString },

    #[error("unknown merge favor '{0}'")]
    UnknownFavor(String),

    #[error("unknown conflict style '{0}'")]
    UnknownStyle(String),

    #[error("conflict marker size must be at least 1")]
    InvalidMarkerSize,

    #[error(transparent)]
    Diff(#[from] DiffError),

    #[error(transparent)]
    Odb(#[from] OdbError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    RevWalk(#[from] RevWalkError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Classify for MergeError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Conflict { .. } => ErrorClass::Conflict,
            Self::UnknownFavor(_) | Self::UnknownStyle(_) | Self::InvalidMarkerSize => ErrorClass::InvalidArgument,
            Self::Diff(e) => e.class(),
            Self::Odb(e) => e.class(),
            Self::Index(e) => e.class(),
            Self::RevWalk(e) => e.class(),
            Self::Object(e) => e.class(),
            Self::Io(e) => ErrorClass::from_io(e),
        }
    }
}

/// How conflicting changes are settled without markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeFavor {
    /// Leave a conflict.
    #[default]
    Normal,
    Ours,
    Theirs,
    /// Ours, then theirs, for each conflicting region.
    Union,
}

impl MergeFavor {
    pub fn from_name(name: &str) -> Result<Self, MergeError> {
        match name {
            "normal" => Ok(Self::Normal),
            "ours" => Ok(Self::Ours),
            "theirs" => Ok(Self::Theirs),
            "union" => Ok(Self::Union),
            other => Err(MergeError::UnknownFavor(other.to_owned())),
        }
    }
}

/// Conflict marker style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictStyle {
    /// Ours and theirs only.
    #[default]
    Merge,
    /// Include the ancestor between `|||||||` and `=======`.
    Diff3,
    /// Diff3, with lines common to both sides moved out of the block.
    ZDiff3,
}

impl ConflictStyle {
    pub fn from_name(name: &str) -> Result<Self, MergeError> {
        match name {
            "merge" => Ok(Self::Merge),
            "diff3" => Ok(Self::Diff3),
            "zdiff3" => Ok(Self::ZDiff3),
            other => Err(MergeError::UnknownStyle(other.to_owned())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::Diff3 => "diff3",
            Self::ZDiff3 => "zdiff3",
        }
    }
}

/// Options for a single file merge.
///
/// A label left unset falls back to the side's path, and the marker is
/// written bare when there is neither.
#[derive(Debug, Clone)]
pub struct MergeFileOptions {
    pub ancestor_label: Option<String>,
    pub our_label: Option<String>,
    pub their_label: Option<String>,
    pub favor: MergeFavor,
    pub style: ConflictStyle,
    pub marker_size: usize,
    pub ignore_whitespace: bool,
    pub algorithm: DiffAlgorithm,
}

impl Default for MergeFileOptions {
    fn default() -> Self {
        Self {
            ancestor_label: None,
            our_label: None,
            their_label: None,
            favor: MergeFavor::Normal,
            style: ConflictStyle::Merge,
            marker_size: DEFAULT_MARKER_SIZE,
            ignore_whitespace: false,
            algorithm: DiffAlgorithm::Myers,
        }
    }
}

/// Options for tree and commit merges.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Stop at the first conflicting path with [`MergeError::Conflict`].
    pub fail_on_conflict: bool,
    /// Applies to delete/modify pairs and, unless `Normal`, overrides
    /// `file_options.favor` for content.
    pub favor: MergeFavor,
    pub find_renames: bool,
    pub rename_threshold: u8,
    pub recursion_limit: usize,
    pub file_options: MergeFileOptions,
    /// Let a repository merge overwrite work-tree files that differ from
    /// the `ours` version.
    pub force: bool,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            fail_on_conflict: false,
            favor: MergeFavor::Normal,
            find_renames: true,
            rename_threshold: 50,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            file_options: MergeFileOptions::default(),
            force: false,
        }
    }
}

impl MergeOptions {
    pub(crate) fn content_options(&self) -> MergeFileOptions {
        let mut file = self.file_options.clone();
        if self.favor != MergeFavor::Normal {
            file.favor = self.favor;
        }
        file
    }
}

/// Why a path could not be merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    /// Both sides changed the same region.
    Content,
    /// One side modified, the other deleted.
    ModifyDelete,
    /// Both sides added the path with different content.
    AddAdd,
    /// One side renamed, the other deleted.
    RenameDelete,
    /// Both sides renamed the same file to different paths.
    RenameRename,
    /// A file on one side, a directory on the other.
    DirectoryFile,
    /// The sides changed the file type or mode incompatibly.
    ModeConflict,
}

/// One side of a conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSide {
    pub oid: ObjectId,
    pub mode: FileMode,
    /// Path on that side; differs from the conflict path across renames.
    pub path: BString,
}

/// A path the merge could not settle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictEntry {
    pub path: BString,
    pub conflict_type: ConflictType,
    pub base: Option<ConflictSide>,
    pub ours: Option<ConflictSide>,
    pub theirs: Option<ConflictSide>,
    /// Merged text with conflict markers, for conflicts a content merge
    /// could express.
    pub content: Option<Vec<u8>>,
}

/// Outcome of a tree or commit merge.
#[derive(Debug)]
pub struct MergeResult {
    /// Clean paths at stage 0, conflicted paths at stages 1 to 3.
    pub index: Index,
    /// Conflicts in path order.
    pub conflicts: Vec<ConflictEntry>,
}

impl MergeResult {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Write the merged tree; fails with a conflict error while any path
    /// is unresolved.
    pub fn write_tree(&mut self, odb: &ObjectDatabase) -> Result<ObjectId, MergeError> {
        Ok(self.index.write_tree(odb)?)
    }
}
