//! Staging area.
//!
//! An [`Index`] is the sorted table of `(path, stage)` entries that becomes
//! the next commit's tree. Stage 0 holds resolved content; stages 1, 2 and
//! 3 hold the ancestor, ours and theirs sides of an unresolved conflict.
//! The on-disk form (`DIRC`, versions 2 to 4) is read and written here.

mod add;
mod conflict;
pub mod entry;
pub mod extensions;
pub mod pathspec;
mod read;
mod tree;
mod write;

pub use add::{walk_worktree, AddOptions};
pub use conflict::Conflict;
pub use entry::{EntryFlags, IndexEntry, StatData};
pub use extensions::{CacheTree, RawExtension, ResolveUndo, ResolveUndoEntry};
pub use pathspec::{IgnoreRules, Pathspec};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use gitcore_hash::{HashAlgorithm, HashError, ObjectId};
use gitcore_object::ObjectError;
use gitcore_odb::OdbError;
use gitcore_utils::{Classify, ErrorClass, UtilError};

/// Version written by [`Index::new`].
pub const DEFAULT_VERSION: u32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("invalid index header: {0}")]
    BadHeader(String),

    #[error("unsupported index version {0}")]
    UnsupportedVersion(u32),

    #[error("index checksum mismatch: trailer {expected}, content hashes to {actual}")]
    ChecksumMismatch { expected: ObjectId, actual: ObjectId },

    #[error("corrupt index entry at offset {offset}: {reason}")]
    CorruptEntry { offset: usize, reason: String },

    #[error("corrupt {signature} extension: {reason}")]
    BadExtension { signature: String, reason: String },

    #[error("unsupported required extension {0}")]
    RequiredExtension(String),

    #[error("invalid path '{0}'")]
    InvalidPath(BString),

    #[error("invalid pathspec: {0}")]
    InvalidPathspec(String),

    #[error("pathspec '{0}' did not match any files")]
    PathspecNoMatch(String),

    #[error("conflict entries must share one path")]
    ConflictPathMismatch,

    #[error("tree '{dir}' would hold two entries named '{name}'")]
    DuplicateTreeEntry { dir: BString, name: BString },

    #[error("{0} path(s) are unmerged")]
    Unmerged(usize),

    #[error("path '{0}' is not in the index")]
    NotFound(BString),

    #[error("index has no backing file")]
    NoPath,

    #[error("add stopped by callback")]
    Cancelled,

    #[error(transparent)]
    Util(#[from] UtilError),

    #[error(transparent)]
    Odb(#[from] OdbError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IndexError {
    pub(crate) fn entry(offset: usize, reason: impl Into<String>) -> Self {
        Self::CorruptEntry {
            offset,
            reason: reason.into(),
        }
    }

    pub(crate) fn extension(signature: &[u8], reason: impl Into<String>) -> Self {
        Self::BadExtension {
            signature: String::from_utf8_lossy(signature).into_owned(),
            reason: reason.into(),
        }
    }
}

impl Classify for IndexError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::BadHeader(_)
            | Self::UnsupportedVersion(_)
            | Self::ChecksumMismatch { .. }
            | Self::CorruptEntry { .. }
            | Self::BadExtension { .. }
            | Self::RequiredExtension(_)
            | Self::DuplicateTreeEntry { .. } => ErrorClass::Corrupt,
            Self::InvalidPath(_)
            | Self::InvalidPathspec(_)
            | Self::ConflictPathMismatch
            | Self::NoPath => ErrorClass::InvalidArgument,
            Self::PathspecNoMatch(_) | Self::NotFound(_) => ErrorClass::NotFound,
            Self::Unmerged(_) => ErrorClass::Conflict,
            Self::Cancelled => ErrorClass::Cancelled,
            Self::Util(e) => e.class(),
            Self::Odb(e) => e.class(),
            Self::Object(e) => e.class(),
            Self::Hash(e) => e.class(),
            Self::Io(e) => ErrorClass::from_io(e),
        }
    }
}

/// Conflict slot of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Stage {
    #[default]
    Normal,
    Ancestor,
    Ours,
    Theirs,
}

impl Stage {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::Ancestor => 1,
            Self::Ours => 2,
            Self::Theirs => 3,
        }
    }

    pub fn from_u8(n: u8) -> Option<Self> {
        match n {
            0 => Some(Self::Normal),
            1 => Some(Self::Ancestor),
            2 => Some(Self::Ours),
            3 => Some(Self::Theirs),
            _ => None,
        }
    }

    pub fn is_conflict(self) -> bool {
        self != Self::Normal
    }
}

/// Reject paths that cannot be stored: empty, absolute, trailing or doubled
/// slashes, NUL bytes, and `.`, `..` or `.git` components.
pub fn validate_path(path: &BStr) -> Result<(), IndexError> {
    let bad = || IndexError::InvalidPath(path.to_owned());
    if path.is_empty() || path.contains(&0) {
        return Err(bad());
    }
    for component in path.split_str("/") {
        if component.is_empty()
            || component == b"."
            || component == b".."
            || component.eq_ignore_ascii_case(b".git")
        {
            return Err(bad());
        }
    }
    Ok(())
}

/// The staging area.
#[derive(Debug, Clone)]
pub struct Index {
    version: u32,
    algo: HashAlgorithm,
    entries: Vec<IndexEntry>,
    cache_tree: Option<CacheTree>,
    resolve_undo: ResolveUndo,
    unknown_extensions: Vec<RawExtension>,
    path: Option<PathBuf>,
    /// Trailer of the file as last read or written.
    checksum: Option<ObjectId>,
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Index {
    /// An empty in-memory index.
    pub fn new() -> Self {
        Self::with_hash_algorithm(HashAlgorithm::Sha1)
    }

    pub fn with_hash_algorithm(algo: HashAlgorithm) -> Self {
        Self {
            version: DEFAULT_VERSION,
            algo,
            entries: Vec::new(),
            cache_tree: None,
            resolve_undo: ResolveUndo::default(),
            unknown_extensions: Vec::new(),
            path: None,
            checksum: None,
        }
    }

    /// Bind to `path`, loading it when the file exists.
    pub fn open(path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, IndexError> {
        let path = path.as_ref();
        let mut index = match fs::File::open(path) {
            Ok(file) => {
                // SAFETY: index files are replaced by rename, never rewritten
                // in place, so the mapping stays valid while we parse it.
                let map = unsafe { memmap2::Mmap::map(&file)? };
                read::parse(&map, algo)?
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::with_hash_algorithm(algo),
            Err(e) => return Err(e.into()),
        };
        tracing::debug!(path = %path.display(), entries = index.entries.len(), version = index.version, "opened index");
        index.path = Some(path.to_path_buf());
        Ok(index)
    }

    /// Parse an index file image.
    pub fn from_bytes(data: &[u8], algo: HashAlgorithm) -> Result<Self, IndexError> {
        read::parse(data, algo)
    }

    /// Serialize to the on-disk form, trailer included.
    pub fn to_bytes(&self) -> Result<Vec<u8>, IndexError> {
        write::serialize(self)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Choose the on-disk version (2, 3 or 4) used by the next write.
    pub fn set_version(&mut self, version: u32) -> Result<(), IndexError> {
        if !(2..=4).contains(&version) {
            return Err(IndexError::UnsupportedVersion(version));
        }
        self.version = version;
        Ok(())
    }

    /// Trailer checksum of the file as last read or written; `None` for an
    /// index that never touched disk.
    pub fn checksum(&self) -> Option<ObjectId> {
        self.checksum
    }

    /// Persist to the bound path under `<path>.lock`.
    pub fn write(&mut self) -> Result<(), IndexError> {
        let path = self.path.clone().ok_or(IndexError::NoPath)?;
        self.write_to(path)
    }

    /// Persist to `path` under a lock and bind to it.
    pub fn write_to(&mut self, path: impl AsRef<Path>) -> Result<(), IndexError> {
        let path = path.as_ref();
        let checksum = write::write_locked(self, path)?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), %checksum, "wrote index");
        self.checksum = Some(checksum);
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Reload from disk when the file's trailer differs from the one last
    /// seen. Returns whether anything was reloaded.
    pub fn read_if_changed(&mut self) -> Result<bool, IndexError> {
        let path = self.path.clone().ok_or(IndexError::NoPath)?;
        let on_disk = read::trailer_of(&path, self.algo)?;
        if on_disk == self.checksum {
            return Ok(false);
        }
        let mut fresh = Self::open(&path, self.algo)?;
        fresh.path = Some(path);
        *self = fresh;
        tracing::debug!(checksum = ?self.checksum, "index changed on disk, reloaded");
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.cache_tree = None;
    }

    pub fn iter(&self) -> std::slice::Iter<'_, IndexEntry> {
        self.entries.iter()
    }

    /// Give up the index and keep its entries.
    pub fn into_entries(self) -> Vec<IndexEntry> {
        self.entries
    }

    fn search(&self, path: &[u8], stage: Stage) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|e| e.path.as_slice().cmp(path).then(e.stage.cmp(&stage)))
    }

    /// Range of entries for `path`, all stages.
    fn path_range(&self, path: &[u8]) -> std::ops::Range<usize> {
        let start = self.entries.partition_point(|e| e.path.as_slice() < path);
        let end = start + self.entries[start..].iter().take_while(|e| e.path.as_slice() == path).count();
        start..end
    }

    pub fn get(&self, path: &BStr, stage: Stage) -> Option<&IndexEntry> {
        self.search(path, stage).ok().map(|i| &self.entries[i])
    }

    /// Every stage recorded for `path`.
    pub fn get_all(&self, path: &BStr) -> &[IndexEntry] {
        &self.entries[self.path_range(path)]
    }

    /// Insert or replace the `(path, stage)` slot.
    ///
    /// A stage-0 entry displaces any conflict stages for the same path;
    /// those move into the resolve-undo record. It also displaces the
    /// stage-0 entries it cannot share a tree with: everything under
    /// `path/`, and files named like one of its parent directories.
    pub fn add(&mut self, entry: IndexEntry) -> Result<(), IndexError> {
        validate_path(entry.path.as_bstr())?;
        if entry.stage == Stage::Normal {
            self.resolve(entry.path.as_bstr());
            self.displace_directory_file(entry.path.as_bstr());
        } else if let Ok(i) = self.search(&entry.path, Stage::Normal) {
            self.entries.remove(i);
        }
        self.invalidate(entry.path.as_bstr());
        match self.search(&entry.path, entry.stage) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
        Ok(())
    }

    pub fn remove(&mut self, path: &BStr, stage: Stage) -> bool {
        match self.search(path, stage) {
            Ok(i) => {
                self.entries.remove(i);
                self.invalidate(path);
                true
            }
            Err(_) => false,
        }
    }

    /// Drop every stage of `path`. Returns how many entries went.
    pub fn remove_path(&mut self, path: &BStr) -> usize {
        let range = self.path_range(path);
        let n = range.len();
        if n > 0 {
            self.entries.drain(range);
            self.invalidate(path);
        }
        n
    }

    fn displace_directory_file(&mut self, path: &BStr) {
        let mut dir = BString::from(path.as_bytes());
        dir.push(b'/');
        let before = self.entries.len();
        self.entries.retain(|e| {
            if e.stage != Stage::Normal {
                return true;
            }
            let other = e.path.as_slice();
            let under = other.starts_with(dir.as_slice());
            let parent = other.len() < path.len() && path.starts_with(other) && path[other.len()] == b'/';
            !(under || parent)
        });
        let removed = before - self.entries.len();
        if removed > 0 {
            self.invalidate(dir.as_bstr());
            tracing::debug!(%path, removed, "replaced directory/file entries");
        }
    }

    /// Drop every entry under the directory `dir`.
    pub fn remove_dir(&mut self, dir: &BStr) -> usize {
        let before = self.entries.len();
        let mut prefix = BString::from(dir.as_bytes());
        prefix.push(b'/');
        self.entries.retain(|e| !e.path.starts_with(prefix.as_slice()));
        let n = before - self.entries.len();
        if n > 0 {
            self.invalidate(dir);
        }
        n
    }

    pub fn cache_tree(&self) -> Option<&CacheTree> {
        self.cache_tree.as_ref()
    }

    pub fn resolve_undo(&self) -> &ResolveUndo {
        &self.resolve_undo
    }

    pub fn clear_resolve_undo(&mut self) {
        self.resolve_undo.entries.clear();
    }

    /// Optional extensions carried through unchanged.
    pub fn unknown_extensions(&self) -> &[RawExtension] {
        &self.unknown_extensions
    }

    fn invalidate(&mut self, path: &BStr) {
        if let Some(tree) = &mut self.cache_tree {
            tree.invalidate(path);
        }
    }
}
