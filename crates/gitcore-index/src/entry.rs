//! Index entries and the stat data cached with them.

use std::fs::Metadata;

use bstr::BString;
use gitcore_hash::ObjectId;
use gitcore_object::FileMode;

use crate::Stage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Slash-separated, relative to the work tree root.
    pub path: BString,
    pub oid: ObjectId,
    pub mode: FileMode,
    pub stage: Stage,
    pub stat: StatData,
    pub flags: EntryFlags,
}

impl IndexEntry {
    /// A stage-0 entry with empty stat data.
    pub fn new(path: impl Into<BString>, oid: ObjectId, mode: FileMode) -> Self {
        Self {
            path: path.into(),
            oid,
            mode,
            stage: Stage::Normal,
            stat: StatData::default(),
            flags: EntryFlags::default(),
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = stage;
        self
    }

    pub fn is_conflict(&self) -> bool {
        self.stage.is_conflict()
    }

    /// True when `meta` still describes the file this entry was staged
    /// from. A false answer means "maybe changed", not "changed".
    pub fn is_stat_clean(&self, meta: &Metadata) -> bool {
        if self.flags.assume_valid {
            return true;
        }
        self.stat.matches(&StatData::from_metadata(meta))
            && self.mode == FileMode::from_stat_mode(StatData::mode_of(meta))
    }
}

/// Filesystem metadata truncated to the 32-bit fields the index stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatData {
    pub ctime_secs: u32,
    pub ctime_nsecs: u32,
    pub mtime_secs: u32,
    pub mtime_nsecs: u32,
    pub dev: u32,
    pub ino: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u32,
}

impl StatData {
    #[cfg(unix)]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            ctime_secs: meta.ctime() as u32,
            ctime_nsecs: meta.ctime_nsec() as u32,
            mtime_secs: meta.mtime() as u32,
            mtime_nsecs: meta.mtime_nsec() as u32,
            dev: meta.dev() as u32,
            ino: meta.ino() as u32,
            uid: meta.uid(),
            gid: meta.gid(),
            size: meta.len() as u32,
        }
    }

    #[cfg(not(unix))]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::time::UNIX_EPOCH;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .unwrap_or_default();
        Self {
            ctime_secs: mtime.as_secs() as u32,
            ctime_nsecs: mtime.subsec_nanos(),
            mtime_secs: mtime.as_secs() as u32,
            mtime_nsecs: mtime.subsec_nanos(),
            size: meta.len() as u32,
            ..Self::default()
        }
    }

    /// Mode bits in `st_mode` form.
    #[cfg(unix)]
    pub fn mode_of(meta: &Metadata) -> u32 {
        use std::os::unix::fs::MetadataExt;
        meta.mode()
    }

    #[cfg(not(unix))]
    pub fn mode_of(meta: &Metadata) -> u32 {
        if meta.is_dir() {
            0o040000
        } else if meta.file_type().is_symlink() {
            0o120000
        } else {
            0o100644
        }
    }

    /// Size and times must agree; inode, device and owner only when both
    /// sides recorded one.
    pub fn matches(&self, other: &StatData) -> bool {
        let known = |a: u32, b: u32| a == 0 || b == 0 || a == b;
        self.size == other.size
            && self.mtime_secs == other.mtime_secs
            && self.mtime_nsecs == other.mtime_nsecs
            && self.ctime_secs == other.ctime_secs
            && self.ctime_nsecs == other.ctime_nsecs
            && known(self.ino, other.ino)
            && known(self.dev, other.dev)
            && known(self.uid, other.uid)
            && known(self.gid, other.gid)
    }
}

/// Per-entry flags. `skip_worktree` and `intent_to_add` need version 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryFlags {
    pub assume_valid: bool,
    pub intent_to_add: bool,
    pub skip_worktree: bool,
}

impl EntryFlags {
    pub fn has_extended(&self) -> bool {
        self.intent_to_add || self.skip_worktree
    }
}
