//! Recording merge outcomes in the index and the work tree.
//!
//! Conflicts go in as stages 1 (ancestor), 2 (ours) and 3 (theirs) under
//! the conflict path; a side that has no file leaves its stage empty.

use std::fs;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use gitcore_hash::ObjectId;
use gitcore_index::{Index, IndexEntry};
use gitcore_object::FileMode;
use gitcore_odb::ObjectDatabase;

use crate::{ConflictEntry, ConflictSide, ConflictType, MergeError};

fn stage_entry(path: &BStr, side: &Option<ConflictSide>) -> Option<IndexEntry> {
    side.as_ref().map(|s| IndexEntry::new(path, s.oid, s.mode))
}

/// Record `conflict` as stage entries, displacing any stage-0 entry.
pub fn record_conflict_in_index(index: &mut Index, conflict: &ConflictEntry) -> Result<(), MergeError> {
    let path = conflict.path.as_bstr();
    index.add_conflict(
        stage_entry(path, &conflict.base),
        stage_entry(path, &conflict.ours),
        stage_entry(path, &conflict.theirs),
    )?;
    Ok(())
}

/// Stage `oid` at stage 0 for `path`, clearing any conflict stages.
pub fn resolve_conflict(index: &mut Index, path: &BStr, oid: ObjectId, mode: FileMode) -> Result<(), MergeError> {
    index.add(IndexEntry::new(path, oid, mode))?;
    Ok(())
}

/// Write `content` as a blob and stage it at stage 0.
pub fn record_clean_merge_in_index(
    index: &mut Index,
    odb: &ObjectDatabase,
    path: &BStr,
    content: &[u8],
    mode: FileMode,
) -> Result<ObjectId, MergeError> {
    Ok(index.add_from_buffer(odb, IndexEntry::new(path, ObjectId::NULL_SHA1, mode), content)?)
}

/// Work-tree path a conflict's file is written to. A file that collides
/// with a directory is moved aside as `path~side`.
pub fn conflict_worktree_path(conflict: &ConflictEntry) -> BString {
    if conflict.conflict_type != ConflictType::DirectoryFile {
        return conflict.path.clone();
    }
    let side = if conflict.ours.is_some() { "ours" } else { "theirs" };
    let mut path = conflict.path.clone();
    path.push(b'~');
    path.extend_from_slice(side.as_bytes());
    path
}

/// Bytes to leave in the work tree for a conflict: the marker text when
/// there is one, otherwise the surviving version (ours first).
pub fn conflict_file_content(odb: &ObjectDatabase, conflict: &ConflictEntry) -> Result<Option<Vec<u8>>, MergeError> {
    if let Some(content) = &conflict.content {
        return Ok(Some(content.clone()));
    }
    match conflict.ours.as_ref().or(conflict.theirs.as_ref()) {
        Some(side) if !side.mode.is_gitlink() => Ok(Some(odb.read(&side.oid)?.data)),
        _ => Ok(None),
    }
}

/// Write `content` to `work_tree/path`, creating parent directories.
/// Symlink modes create a link to the content on Unix.
pub fn write_worktree_file(work_tree: &Path, path: &BStr, content: &[u8], mode: FileMode) -> Result<PathBuf, MergeError> {
    let rel = path
        .to_path()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("path '{path}' is not valid here")))?;
    let full = work_tree.join(rel);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::symlink_metadata(&full).is_ok_and(|m| m.is_symlink()) {
        fs::remove_file(&full)?;
    }
    write_file(&full, content, mode)?;
    tracing::trace!(path = %path, "wrote work-tree file");
    Ok(full)
}

#[cfg(unix)]
fn write_file(full: &Path, content: &[u8], mode: FileMode) -> std::io::Result<()> {
    use std::os::unix::ffi::OsStrExt;
    use std::os::unix::fs::PermissionsExt;

    if mode.is_symlink() {
        if full.exists() {
            fs::remove_file(full)?;
        }
        return std::os::unix::fs::symlink(std::ffi::OsStr::from_bytes(content), full);
    }
    fs::write(full, content)?;
    let perm = if mode == FileMode::Executable { 0o755 } else { 0o644 };
    fs::set_permissions(full, fs::Permissions::from_mode(perm))
}

#[cfg(not(unix))]
fn write_file(full: &Path, content: &[u8], _mode: FileMode) -> std::io::Result<()> {
    fs::write(full, content)
}
