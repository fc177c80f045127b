//! Staging content from the work tree or from memory.

use std::fs;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice, ByteVec};
use gitcore_hash::ObjectId;
use gitcore_object::{FileMode, ObjectType};
use gitcore_odb::ObjectDatabase;
use gitcore_utils::Control;

use crate::entry::{IndexEntry, StatData};
use crate::pathspec::{IgnoreRules, Pathspec};
use crate::{validate_path, Index, IndexError};

/// Options for [`Index::add_all`].
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Stage untracked paths even when an `ignore` pattern names them.
    pub force: bool,
    /// Fail before staging anything when an include pattern matches no file.
    pub check_pathspec: bool,
    /// Glob patterns for untracked paths to leave alone. Patterns without
    /// a `/` match the file name, others the whole path.
    pub ignore: Vec<String>,
}

fn read_worktree_file(full: &Path) -> Result<(Vec<u8>, fs::Metadata), IndexError> {
    let meta = fs::symlink_metadata(full)?;
    let content = if meta.file_type().is_symlink() {
        Vec::from_path_lossy(&fs::read_link(full)?).into_owned()
    } else {
        fs::read(full)?
    };
    Ok((content, meta))
}

/// Every regular file and symlink under `root`, `.git` excluded, as
/// slash-separated relative paths in index order.
pub fn walk_worktree(root: &Path) -> Result<Vec<BString>, IndexError> {
    let mut found = Vec::new();
    let mut pending = vec![PathBuf::new()];
    while let Some(rel) = pending.pop() {
        for dirent in fs::read_dir(root.join(&rel))? {
            let dirent = dirent?;
            if dirent.file_name() == ".git" {
                continue;
            }
            let child = rel.join(dirent.file_name());
            let kind = dirent.file_type()?;
            if kind.is_dir() {
                pending.push(child);
            } else if kind.is_file() || kind.is_symlink() {
                let mut path = Vec::from_path_lossy(&child).into_owned();
                if std::path::MAIN_SEPARATOR != '/' {
                    path.iter_mut()
                        .filter(|c| **c == std::path::MAIN_SEPARATOR as u8)
                        .for_each(|c| *c = b'/');
                }
                found.push(BString::from(path));
            }
        }
    }
    found.sort();
    Ok(found)
}

impl Index {
    /// Hash `workdir/path` into `odb` and stage it at stage 0.
    ///
    /// Symlinks are staged as their target text. Conflict stages for the
    /// path move into the resolve-undo record.
    pub fn add_by_path(
        &mut self,
        odb: &ObjectDatabase,
        workdir: &Path,
        path: &BStr,
    ) -> Result<ObjectId, IndexError> {
        validate_path(path)?;
        let rel = path.to_path().map_err(|_| IndexError::InvalidPath(path.to_owned()))?;
        let (content, meta) = read_worktree_file(&workdir.join(rel))?;
        if meta.is_dir() {
            return Err(IndexError::InvalidPath(path.to_owned()));
        }
        let oid = odb.write(ObjectType::Blob, &content)?;
        let mut entry = IndexEntry::new(path, oid, FileMode::from_stat_mode(StatData::mode_of(&meta)));
        entry.stat = StatData::from_metadata(&meta);
        self.add(entry)?;
        tracing::trace!(path = %path, %oid, "staged from work tree");
        Ok(oid)
    }

    /// Write `content` as a blob and stage `entry` pointing at it.
    pub fn add_from_buffer(
        &mut self,
        odb: &ObjectDatabase,
        mut entry: IndexEntry,
        content: &[u8],
    ) -> Result<ObjectId, IndexError> {
        let oid = odb.write(ObjectType::Blob, content)?;
        entry.oid = oid;
        self.add(entry)?;
        Ok(oid)
    }

    /// Stage every work-tree file selected by `pathspecs`.
    ///
    /// `on_match` sees each candidate with the include pattern that picked
    /// it and answers [`Control::Continue`] to stage, [`Control::Skip`] to
    /// leave it, or [`Control::Abort`] to stop with `Cancelled`. Files
    /// staged before an abort stay staged, so running again converges.
    /// Returns the number of files staged.
    pub fn add_all<S, F>(
        &mut self,
        odb: &ObjectDatabase,
        workdir: &Path,
        pathspecs: &[S],
        options: &AddOptions,
        mut on_match: F,
    ) -> Result<usize, IndexError>
    where
        S: AsRef<str>,
        F: FnMut(&BStr, Option<&BStr>) -> Control,
    {
        let spec = Pathspec::parse(pathspecs)?;
        let ignore = IgnoreRules::new(&options.ignore);
        let files = walk_worktree(workdir)?;

        if options.check_pathspec {
            if let Some(unmatched) = spec
                .includes()
                .find(|p| !files.iter().any(|f| p.matches(f.as_bstr())))
            {
                return Err(IndexError::PathspecNoMatch(unmatched.raw.clone()));
            }
        }

        let mut staged = 0;
        for path in &files {
            let path = path.as_bstr();
            if !spec.matches(path) {
                continue;
            }
            let tracked = !self.get_all(path).is_empty();
            if !tracked && !options.force && ignore.is_ignored(path) {
                tracing::trace!(path = %path, "ignored");
                continue;
            }
            let matched = spec.matching_pattern(path).map(|p| BStr::new(p.raw.as_str()));
            match on_match(path, matched) {
                Control::Continue => {}
                Control::Skip => continue,
                Control::Abort => {
                    tracing::debug!(path = %path, staged, "add stopped by callback");
                    return Err(IndexError::Cancelled);
                }
            }
            self.add_by_path(odb, workdir, path)?;
            staged += 1;
        }
        tracing::debug!(staged, candidates = files.len(), "add_all finished");
        Ok(staged)
    }
}
