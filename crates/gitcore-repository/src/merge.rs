//! Repository-level merges.
//!
//! A merge moves the repository from `None` to `InProgress` by writing
//! `MERGE_HEAD`, `MERGE_MSG`, `MERGE_MODE` and `ORIG_HEAD` next to the
//! merged index and work-tree files. `commit_merge` or `abort_merge` ends
//! the attempt (recorded in `MERGE_MODE`), and `cleanup_state` removes the
//! state files to return to `None`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice};
use gitcore_hash::hasher::Hasher;
use gitcore_hash::ObjectId;
use gitcore_index::{Index, Stage};
use gitcore_merge::conflict::{conflict_file_content, conflict_worktree_path, write_worktree_file};
use gitcore_merge::{merge_commits, ConflictEntry, ConflictType, MergeOptions};
use gitcore_object::FileMode;
use gitcore_utils::date::Signature;
use gitcore_utils::lockfile::LockFile;

use crate::{RepoError, Repository};

const MERGE_HEAD: &str = "MERGE_HEAD";
const ORIG_HEAD: &str = "ORIG_HEAD";
const MERGE_MSG: &str = "MERGE_MSG";
const MERGE_MODE: &str = "MERGE_MODE";

/// How `theirs` relates to `HEAD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAnalysis {
    /// `theirs` is already reachable from `HEAD`.
    UpToDate,
    /// `HEAD` is an ancestor of `theirs`; moving the branch is enough.
    FastForward,
    /// Histories diverged and need a real merge.
    Normal,
    /// `HEAD` has no commit yet.
    Unborn,
}

/// Caller preference reported alongside the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePreference {
    #[default]
    None,
    NoFastForward,
    FastForwardOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeState {
    None,
    InProgress,
    Committed,
    Aborted,
}

/// Outcome of [`Repository::merge`].
#[derive(Debug, Clone)]
pub struct MergeSummary {
    pub conflicts: Vec<ConflictEntry>,
    /// Work-tree paths written, conflict files included.
    pub updated: Vec<BString>,
    pub removed: Vec<BString>,
}

impl MergeSummary {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

enum Action {
    Remove { path: BString, expected: Option<ObjectId> },
    Write { path: BString, oid: ObjectId, mode: FileMode, expected: Option<ObjectId> },
    Conflict { index: usize, expected: Option<ObjectId> },
}

impl Repository {
    /// Classify merging `theirs` into `HEAD`.
    pub fn analyze(&self, theirs: &ObjectId) -> Result<(MergeAnalysis, MergePreference), RepoError> {
        let analysis = match self.head_oid()? {
            None => MergeAnalysis::Unborn,
            Some(head) if head == *theirs || gitcore_revwalk::is_ancestor(&self.odb, theirs, &head)? => {
                MergeAnalysis::UpToDate
            }
            Some(head) if gitcore_revwalk::is_ancestor(&self.odb, &head, theirs)? => MergeAnalysis::FastForward,
            Some(_) => MergeAnalysis::Normal,
        };
        tracing::debug!(%theirs, ?analysis, "analyzed merge");
        Ok((analysis, self.merge_preference))
    }

    pub fn merge_state(&self) -> Result<MergeState, RepoError> {
        if self.git_dir.join(MERGE_HEAD).is_file() {
            return Ok(MergeState::InProgress);
        }
        match fs::read_to_string(self.git_dir.join(MERGE_MODE)) {
            Ok(mode) => Ok(match mode.trim() {
                "committed" => MergeState::Committed,
                "aborted" => MergeState::Aborted,
                _ => MergeState::None,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(MergeState::None),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge commit `theirs` into `HEAD`: write the merged index and
    /// work-tree files and enter the `InProgress` state.
    ///
    /// Fails with a Conflict-class error, before touching anything, when a
    /// merge is already in progress or a work-tree file that would be
    /// replaced differs from the `HEAD` version and `options.force` is off.
    /// The index must match the `HEAD` tree as well: staged changes and
    /// leftover conflict stages would be lost when the merged index replaces
    /// it.
    pub fn merge(&self, theirs: &ObjectId, options: &MergeOptions) -> Result<MergeSummary, RepoError> {
        if self.merge_state()? == MergeState::InProgress {
            return Err(RepoError::MergeInProgress);
        }
        let work_tree = self.require_work_tree()?.to_path_buf();
        let head = self.head_oid()?.ok_or(RepoError::UnbornHead)?;

        let ours = self.tree_entries(&head)?;
        if !options.force {
            self.check_index_matches(&ours)?;
        }
        let result = merge_commits(&self.odb, &head, theirs, options)?;
        let plan = plan_worktree(&ours, &result.index, &result.conflicts);

        if !options.force {
            for action in &plan {
                let (path, expected) = match action {
                    Action::Remove { path, expected } | Action::Write { path, expected, .. } => {
                        (path.clone(), *expected)
                    }
                    Action::Conflict { index, expected } => (conflict_worktree_path(&result.conflicts[*index]), *expected),
                };
                if let Some(actual) = self.worktree_oid(&work_tree, path.as_bstr())? {
                    if Some(actual) != expected {
                        return Err(RepoError::DirtyWorkTree(path.to_string()));
                    }
                }
            }
        }

        let mut merged_index = result.index;
        merged_index.write_to(self.index_path())?;

        let mut summary = MergeSummary {
            conflicts: result.conflicts,
            updated: Vec::new(),
            removed: Vec::new(),
        };
        for action in &plan {
            if let Action::Remove { path, .. } = action {
                remove_worktree_file(&work_tree, path.as_bstr())?;
                summary.removed.push(path.clone());
            }
        }
        for action in &plan {
            match action {
                Action::Write { path, oid, mode, .. } => {
                    let data = self.odb.read(oid)?.data;
                    write_worktree_file(&work_tree, path.as_bstr(), &data, *mode)?;
                    summary.updated.push(path.clone());
                }
                Action::Conflict { index, .. } => {
                    let conflict = &summary.conflicts[*index];
                    let Some(content) = conflict_file_content(&self.odb, conflict)? else {
                        continue;
                    };
                    let mode = conflict
                        .ours
                        .as_ref()
                        .or(conflict.theirs.as_ref())
                        .map_or(FileMode::Regular, |side| side.mode);
                    let path = conflict_worktree_path(conflict);
                    write_worktree_file(&work_tree, path.as_bstr(), &content, mode)?;
                    summary.updated.push(path);
                }
                Action::Remove { .. } => {}
            }
        }

        self.refs.update(ORIG_HEAD, &head)?;
        self.refs.update(MERGE_HEAD, theirs)?;
        LockFile::write_atomic(self.git_dir.join(MERGE_MSG), merge_message(theirs, &summary.conflicts).as_bytes())?;
        let mode = if self.merge_preference == MergePreference::NoFastForward { "no-ff\n" } else { "" };
        LockFile::write_atomic(self.git_dir.join(MERGE_MODE), mode.as_bytes())?;

        tracing::debug!(
            %head,
            %theirs,
            conflicts = summary.conflicts.len(),
            updated = summary.updated.len(),
            removed = summary.removed.len(),
            "merge in progress"
        );
        Ok(summary)
    }

    /// Commit the merged index with `HEAD` and `MERGE_HEAD` as parents and
    /// move `HEAD` to it. `message` defaults to `MERGE_MSG` without its
    /// comment lines.
    pub fn commit_merge(&self, message: Option<&str>, signature: &Signature) -> Result<ObjectId, RepoError> {
        if self.merge_state()? != MergeState::InProgress {
            return Err(RepoError::NoMergeInProgress);
        }
        let mut index = self.index()?;
        if index.has_conflicts() {
            return Err(RepoError::UnresolvedConflicts(index.conflicted_paths().len()));
        }
        let tree = index.write_tree(&self.odb)?;
        index.write()?;

        let head = self.head_oid()?.ok_or(RepoError::UnbornHead)?;
        let theirs = self.refs.resolve(MERGE_HEAD)?.ok_or(RepoError::NoMergeInProgress)?;
        let message = match message {
            Some(message) => message.to_string(),
            None => stored_message(&self.git_dir)?,
        };
        let commit = self.commit_tree(&tree, &[head, theirs], &message, signature)?;
        self.set_head_target(&commit)?;
        self.finish(MergeState::Committed)?;
        Ok(commit)
    }

    /// Put the `ORIG_HEAD` tree back into the index and work tree.
    pub fn abort_merge(&self) -> Result<(), RepoError> {
        if self.merge_state()? != MergeState::InProgress {
            return Err(RepoError::NoMergeInProgress);
        }
        let orig = self
            .refs
            .resolve(ORIG_HEAD)?
            .ok_or_else(|| RepoError::RefNotFound(ORIG_HEAD.into()))?;
        let tree = self.odb.read_commit(&orig)?.tree;

        let mut index = self.index()?;
        let merged: BTreeSet<BString> = index.iter().map(|e| e.path.clone()).collect();
        index.clear();
        index.clear_resolve_undo();
        index.read_tree(&self.odb, &tree)?;
        index.write()?;

        if let Some(work_tree) = self.work_tree() {
            for path in &merged {
                if index.get(path.as_bstr(), Stage::Normal).is_none() {
                    remove_worktree_file(work_tree, path.as_bstr())?;
                }
            }
            for entry in index.iter() {
                if entry.mode.is_gitlink() || self.worktree_oid(work_tree, entry.path.as_bstr())? == Some(entry.oid) {
                    continue;
                }
                let data = self.odb.read(&entry.oid)?.data;
                write_worktree_file(work_tree, entry.path.as_bstr(), &data, entry.mode)?;
            }
        }
        self.finish(MergeState::Aborted)
    }

    /// Remove the merge state files. Returns whether there was any state
    /// to clean up.
    pub fn cleanup_state(&self) -> Result<bool, RepoError> {
        let state = self.merge_state()?;
        for name in [MERGE_HEAD, MERGE_MSG, MERGE_MODE] {
            match fs::remove_file(self.git_dir.join(name)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tracing::debug!(from = ?state, "merge state cleaned up");
        Ok(state != MergeState::None)
    }

    fn finish(&self, state: MergeState) -> Result<(), RepoError> {
        let mode = match state {
            MergeState::Committed => "committed\n",
            _ => "aborted\n",
        };
        LockFile::write_atomic(self.git_dir.join(MERGE_MODE), mode.as_bytes())?;
        self.refs.delete(MERGE_HEAD)?;
        tracing::debug!(?state, "merge finished");
        Ok(())
    }

    fn tree_entries(&self, commit: &ObjectId) -> Result<BTreeMap<BString, (ObjectId, FileMode)>, RepoError> {
        let tree = self.odb.read_commit(commit)?.tree;
        let mut index = Index::with_hash_algorithm(self.hash_algo);
        index.read_tree(&self.odb, &tree)?;
        Ok(index.into_entries().into_iter().map(|e| (e.path, (e.oid, e.mode))).collect())
    }

    /// Fail with `StagedChanges` on the first path where the index differs
    /// from `head`, conflict stages included.
    fn check_index_matches(&self, head: &BTreeMap<BString, (ObjectId, FileMode)>) -> Result<(), RepoError> {
        let index = self.index()?;
        if let Some(path) = index.conflicted_paths().first() {
            return Err(RepoError::StagedChanges(path.to_string()));
        }
        let staged: Vec<(&BString, (ObjectId, FileMode))> = index.iter().map(|e| (&e.path, (e.oid, e.mode))).collect();
        let committed: Vec<(&BString, (ObjectId, FileMode))> = head.iter().map(|(path, entry)| (path, *entry)).collect();
        if staged == committed {
            return Ok(());
        }
        let first = staged
            .iter()
            .zip(&committed)
            .find(|(s, c)| s != c)
            .map(|(s, c)| s.0.min(c.0))
            .or_else(|| staged.get(committed.len()).or_else(|| committed.get(staged.len())).map(|e| e.0));
        let path = first.map_or_else(String::new, |p| p.to_string());
        tracing::debug!(%path, "index differs from HEAD");
        Err(RepoError::StagedChanges(path))
    }

    /// Blob id of the work-tree file at `path`, if there is one.
    fn worktree_oid(&self, work_tree: &Path, path: &BStr) -> Result<Option<ObjectId>, RepoError> {
        let full = worktree_path(work_tree, path)?;
        let meta = match fs::symlink_metadata(&full) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound || !full.exists() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if meta.is_dir() {
            return Ok(Some(self.hash_algo.null_oid()));
        }
        let data = if meta.is_symlink() { link_target(&full)? } else { fs::read(&full)? };
        Ok(Some(Hasher::hash_object(self.hash_algo, "blob", &data)?))
    }
}

/// Work-tree changes that turn the `HEAD` tree into the merged index.
fn plan_worktree(
    ours: &BTreeMap<BString, (ObjectId, FileMode)>,
    merged: &Index,
    conflicts: &[ConflictEntry],
) -> Vec<Action> {
    let expected = |path: &BStr| ours.get(path).map(|(oid, _)| *oid);
    let conflicted: BTreeSet<&BStr> = conflicts.iter().map(|c| c.path.as_bstr()).collect();
    let mut plan = Vec::new();

    for (path, _) in ours {
        let gone = merged.get(path.as_bstr(), Stage::Normal).is_none() && !conflicted.contains(path.as_bstr());
        if gone {
            plan.push(Action::Remove {
                path: path.clone(),
                expected: expected(path.as_bstr()),
            });
        }
    }
    for conflict in conflicts {
        // The file moves aside so the directory can take its place.
        if conflict.conflict_type == ConflictType::DirectoryFile && ours.contains_key(&conflict.path) {
            plan.push(Action::Remove {
                path: conflict.path.clone(),
                expected: expected(conflict.path.as_bstr()),
            });
        }
    }
    for entry in merged.iter().filter(|e| e.stage == Stage::Normal && !e.mode.is_gitlink()) {
        if ours.get(&entry.path) == Some(&(entry.oid, entry.mode)) {
            continue;
        }
        plan.push(Action::Write {
            path: entry.path.clone(),
            oid: entry.oid,
            mode: entry.mode,
            expected: expected(entry.path.as_bstr()),
        });
    }
    for (index, conflict) in conflicts.iter().enumerate() {
        let expected = match conflict.conflict_type {
            ConflictType::DirectoryFile => None,
            _ => expected(conflict.path.as_bstr()),
        };
        plan.push(Action::Conflict { index, expected });
    }
    plan
}

fn merge_message(theirs: &ObjectId, conflicts: &[ConflictEntry]) -> String {
    let mut message = format!("Merge commit '{}'\n", theirs.to_hex());
    let paths: BTreeSet<&BStr> = conflicts.iter().map(|c| c.path.as_bstr()).collect();
    if !paths.is_empty() {
        message.push_str("\n# Conflicts:\n");
        for path in paths {
            message.push_str(&format!("#\t{path}\n"));
        }
    }
    message
}

fn stored_message(git_dir: &Path) -> Result<String, RepoError> {
    let raw = match fs::read_to_string(git_dir.join(MERGE_MSG)) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    let kept: Vec<&str> = raw.lines().filter(|line| !line.starts_with('#')).collect();
    Ok(kept.join("\n").trim_end().to_string())
}

fn worktree_path(work_tree: &Path, path: &BStr) -> Result<PathBuf, RepoError> {
    let rel = path
        .to_path()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, format!("path '{path}' is not valid here")))?;
    Ok(work_tree.join(rel))
}

fn remove_worktree_file(work_tree: &Path, path: &BStr) -> Result<(), RepoError> {
    let full = worktree_path(work_tree, path)?;
    match fs::remove_file(&full) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    let mut dir = full.parent();
    while let Some(d) = dir {
        if d == work_tree || fs::remove_dir(d).is_err() {
            break;
        }
        dir = d.parent();
    }
    Ok(())
}

#[cfg(unix)]
fn link_target(path: &Path) -> io::Result<Vec<u8>> {
    use std::os::unix::ffi::OsStringExt;
    Ok(fs::read_link(path)?.into_os_string().into_vec())
}

#[cfg(not(unix))]
fn link_target(path: &Path) -> io::Result<Vec<u8>> {
    Ok(fs::read_link(path)?.to_string_lossy().into_owned().into_bytes())
}
