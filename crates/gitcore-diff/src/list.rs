//! Delta lists between trees, the index and the work tree.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use bstr::{BStr, ByteSlice};
use gitcore_hash::hasher::Hasher;
use gitcore_hash::ObjectId;
use gitcore_index::{IgnoreRules, Index, Pathspec};
use gitcore_odb::ObjectDatabase;
use gitcore_utils::Control;

use crate::patch::{build_patch, shows_content, DiffVisitor, Patch};
use crate::rename::{self, FindOptions, SignatureSource};
use crate::side::{self, full_path, read_workdir_file, SideEntry, SideKind};
use crate::similarity::{Signature, SimilarityMetric};
use crate::{DeltaStatus, DiffDelta, DiffError, DiffFile, DiffFileFlags, DiffOptions};

type NotifyFn<'a> = Box<dyn FnMut(&DiffDelta) -> Control + 'a>;
type ProgressFn<'a> = Box<dyn FnMut(&BStr, &BStr) -> Control + 'a>;

/// Totals over a delta list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiffStats {
    pub files_changed: usize,
    pub insertions: usize,
    pub deletions: usize,
}

/// Builds delta lists, optionally reporting to callbacks on the way.
///
/// The progress callback runs before each path is compared and the notify
/// callback before each delta is inserted. Either may answer
/// [`Control::Skip`] to drop the path or [`Control::Abort`] to stop with
/// [`DiffError::Cancelled`]; an aborted diff returns no list at all.
pub struct Differ<'a> {
    odb: &'a ObjectDatabase,
    options: DiffOptions,
    notify: Option<NotifyFn<'a>>,
    progress: Option<ProgressFn<'a>>,
}

impl<'a> Differ<'a> {
    pub fn new(odb: &'a ObjectDatabase, options: DiffOptions) -> Self {
        Self {
            odb,
            options,
            notify: None,
            progress: None,
        }
    }

    pub fn on_notify(mut self, f: impl FnMut(&DiffDelta) -> Control + 'a) -> Self {
        self.notify = Some(Box::new(f));
        self
    }

    /// `f(old_path, new_path)`.
    pub fn on_progress(mut self, f: impl FnMut(&BStr, &BStr) -> Control + 'a) -> Self {
        self.progress = Some(Box::new(f));
        self
    }

    /// `None` on either side stands for the empty tree.
    pub fn tree_to_tree(&mut self, old: Option<&ObjectId>, new: Option<&ObjectId>) -> Result<DiffList<'a>, DiffError> {
        let old = side::tree_entries(self.odb, old)?;
        let new = side::tree_entries(self.odb, new)?;
        self.run(old, SideKind::Tree, new, SideKind::Tree, None)
    }

    pub fn tree_to_index(&mut self, old: Option<&ObjectId>, index: &Index) -> Result<DiffList<'a>, DiffError> {
        let old = side::tree_entries(self.odb, old)?;
        self.run(old, SideKind::Tree, side::index_entries(index), SideKind::Index, None)
    }

    pub fn index_to_workdir(&mut self, index: &Index, workdir: &Path) -> Result<DiffList<'a>, DiffError> {
        let new = side::workdir_entries(workdir)?;
        self.run(side::index_entries(index), SideKind::Index, new, SideKind::Workdir, Some(workdir))
    }

    pub fn tree_to_workdir(&mut self, old: Option<&ObjectId>, workdir: &Path) -> Result<DiffList<'a>, DiffError> {
        let old = side::tree_entries(self.odb, old)?;
        let new = side::workdir_entries(workdir)?;
        self.run(old, SideKind::Tree, new, SideKind::Workdir, Some(workdir))
    }

    fn run(
        &mut self,
        old: Vec<SideEntry>,
        old_side: SideKind,
        new: Vec<SideEntry>,
        new_side: SideKind,
        workdir: Option<&Path>,
    ) -> Result<DiffList<'a>, DiffError> {
        let pathspec = Pathspec::parse(&self.options.pathspec)?;
        let ignore = IgnoreRules::new(&self.options.ignore);
        let mut deltas = Vec::new();
        let (mut i, mut j) = (0, 0);

        loop {
            let (o, n) = match (old.get(i), new.get(j)) {
                (None, None) => break,
                (Some(o), None) => (Some(o), None),
                (None, Some(n)) => (None, Some(n)),
                (Some(o), Some(n)) => match o.path.cmp(&n.path) {
                    Ordering::Less => (Some(o), None),
                    Ordering::Greater => (None, Some(n)),
                    Ordering::Equal => (Some(o), Some(n)),
                },
            };
            i += usize::from(o.is_some());
            j += usize::from(n.is_some());

            let path = match (o, n) {
                (_, Some(e)) | (Some(e), None) => e.path.as_bstr(),
                (None, None) => break,
            };
            if !pathspec.matches(path) {
                continue;
            }
            if let Some(progress) = self.progress.as_mut() {
                let old_path = o.map_or(path, |e| e.path.as_bstr());
                match progress(old_path, path) {
                    Control::Continue => {}
                    Control::Skip => continue,
                    Control::Abort => {
                        tracing::debug!(%path, "diff stopped by progress callback");
                        return Err(DiffError::Cancelled);
                    }
                }
            }

            let Some(delta) = self.classify(o, n, new_side, workdir, &ignore)? else {
                continue;
            };
            if let Some(notify) = self.notify.as_mut() {
                match notify(&delta) {
                    Control::Continue => {}
                    Control::Skip => continue,
                    Control::Abort => {
                        tracing::debug!(%path, kept = deltas.len(), "diff stopped by notify callback");
                        return Err(DiffError::Cancelled);
                    }
                }
            }
            deltas.push(delta);
        }

        tracing::debug!(?old_side, ?new_side, deltas = deltas.len(), "diff computed");
        Ok(DiffList {
            odb: self.odb,
            deltas,
            options: self.options.clone(),
            old_side,
            new_side,
            workdir: workdir.map(Path::to_path_buf),
        })
    }

    fn classify(
        &self,
        old: Option<&SideEntry>,
        new: Option<&SideEntry>,
        new_side: SideKind,
        workdir: Option<&Path>,
        ignore: &IgnoreRules,
    ) -> Result<Option<DiffDelta>, DiffError> {
        let null = self.odb.hash_algorithm().null_oid();
        let delta = |status, old_file, new_file| {
            Some(DiffDelta {
                status,
                old_file,
                new_file,
                similarity: 0,
            })
        };

        match (old, new) {
            (None, None) => Ok(None),
            (Some(o), None) => {
                let status = if o.conflicted {
                    DeltaStatus::Conflicted
                } else {
                    DeltaStatus::Deleted
                };
                Ok(delta(status, known_file(o), DiffFile::absent(o.path.clone(), null)))
            }
            (None, Some(n)) if new_side == SideKind::Workdir => {
                let status = if ignore.is_ignored(n.path.as_bstr()) {
                    if !self.options.include_ignored {
                        return Ok(None);
                    }
                    DeltaStatus::Ignored
                } else {
                    if !self.options.include_untracked {
                        return Ok(None);
                    }
                    DeltaStatus::Untracked
                };
                Ok(delta(status, DiffFile::absent(n.path.clone(), null), unhashed_file(n, null)))
            }
            (None, Some(n)) => {
                let status = if n.conflicted {
                    DeltaStatus::Conflicted
                } else {
                    DeltaStatus::Added
                };
                Ok(delta(status, DiffFile::absent(n.path.clone(), null), known_file(n)))
            }
            (Some(o), Some(n)) => {
                let old_file = known_file(o);
                if o.conflicted || n.conflicted {
                    return Ok(delta(DeltaStatus::Conflicted, old_file, known_file(n)));
                }
                let new_file = if new_side == SideKind::Workdir {
                    match self.workdir_file(o, n, workdir)? {
                        Some(file) => file,
                        None => return Ok(delta(DeltaStatus::Unreadable, old_file, unhashed_file(n, null))),
                    }
                } else {
                    known_file(n)
                };

                let status = if !o.mode.same_content_type(n.mode) {
                    DeltaStatus::Typechange
                } else if o.id != new_file.id || o.mode != n.mode {
                    DeltaStatus::Modified
                } else if self.options.include_unmodified {
                    DeltaStatus::Unmodified
                } else {
                    return Ok(None);
                };
                Ok(delta(status, old_file, new_file))
            }
        }
    }

    /// The work-tree side of a tracked path with its id filled in: taken
    /// from the index when stat data vouches for it, hashed otherwise.
    /// `None` when the file cannot be read.
    fn workdir_file(&self, old: &SideEntry, new: &SideEntry, workdir: Option<&Path>) -> Result<Option<DiffFile>, DiffError> {
        if new.unreadable {
            return Ok(None);
        }
        let mut file = unhashed_file(new, self.odb.hash_algorithm().null_oid());
        let stat_clean = match (old.stat, new.stat) {
            (Some(a), Some(b)) => old.mode == new.mode && a.matches(&b),
            _ => false,
        };
        if old.assume_valid || stat_clean {
            file.id = old.id;
        } else {
            let Some(root) = workdir else {
                return Ok(None);
            };
            match read_workdir_file(root, new.path.as_bstr()) {
                Ok(data) => file.id = Hasher::hash_object(self.odb.hash_algorithm(), "blob", &data)?,
                Err(err) => {
                    tracing::debug!(path = %new.path, %err, "cannot read work-tree file");
                    return Ok(None);
                }
            }
        }
        file.flags |= DiffFileFlags::VALID_ID;
        Ok(Some(file))
    }
}

fn known_file(entry: &SideEntry) -> DiffFile {
    let mut file = DiffFile::present(entry.path.clone(), entry.id, entry.mode, true);
    file.size = entry.size;
    file
}

fn unhashed_file(entry: &SideEntry, null: ObjectId) -> DiffFile {
    let mut file = DiffFile::present(entry.path.clone(), null, entry.mode, false);
    file.size = entry.size;
    file
}

/// Deltas between two sides, sorted by path.
///
/// Holds on to the object database (and the work-tree root, for work-tree
/// diffs) so content can be loaded lazily for patches, stats and rename
/// detection.
pub struct DiffList<'a> {
    odb: &'a ObjectDatabase,
    deltas: Vec<DiffDelta>,
    options: DiffOptions,
    old_side: SideKind,
    new_side: SideKind,
    workdir: Option<PathBuf>,
}

impl std::fmt::Debug for DiffList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiffList")
            .field("deltas", &self.deltas)
            .field("old_side", &self.old_side)
            .field("new_side", &self.new_side)
            .finish_non_exhaustive()
    }
}

impl<'a> DiffList<'a> {
    pub fn deltas(&self) -> &[DiffDelta] {
        &self.deltas
    }

    pub fn len(&self) -> usize {
        self.deltas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DiffDelta> {
        self.deltas.iter()
    }

    pub fn get(&self, index: usize) -> Option<&DiffDelta> {
        self.deltas.get(index)
    }

    pub fn into_deltas(self) -> Vec<DiffDelta> {
        self.deltas
    }

    pub fn options(&self) -> &DiffOptions {
        &self.options
    }

    fn content(&self, file: &DiffFile, side: SideKind) -> Result<Vec<u8>, DiffError> {
        if !file.exists() {
            return Ok(Vec::new());
        }
        if file.mode.is_some_and(|m| m.is_gitlink()) {
            return Ok(format!("Subproject commit {}\n", file.id.to_hex()).into_bytes());
        }
        match (side, &self.workdir) {
            (SideKind::Workdir, Some(root)) => Ok(read_workdir_file(root, file.path.as_bstr())?),
            _ if file.id.is_null() => Ok(Vec::new()),
            _ => Ok(self.odb.read(&file.id)?.data),
        }
    }

    /// Hunks for the delta at `index`.
    pub fn patch(&self, index: usize) -> Result<Patch, DiffError> {
        let delta = self.deltas.get(index).ok_or(DiffError::NoSuchDelta {
            index,
            len: self.deltas.len(),
        })?;
        if !shows_content(delta.status) {
            return Ok(build_patch(delta.clone(), &[], &[], &self.options));
        }
        let old = self.content(&delta.old_file, self.old_side)?;
        let new = self.content(&delta.new_file, self.new_side)?;
        Ok(build_patch(delta.clone(), &old, &new, &self.options))
    }

    pub fn patches(&self) -> impl Iterator<Item = Result<Patch, DiffError>> + '_ {
        (0..self.deltas.len()).map(|i| self.patch(i))
    }

    pub fn stats(&self) -> Result<DiffStats, DiffError> {
        let mut stats = DiffStats::default();
        for (i, delta) in self.deltas.iter().enumerate() {
            if matches!(
                delta.status,
                DeltaStatus::Unmodified | DeltaStatus::Ignored | DeltaStatus::Untracked
            ) {
                continue;
            }
            stats.files_changed += 1;
            let (_, added, deleted) = self.patch(i)?.line_stats();
            stats.insertions += added;
            stats.deletions += deleted;
        }
        Ok(stats)
    }

    pub fn to_patch_text(&self) -> Result<String, DiffError> {
        let mut out = String::new();
        for patch in self.patches() {
            out.push_str(&patch?.to_text());
        }
        Ok(out)
    }

    /// Walk every patch with `visitor`.
    pub fn foreach(&self, visitor: &mut dyn DiffVisitor) -> Result<(), DiffError> {
        for patch in self.patches() {
            patch?.visit(visitor)?;
        }
        Ok(())
    }

    /// Turn delete/add pairs into renames and copies.
    pub fn find_similar(&mut self, options: &FindOptions) -> Result<(), DiffError> {
        let deltas = std::mem::take(&mut self.deltas);
        let before = deltas.len();
        let found = rename::find_similar(deltas, options, &*self)?;
        tracing::debug!(before, after = found.len(), "similarity detection finished");
        self.deltas = found;
        Ok(())
    }
}

impl SignatureSource for DiffList<'_> {
    fn signature(&self, metric: &dyn SimilarityMetric, file: &DiffFile, old_side: bool) -> Result<Signature, DiffError> {
        let side = if old_side { self.old_side } else { self.new_side };
        if let (SideKind::Workdir, Some(root)) = (side, &self.workdir) {
            return Ok(metric.file_signature(file, &full_path(root, file.path.as_bstr()))?);
        }
        let data = self.content(file, side)?;
        Ok(metric.buffer_signature(file, &data))
    }
}

impl<'l, 'a> IntoIterator for &'l DiffList<'a> {
    type Item = &'l DiffDelta;
    type IntoIter = std::slice::Iter<'l, DiffDelta>;

    fn into_iter(self) -> Self::IntoIter {
        self.deltas.iter()
    }
}

pub fn diff_tree_to_tree<'a>(
    odb: &'a ObjectDatabase,
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
    options: &DiffOptions,
) -> Result<DiffList<'a>, DiffError> {
    Differ::new(odb, options.clone()).tree_to_tree(old, new)
}

pub fn diff_tree_to_index<'a>(
    odb: &'a ObjectDatabase,
    old: Option<&ObjectId>,
    index: &Index,
    options: &DiffOptions,
) -> Result<DiffList<'a>, DiffError> {
    Differ::new(odb, options.clone()).tree_to_index(old, index)
}

pub fn diff_index_to_workdir<'a>(
    odb: &'a ObjectDatabase,
    index: &Index,
    workdir: &Path,
    options: &DiffOptions,
) -> Result<DiffList<'a>, DiffError> {
    Differ::new(odb, options.clone()).index_to_workdir(index, workdir)
}

pub fn diff_tree_to_workdir<'a>(
    odb: &'a ObjectDatabase,
    old: Option<&ObjectId>,
    workdir: &Path,
    options: &DiffOptions,
) -> Result<DiffList<'a>, DiffError> {
    Differ::new(odb, options.clone()).tree_to_workdir(old, workdir)
}
