//! Three-way tree merge.

use std::collections::{BTreeMap, HashMap, HashSet};

use bstr::{BStr, BString, ByteSlice};
use gitcore_diff::{diff_tree_to_tree, DeltaStatus, DiffOptions, FindOptions};
use gitcore_hash::ObjectId;
use gitcore_index::{Index, IndexEntry};
use gitcore_object::{FileMode, ObjectType};
use gitcore_odb::ObjectDatabase;

use crate::conflict::record_conflict_in_index;
use crate::content::{best, merge_content, Labels};
use crate::{ConflictEntry, ConflictSide, ConflictType, MergeError, MergeFavor, MergeOptions, MergeResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Version {
    oid: ObjectId,
    mode: FileMode,
}

type Flat = BTreeMap<BString, Version>;

/// A version together with the path it has on its side.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    path: BString,
    version: Version,
}

impl Slot {
    fn side(&self) -> ConflictSide {
        ConflictSide {
            oid: self.version.oid,
            mode: self.version.mode,
            path: self.path.clone(),
        }
    }
}

/// One path of the result and the versions that feed it.
#[derive(Debug, Clone)]
struct Item {
    path: BString,
    base: Option<Slot>,
    ours: Option<Slot>,
    theirs: Option<Slot>,
}

impl Item {
    fn conflict(&self, conflict_type: ConflictType, content: Option<Vec<u8>>) -> ConflictEntry {
        ConflictEntry {
            path: self.path.clone(),
            conflict_type,
            base: self.base.as_ref().map(Slot::side),
            ours: self.ours.as_ref().map(Slot::side),
            theirs: self.theirs.as_ref().map(Slot::side),
            content,
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Clean(Version),
    Deleted,
    Conflict(ConflictEntry),
}

/// Merge `ours` and `theirs` against `ancestor` (no ancestor: unrelated
/// histories, every path counts as added).
///
/// Each path is classified: taken from the only side that changed it,
/// taken from either side when both changed it alike, content-merged when
/// both changed a file, or recorded as a conflict. Conflicts land in the
/// returned index as stages 1 to 3; with `fail_on_conflict` the first one
/// ends the merge with [`MergeError::Conflict`] instead.
pub fn merge_trees(
    odb: &ObjectDatabase,
    ancestor: Option<&ObjectId>,
    ours: &ObjectId,
    theirs: &ObjectId,
    options: &MergeOptions,
) -> Result<MergeResult, MergeError> {
    let base_files = flatten(odb, ancestor)?;
    let our_files = flatten(odb, Some(ours))?;
    let their_files = flatten(odb, Some(theirs))?;

    let (our_renames, their_renames) = match ancestor {
        Some(base) if options.find_renames => (
            renames(odb, base, ours, options.rename_threshold)?,
            renames(odb, base, theirs, options.rename_threshold)?,
        ),
        _ => (HashMap::new(), HashMap::new()),
    };

    let mut merge = TreeMerge {
        odb,
        options,
        base: &base_files,
        ours: &our_files,
        theirs: &their_files,
        taken: Default::default(),
        items: Vec::new(),
        outcomes: BTreeMap::new(),
    };
    merge.pair_renames(&our_renames, &their_renames)?;
    merge.collect_remaining();

    for item in std::mem::take(&mut merge.items) {
        let outcome = merge.resolve(&item)?;
        merge.settle(item, outcome)?;
    }
    merge.directory_file()?;
    merge.finish()
}

fn flatten(odb: &ObjectDatabase, tree: Option<&ObjectId>) -> Result<Flat, MergeError> {
    let mut out = Flat::new();
    if let Some(tree) = tree {
        walk(odb, tree, b"", &mut out)?;
    }
    Ok(out)
}

fn walk(odb: &ObjectDatabase, tree: &ObjectId, prefix: &[u8], out: &mut Flat) -> Result<(), MergeError> {
    for entry in odb.read_tree(tree)?.iter() {
        let mut path = BString::from(prefix);
        if !path.is_empty() {
            path.push(b'/');
        }
        path.extend_from_slice(&entry.name);
        if entry.mode.is_tree() {
            walk(odb, &entry.oid, &path, out)?;
        } else {
            out.insert(
                path,
                Version {
                    oid: entry.oid,
                    mode: entry.mode,
                },
            );
        }
    }
    Ok(())
}

/// Old path to new path for every rename between `base` and `side`.
fn renames(odb: &ObjectDatabase, base: &ObjectId, side: &ObjectId, threshold: u8) -> Result<HashMap<BString, BString>, MergeError> {
    let mut list = diff_tree_to_tree(odb, Some(base), Some(side), &DiffOptions::default())?;
    list.find_similar(&FindOptions {
        rename_threshold: threshold,
        ..FindOptions::default()
    })?;
    Ok(list
        .iter()
        .filter(|d| d.status == DeltaStatus::Renamed)
        .map(|d| (d.old_file.path.clone(), d.new_file.path.clone()))
        .collect())
}

#[derive(Default)]
struct Taken {
    base: HashSet<BString>,
    ours: HashSet<BString>,
    theirs: HashSet<BString>,
}

struct TreeMerge<'a> {
    odb: &'a ObjectDatabase,
    options: &'a MergeOptions,
    base: &'a Flat,
    ours: &'a Flat,
    theirs: &'a Flat,
    taken: Taken,
    items: Vec<Item>,
    outcomes: BTreeMap<BString, (Item, Outcome)>,
}

fn slot(files: &Flat, path: &BStr) -> Option<Slot> {
    files.get(path).map(|&version| Slot {
        path: path.to_owned(),
        version,
    })
}

impl TreeMerge<'_> {
    /// Line up renamed files with their counterparts on the other side.
    fn pair_renames(&mut self, ours: &HashMap<BString, BString>, theirs: &HashMap<BString, BString>) -> Result<(), MergeError> {
        let mut ours_sorted: Vec<_> = ours.iter().collect();
        ours_sorted.sort();
        for (from, to) in ours_sorted {
            let base = slot(self.base, from.as_bstr());
            let mine = slot(self.ours, to.as_bstr());
            match theirs.get(from) {
                Some(their_to) if their_to == to => {
                    self.take(from, to, to);
                    self.items.push(Item {
                        path: to.clone(),
                        base,
                        ours: mine,
                        theirs: slot(self.theirs, to.as_bstr()),
                    });
                }
                Some(their_to) => {
                    self.take(from, to, their_to);
                    let left = Item {
                        path: to.clone(),
                        base: base.clone(),
                        ours: mine,
                        theirs: None,
                    };
                    let right = Item {
                        path: their_to.clone(),
                        base,
                        ours: None,
                        theirs: slot(self.theirs, their_to.as_bstr()),
                    };
                    self.rename_rename(left, right)?;
                }
                None if self.theirs.contains_key(to) => {}
                None => match slot(self.theirs, from.as_bstr()) {
                    Some(other) => {
                        self.take(from, to, from);
                        self.items.push(Item {
                            path: to.clone(),
                            base,
                            ours: mine,
                            theirs: Some(other),
                        });
                    }
                    None => {
                        self.taken.base.insert(from.clone());
                        self.taken.ours.insert(to.clone());
                        let item = Item {
                            path: to.clone(),
                            base,
                            ours: mine,
                            theirs: None,
                        };
                        self.rename_delete(item)?;
                    }
                },
            }
        }

        let mut theirs_sorted: Vec<_> = theirs.iter().filter(|(from, _)| !ours.contains_key(*from)).collect();
        theirs_sorted.sort();
        for (from, to) in theirs_sorted {
            if self.ours.contains_key(to) {
                continue;
            }
            let base = slot(self.base, from.as_bstr());
            let renamed = slot(self.theirs, to.as_bstr());
            match slot(self.ours, from.as_bstr()) {
                Some(other) => {
                    self.take(from, from, to);
                    self.items.push(Item {
                        path: to.clone(),
                        base,
                        ours: Some(other),
                        theirs: renamed,
                    });
                }
                None => {
                    self.taken.base.insert(from.clone());
                    self.taken.theirs.insert(to.clone());
                    let item = Item {
                        path: to.clone(),
                        base,
                        ours: None,
                        theirs: renamed,
                    };
                    self.rename_delete(item)?;
                }
            }
        }
        Ok(())
    }

    fn take(&mut self, base: &BString, ours: &BString, theirs: &BString) {
        self.taken.base.insert(base.clone());
        self.taken.ours.insert(ours.clone());
        self.taken.theirs.insert(theirs.clone());
    }

    /// Every path not already claimed by a rename pairs up by name.
    fn collect_remaining(&mut self) {
        let (base, ours, theirs) = (self.base, self.ours, self.theirs);
        let mut paths: Vec<&BString> = base.keys().chain(ours.keys()).chain(theirs.keys()).collect();
        paths.sort();
        paths.dedup();
        for path in paths {
            let pick = |files: &Flat, taken: &HashSet<BString>| {
                if taken.contains(path) {
                    None
                } else {
                    slot(files, path.as_bstr())
                }
            };
            let item = Item {
                path: path.clone(),
                base: pick(base, &self.taken.base),
                ours: pick(ours, &self.taken.ours),
                theirs: pick(theirs, &self.taken.theirs),
            };
            if item.base.is_some() || item.ours.is_some() || item.theirs.is_some() {
                self.items.push(item);
            }
        }
    }

    fn rename_delete(&mut self, item: Item) -> Result<(), MergeError> {
        let keep = match self.options.favor {
            MergeFavor::Normal => None,
            MergeFavor::Union => Some(true),
            MergeFavor::Ours => Some(item.ours.is_some()),
            MergeFavor::Theirs => Some(item.theirs.is_some()),
        };
        let outcome = match keep {
            Some(true) => {
                let renamed = item.ours.as_ref().or(item.theirs.as_ref()).map(|s| s.version);
                renamed.map_or(Outcome::Deleted, Outcome::Clean)
            }
            Some(false) => Outcome::Deleted,
            None => Outcome::Conflict(item.conflict(ConflictType::RenameDelete, None)),
        };
        self.settle(item, outcome)
    }

    fn rename_rename(&mut self, left: Item, right: Item) -> Result<(), MergeError> {
        let (left_outcome, right_outcome) = match self.options.favor {
            MergeFavor::Ours => (self.kept(&left.ours), Outcome::Deleted),
            MergeFavor::Theirs => (Outcome::Deleted, self.kept(&right.theirs)),
            MergeFavor::Normal | MergeFavor::Union => (
                Outcome::Conflict(left.conflict(ConflictType::RenameRename, None)),
                Outcome::Conflict(right.conflict(ConflictType::RenameRename, None)),
            ),
        };
        self.settle(left, left_outcome)?;
        self.settle(right, right_outcome)
    }

    fn kept(&self, slot: &Option<Slot>) -> Outcome {
        slot.as_ref().map_or(Outcome::Deleted, |s| Outcome::Clean(s.version))
    }

    fn settle(&mut self, item: Item, outcome: Outcome) -> Result<(), MergeError> {
        if let Outcome::Conflict(conflict) = &outcome {
            tracing::debug!(path = %conflict.path, kind = ?conflict.conflict_type, "merge conflict");
            if self.options.fail_on_conflict {
                return Err(MergeError::Conflict {
                    path: conflict.path.clone(),
                });
            }
        }
        self.outcomes.insert(item.path.clone(), (item, outcome));
        Ok(())
    }

    fn resolve(&self, item: &Item) -> Result<Outcome, MergeError> {
        let version = |s: &Option<Slot>| s.as_ref().map(|s| s.version);
        let (b, o, t) = (version(&item.base), version(&item.ours), version(&item.theirs));
        let take = |v: Option<Version>| v.map_or(Outcome::Deleted, Outcome::Clean);

        if o == t || b == t {
            return Ok(take(o));
        }
        if b == o {
            return Ok(take(t));
        }
        let (o, t) = match (o, t) {
            (Some(o), Some(t)) => (o, t),
            // Deleted on one side, changed on the other.
            _ => {
                return Ok(match self.options.favor {
                    MergeFavor::Normal => Outcome::Conflict(item.conflict(ConflictType::ModifyDelete, None)),
                    MergeFavor::Ours => take(o),
                    MergeFavor::Theirs => take(t),
                    MergeFavor::Union => take(o.or(t)),
                });
            }
        };

        let kind = if b.is_none() { ConflictType::AddAdd } else { ConflictType::Content };
        if !(o.mode.is_file() && t.mode.is_file()) {
            let kind = if o.mode.same_content_type(t.mode) { kind } else { ConflictType::ModeConflict };
            return Ok(match self.options.favor {
                MergeFavor::Ours => Outcome::Clean(o),
                MergeFavor::Theirs => Outcome::Clean(t),
                MergeFavor::Normal | MergeFavor::Union => Outcome::Conflict(item.conflict(kind, None)),
            });
        }

        let mode = best(b.map(|v| v.mode), Some(o.mode), Some(t.mode));
        if o.oid == t.oid {
            // Same content, modes changed apart.
            return Ok(match mode {
                Some(mode) => Outcome::Clean(Version { oid: o.oid, mode }),
                None => Outcome::Conflict(item.conflict(ConflictType::ModeConflict, None)),
            });
        }

        let base_data = match b {
            Some(b) if b.mode.is_file() => self.odb.read(&b.oid)?.data,
            _ => Vec::new(),
        };
        let ours_data = self.odb.read(&o.oid)?.data;
        let theirs_data = self.odb.read(&t.oid)?.data;
        let labels = Labels::from_options(
            &self.options.file_options,
            item.base.as_ref().map(|s| s.path.as_bstr()),
            item.ours.as_ref().map_or(item.path.as_bstr(), |s| s.path.as_bstr()),
            item.theirs.as_ref().map_or(item.path.as_bstr(), |s| s.path.as_bstr()),
        );
        let merged = merge_content(&base_data, &ours_data, &theirs_data, &labels, &self.options.content_options());

        Ok(match (merged.clean, mode) {
            (true, Some(mode)) => {
                let oid = self.odb.write(ObjectType::Blob, &merged.content)?;
                tracing::trace!(path = %item.path, %oid, "auto-merged");
                Outcome::Clean(Version { oid, mode })
            }
            (true, None) => Outcome::Conflict(item.conflict(ConflictType::ModeConflict, Some(merged.content))),
            (false, _) => Outcome::Conflict(item.conflict(kind, Some(merged.content))),
        })
    }

    /// A file at `p` next to entries under `p/` cannot stand; the file
    /// becomes a directory/file conflict.
    fn directory_file(&mut self) -> Result<(), MergeError> {
        let live: Vec<BString> = self
            .outcomes
            .iter()
            .filter(|(_, (_, outcome))| !matches!(outcome, Outcome::Deleted))
            .map(|(path, _)| path.clone())
            .collect();
        for path in &live {
            let mut dir = path.clone();
            dir.push(b'/');
            let shadowed = self
                .outcomes
                .range(dir.clone()..)
                .take_while(|(p, _)| p.starts_with(dir.as_slice()))
                .any(|(_, (_, outcome))| !matches!(outcome, Outcome::Deleted));
            if !shadowed {
                continue;
            }
            if let Some((item, outcome)) = self.outcomes.remove(path) {
                let conflict = match outcome {
                    Outcome::Conflict(mut c) => {
                        c.conflict_type = ConflictType::DirectoryFile;
                        c
                    }
                    _ => item.conflict(ConflictType::DirectoryFile, None),
                };
                self.settle(item, Outcome::Conflict(conflict))?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Result<MergeResult, MergeError> {
        let mut index = Index::with_hash_algorithm(self.odb.hash_algorithm());
        let mut conflicts = Vec::new();
        for (path, (_, outcome)) in self.outcomes {
            match outcome {
                Outcome::Clean(v) => index.add(IndexEntry::new(path, v.oid, v.mode))?,
                Outcome::Deleted => {}
                Outcome::Conflict(conflict) => {
                    record_conflict_in_index(&mut index, &conflict)?;
                    conflicts.push(conflict);
                }
            }
        }
        tracing::debug!(entries = index.len(), conflicts = conflicts.len(), "tree merge finished");
        Ok(MergeResult { index, conflicts })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(odb: &ObjectDatabase, files: &[(&str, &str)]) -> ObjectId {
        let mut index = Index::new();
        for (path, content) in files {
            let entry = IndexEntry::new(*path, ObjectId::NULL_SHA1, FileMode::Regular);
            index.add_from_buffer(odb, entry, content.as_bytes()).unwrap();
        }
        index.write_tree(odb).unwrap()
    }

    #[test]
    fn flatten_walks_subtrees() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let root = tree(&odb, &[("a.txt", "a\n"), ("src/lib.rs", "lib\n"), ("src/deep/x", "x\n")]);
        let flat = flatten(&odb, Some(&root)).unwrap();
        let paths: Vec<_> = flat.keys().map(|p| p.to_string()).collect();
        assert_eq!(paths, ["a.txt", "src/deep/x", "src/lib.rs"]);
        assert!(flatten(&odb, None).unwrap().is_empty());
    }

    #[test]
    fn one_sided_changes_are_taken() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let base = tree(&odb, &[("a", "1\n"), ("b", "2\n"), ("c", "3\n")]);
        let ours = tree(&odb, &[("a", "1 ours\n"), ("b", "2\n")]);
        let theirs = tree(&odb, &[("a", "1\n"), ("b", "2\n"), ("c", "3\n"), ("d", "4\n")]);
        let mut result = merge_trees(&odb, Some(&base), &ours, &theirs, &MergeOptions::default()).unwrap();
        assert!(result.is_clean());
        let merged = result.write_tree(&odb).unwrap();
        assert_eq!(merged, tree(&odb, &[("a", "1 ours\n"), ("b", "2\n"), ("d", "4\n")]));
    }

    #[test]
    fn directory_file_collision() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let base = tree(&odb, &[("keep", "k\n")]);
        let ours = tree(&odb, &[("keep", "k\n"), ("thing", "a file\n")]);
        let theirs = tree(&odb, &[("keep", "k\n"), ("thing/inner", "in a dir\n")]);
        let result = merge_trees(&odb, Some(&base), &ours, &theirs, &MergeOptions::default()).unwrap();
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.path, "thing");
        assert_eq!(conflict.conflict_type, ConflictType::DirectoryFile);
        assert!(conflict.ours.is_some() && conflict.theirs.is_none());
        assert!(result.index.get(b"thing/inner".as_bstr(), gitcore_index::Stage::Normal).is_some());
    }
}
