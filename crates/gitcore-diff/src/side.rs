//! Flattening trees, the index and the work tree into path-sorted entries.

use std::fs;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice, ByteVec};
use gitcore_hash::ObjectId;
use gitcore_index::{Index, Stage, StatData};
use gitcore_object::FileMode;
use gitcore_odb::ObjectDatabase;

use crate::DiffError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SideKind {
    Tree,
    Index,
    Workdir,
}

#[derive(Debug, Clone)]
pub(crate) struct SideEntry {
    pub path: BString,
    pub mode: FileMode,
    /// Null for work-tree files until hashed.
    pub id: ObjectId,
    pub size: u64,
    /// Index entries only.
    pub stat: Option<StatData>,
    pub assume_valid: bool,
    pub conflicted: bool,
    /// Work-tree entries whose metadata could not be read.
    pub unreadable: bool,
}

impl SideEntry {
    fn new(path: BString, mode: FileMode, id: ObjectId) -> Self {
        Self {
            path,
            mode,
            id,
            size: 0,
            stat: None,
            assume_valid: false,
            conflicted: false,
            unreadable: false,
        }
    }
}

/// Every blob and gitlink reachable from `tree`, depth first.
pub(crate) fn tree_entries(odb: &ObjectDatabase, tree: Option<&ObjectId>) -> Result<Vec<SideEntry>, DiffError> {
    let mut out = Vec::new();
    if let Some(oid) = tree {
        collect_tree(odb, oid, BStr::new(""), &mut out)?;
    }
    out.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(out)
}

fn collect_tree(odb: &ObjectDatabase, oid: &ObjectId, prefix: &BStr, out: &mut Vec<SideEntry>) -> Result<(), DiffError> {
    let tree = odb.read_tree(oid)?;
    for entry in tree.iter() {
        let mut path = BString::from(prefix.as_bytes());
        if !path.is_empty() {
            path.push(b'/');
        }
        path.push_str(&entry.name);
        if entry.mode.is_tree() {
            collect_tree(odb, &entry.oid, path.as_bstr(), out)?;
        } else {
            out.push(SideEntry::new(path, entry.mode, entry.oid));
        }
    }
    Ok(())
}

/// Stage-0 entries plus one conflicted entry per path with higher stages.
/// A conflicted entry carries the "ours" stage when present.
pub(crate) fn index_entries(index: &Index) -> Vec<SideEntry> {
    let mut out: Vec<SideEntry> = Vec::with_capacity(index.len());
    for e in index.iter() {
        if e.stage == Stage::Normal {
            let mut side = SideEntry::new(e.path.clone(), e.mode, e.oid);
            side.size = u64::from(e.stat.size);
            side.stat = Some(e.stat);
            side.assume_valid = e.flags.assume_valid;
            out.push(side);
            continue;
        }
        match out.last_mut() {
            Some(last) if last.path == e.path && last.conflicted => {
                if e.stage == Stage::Ours {
                    last.mode = e.mode;
                    last.id = e.oid;
                }
            }
            _ => {
                let mut side = SideEntry::new(e.path.clone(), e.mode, e.oid);
                side.conflicted = true;
                out.push(side);
            }
        }
    }
    out
}

/// Files under `root` with modes from their metadata. Ids stay null; the
/// comparison hashes content only when stat data cannot vouch for it.
pub(crate) fn workdir_entries(root: &Path) -> Result<Vec<SideEntry>, DiffError> {
    let paths = gitcore_index::walk_worktree(root)?;
    let mut out = Vec::with_capacity(paths.len());
    for path in paths {
        let full = full_path(root, path.as_bstr());
        let mut side = SideEntry::new(path, FileMode::Regular, ObjectId::NULL_SHA1);
        match fs::symlink_metadata(&full) {
            Ok(meta) => {
                side.mode = FileMode::from_stat_mode(StatData::mode_of(&meta));
                side.size = meta.len();
                side.stat = Some(StatData::from_metadata(&meta));
            }
            Err(err) => {
                tracing::debug!(path = %side.path, %err, "unreadable work-tree file");
                side.unreadable = true;
            }
        }
        out.push(side);
    }
    Ok(out)
}

pub(crate) fn full_path(root: &Path, path: &BStr) -> PathBuf {
    match path.to_path() {
        Ok(rel) => root.join(rel),
        Err(_) => root.join(path.to_str_lossy().as_ref()),
    }
}

/// Content as stored in a blob: symlinks become their target text.
pub(crate) fn read_workdir_file(root: &Path, path: &BStr) -> std::io::Result<Vec<u8>> {
    let full = full_path(root, path);
    let meta = fs::symlink_metadata(&full)?;
    if meta.file_type().is_symlink() {
        Ok(Vec::from_path_lossy(&fs::read_link(&full)?).into_owned())
    } else {
        fs::read(&full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_index::IndexEntry;
    use gitcore_object::{ObjectType, Tree, TreeEntry};

    #[test]
    fn tree_entries_are_flattened_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let blob = odb.write(ObjectType::Blob, b"x\n").unwrap();
        let sub = Tree {
            entries: vec![TreeEntry {
                mode: FileMode::Regular,
                name: "inner".into(),
                oid: blob,
            }],
        };
        let sub_id = odb.write(ObjectType::Tree, &sub.serialize_content()).unwrap();
        let mut entries = vec![
            TreeEntry {
                mode: FileMode::Tree,
                name: "a".into(),
                oid: sub_id,
            },
            TreeEntry {
                mode: FileMode::Regular,
                name: "a.txt".into(),
                oid: blob,
            },
        ];
        entries.sort_by(TreeEntry::cmp_entries);
        let root = Tree { entries };
        let root_id = odb.write(ObjectType::Tree, &root.serialize_content()).unwrap();

        let flat = tree_entries(&odb, Some(&root_id)).unwrap();
        let paths: Vec<_> = flat.iter().map(|e| e.path.to_string()).collect();
        assert_eq!(paths, ["a.txt", "a/inner"]);
        assert!(tree_entries(&odb, None).unwrap().is_empty());
    }

    #[test]
    fn conflicts_collapse_to_one_entry() {
        let ours = ObjectId::from_bytes(&[2; 20], gitcore_hash::HashAlgorithm::Sha1).unwrap();
        let mut index = Index::new();
        index.add(IndexEntry::new("clean", ObjectId::NULL_SHA1, FileMode::Regular)).unwrap();
        index
            .add(IndexEntry::new("c", ObjectId::NULL_SHA1, FileMode::Regular).with_stage(Stage::Ancestor))
            .unwrap();
        index.add(IndexEntry::new("c", ours, FileMode::Regular).with_stage(Stage::Ours)).unwrap();
        index
            .add(IndexEntry::new("c", ObjectId::NULL_SHA1, FileMode::Regular).with_stage(Stage::Theirs))
            .unwrap();

        let flat = index_entries(&index);
        assert_eq!(flat.len(), 2);
        assert!(flat[0].conflicted);
        assert_eq!(flat[0].id, ours);
        assert!(!flat[1].conflicted);
    }
}
