//! Converting between the stage-0 entries and tree objects.

use bstr::{BString, ByteSlice};
use gitcore_hash::ObjectId;
use gitcore_object::{FileMode, ObjectType, Tree, TreeEntry};
use gitcore_odb::ObjectDatabase;

use crate::entry::IndexEntry;
use crate::extensions::{CacheTree, CacheTreeNode};
use crate::{Index, IndexError};

impl Index {
    /// Write the stage-0 entries as a tree graph and return the root id.
    ///
    /// Fails with `Unmerged` while any conflict stage remains. Directories
    /// whose cached id is still valid are not rewritten; afterwards the
    /// cache covers the whole tree.
    pub fn write_tree(&mut self, odb: &ObjectDatabase) -> Result<ObjectId, IndexError> {
        let unmerged = self.conflicted_paths().len();
        if unmerged > 0 {
            return Err(IndexError::Unmerged(unmerged));
        }
        let entries: Vec<&IndexEntry> = self.entries.iter().filter(|e| !e.flags.intent_to_add).collect();
        let cached = self.cache_tree.as_ref().map(|t| &t.root);
        let root = build(&entries, 0, b"", cached, odb)?;
        let oid = root.oid.ok_or_else(|| IndexError::BadHeader("root tree has no id".into()))?;
        tracing::debug!(%oid, entries = entries.len(), "wrote tree from index");
        self.cache_tree = Some(CacheTree { root });
        Ok(oid)
    }

    /// Replace every entry with the contents of `tree`, recursively.
    pub fn read_tree(&mut self, odb: &ObjectDatabase, tree: &ObjectId) -> Result<(), IndexError> {
        let mut entries = Vec::new();
        let root = collect(odb, tree, b"", BString::default(), &mut entries)?;
        self.entries = entries;
        self.cache_tree = Some(CacheTree { root });
        tracing::debug!(%tree, entries = self.entries.len(), "read tree into index");
        Ok(())
    }
}

fn build(
    entries: &[&IndexEntry],
    base: usize,
    name: &[u8],
    cached: Option<&CacheTreeNode>,
    odb: &ObjectDatabase,
) -> Result<CacheTreeNode, IndexError> {
    if let Some(node) = cached {
        if node.is_valid() && node.entry_count as usize == entries.len() {
            return Ok(node.clone());
        }
    }

    let mut tree = Tree::new();
    let mut children = Vec::new();
    let mut i = 0;
    while i < entries.len() {
        let rel = &entries[i].path[base..];
        match rel.find_byte(b'/') {
            Some(slash) => {
                let dir = &rel[..=slash];
                let end = i + entries[i..]
                    .iter()
                    .take_while(|e| e.path[base..].starts_with(dir))
                    .count();
                let dir_name = &dir[..slash];
                let cached_child = cached.and_then(|c| c.children.iter().find(|n| n.name == dir_name));
                let child = build(&entries[i..end], base + slash + 1, dir_name, cached_child, odb)?;
                if let Some(oid) = child.oid {
                    tree.entries.push(TreeEntry::new(FileMode::Tree, dir_name, oid));
                }
                children.push(child);
                i = end;
            }
            None => {
                tree.entries.push(TreeEntry::new(entries[i].mode, rel, entries[i].oid));
                i += 1;
            }
        }
    }
    let mut names: Vec<&[u8]> = tree.entries.iter().map(|e| e.name.as_slice()).collect();
    names.sort_unstable();
    if let Some(pair) = names.windows(2).find(|pair| pair[0] == pair[1]) {
        return Err(IndexError::DuplicateTreeEntry {
            dir: BString::from(&entries[0].path[..base]),
            name: BString::from(pair[0]),
        });
    }
    tree.sort();
    let oid = odb.write(ObjectType::Tree, &tree.serialize_content())?;
    Ok(CacheTreeNode {
        name: BString::from(name),
        entry_count: entries.len() as i32,
        oid: Some(oid),
        children,
    })
}

fn collect(
    odb: &ObjectDatabase,
    tree_id: &ObjectId,
    name: &[u8],
    prefix: BString,
    out: &mut Vec<IndexEntry>,
) -> Result<CacheTreeNode, IndexError> {
    let tree = odb.read_tree(tree_id)?;
    let first = out.len();
    let mut children = Vec::new();
    for entry in &tree.entries {
        let mut path = prefix.clone();
        path.extend_from_slice(&entry.name);
        if entry.mode.is_tree() {
            path.push(b'/');
            children.push(collect(odb, &entry.oid, &entry.name, path, out)?);
        } else {
            out.push(IndexEntry::new(path, entry.oid, entry.mode));
        }
    }
    Ok(CacheTreeNode {
        name: BString::from(name),
        entry_count: (out.len() - first) as i32,
        oid: Some(*tree_id),
        children,
    })
}
