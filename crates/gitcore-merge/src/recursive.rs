//! Commit merges and virtual merge bases.
//!
//! Two commits with several best common ancestors (criss-cross history)
//! get one synthetic base: the candidates are merged pairwise, each pair
//! against its own merge base, and the result is written as a commit that
//! exists only to serve as the base.

use bstr::ByteSlice;
use gitcore_hash::ObjectId;
use gitcore_object::{Commit, ObjectType};
use gitcore_odb::ObjectDatabase;
use gitcore_revwalk::CommitGraph;

use crate::conflict::resolve_conflict;
use crate::tree::merge_trees;
use crate::{ConflictType, MergeError, MergeFavor, MergeOptions, MergeResult};

/// Merge commit `theirs` into commit `ours`.
pub fn merge_commits(
    odb: &ObjectDatabase,
    ours: &ObjectId,
    theirs: &ObjectId,
    options: &MergeOptions,
) -> Result<MergeResult, MergeError> {
    let mut graph = CommitGraph::new(odb);
    let base = base_commit(odb, &mut graph, ours, theirs, options, 0)?;
    let base_tree = base.map(|b| odb.read_commit(&b).map(|c| c.tree)).transpose()?;
    let ours_tree = odb.read_commit(ours)?.tree;
    let theirs_tree = odb.read_commit(theirs)?.tree;
    tracing::debug!(%ours, %theirs, base = ?base, "merging commits");
    merge_trees(odb, base_tree.as_ref(), &ours_tree, &theirs_tree, options)
}

/// The commit to merge against: the single merge base, a virtual one
/// folded from several, or none for unrelated histories.
fn base_commit(
    odb: &ObjectDatabase,
    graph: &mut CommitGraph<'_>,
    ours: &ObjectId,
    theirs: &ObjectId,
    options: &MergeOptions,
    depth: usize,
) -> Result<Option<ObjectId>, MergeError> {
    let bases = graph.merge_bases(ours, theirs)?;
    let Some((first, rest)) = bases.split_first() else {
        return Ok(None);
    };
    if rest.is_empty() {
        return Ok(Some(*first));
    }
    if depth >= options.recursion_limit {
        tracing::warn!(candidates = bases.len(), depth, base = %first, "recursion limit reached, using newest merge base");
        return Ok(Some(*first));
    }

    let mut acc = *first;
    for next in rest {
        let inner = base_commit(odb, graph, &acc, next, options, depth + 1)?;
        acc = virtual_commit(odb, inner, &acc, next, options)?;
    }
    tracing::debug!(candidates = bases.len(), depth, virtual_base = %acc, "folded merge bases");
    Ok(Some(acc))
}

/// Merge `one` and `two` against `base` and store the result as a commit.
/// Conflicts are kept rather than reported: marker text where a content
/// merge produced it, otherwise the first side's version.
fn virtual_commit(
    odb: &ObjectDatabase,
    base: Option<ObjectId>,
    one: &ObjectId,
    two: &ObjectId,
    options: &MergeOptions,
) -> Result<ObjectId, MergeError> {
    let first = odb.read_commit(one)?;
    let second = odb.read_commit(two)?;
    let base_tree = base.map(|b| odb.read_commit(&b).map(|c| c.tree)).transpose()?;

    let mut inner = options.clone();
    inner.fail_on_conflict = false;
    inner.favor = MergeFavor::Normal;
    inner.file_options.favor = MergeFavor::Normal;
    inner.file_options.our_label = Some("Temporary merge branch 1".into());
    inner.file_options.their_label = Some("Temporary merge branch 2".into());
    let merged = merge_trees(odb, base_tree.as_ref(), &first.tree, &second.tree, &inner)?;
    let tree = settle_conflicts(odb, merged)?;

    let committer = if second.committer.date.timestamp > first.committer.date.timestamp {
        second.committer
    } else {
        first.committer
    };
    let commit = Commit {
        tree,
        parents: vec![*one, *two],
        author: committer.clone(),
        committer,
        encoding: None,
        gpgsig: None,
        extra_headers: Vec::new(),
        message: "merged common ancestors\n".into(),
    };
    Ok(odb.write(ObjectType::Commit, &commit.serialize_content())?)
}

fn settle_conflicts(odb: &ObjectDatabase, merged: MergeResult) -> Result<ObjectId, MergeError> {
    let MergeResult { mut index, conflicts } = merged;
    for conflict in &conflicts {
        let path = conflict.path.as_bstr();
        let side = conflict.ours.as_ref().or(conflict.theirs.as_ref());
        match (&conflict.content, side) {
            _ if conflict.conflict_type == ConflictType::DirectoryFile => {
                index.remove_path(path);
            }
            (Some(content), Some(side)) => {
                let oid = odb.write(ObjectType::Blob, content)?;
                resolve_conflict(&mut index, path, oid, side.mode)?;
            }
            (None, Some(side)) => resolve_conflict(&mut index, path, side.oid, side.mode)?,
            (_, None) => {
                index.remove_path(path);
            }
        }
    }
    Ok(index.write_tree(odb)?)
}
