//! Commit graph queries.
//!
//! [`CommitGraph`] caches the parents and committer time of every commit it
//! reads, so repeated queries over the same history (a merge computing its
//! bases, then recursing into them) decode each commit once.

mod graph;
mod merge_base;

pub use graph::{CommitGraph, CommitNode};

use gitcore_hash::ObjectId;
use gitcore_odb::{ObjectDatabase, OdbError};
use gitcore_utils::{Classify, ErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum RevWalkError {
    #[error("commit not found: {0}")]
    CommitNotFound(ObjectId),

    #[error(transparent)]
    Odb(#[from] OdbError),
}

impl Classify for RevWalkError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::CommitNotFound(_) => ErrorClass::NotFound,
            Self::Odb(e) => e.class(),
        }
    }
}

/// Lowest common ancestors of `a` and `b`, newest first.
pub fn merge_bases(odb: &ObjectDatabase, a: &ObjectId, b: &ObjectId) -> Result<Vec<ObjectId>, RevWalkError> {
    CommitGraph::new(odb).merge_bases(a, b)
}

/// The first of [`merge_bases`], if any.
pub fn merge_base(odb: &ObjectDatabase, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>, RevWalkError> {
    CommitGraph::new(odb).merge_base(a, b)
}

pub fn is_ancestor(odb: &ObjectDatabase, ancestor: &ObjectId, descendant: &ObjectId) -> Result<bool, RevWalkError> {
    CommitGraph::new(odb).is_ancestor(ancestor, descendant)
}

/// `(ahead, behind)`: commits only reachable from `local`, and commits
/// only reachable from `upstream`.
pub fn ahead_behind(odb: &ObjectDatabase, local: &ObjectId, upstream: &ObjectId) -> Result<(usize, usize), RevWalkError> {
    CommitGraph::new(odb).ahead_behind(local, upstream)
}
