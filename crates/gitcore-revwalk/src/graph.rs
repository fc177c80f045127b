use std::collections::HashMap;
use std::rc::Rc;

use gitcore_hash::ObjectId;
use gitcore_odb::ObjectDatabase;
use gitcore_utils::{Classify, ErrorClass};

use crate::RevWalkError;

/// What graph queries need from a commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitNode {
    pub parents: Vec<ObjectId>,
    /// Committer timestamp, seconds since the epoch.
    pub time: i64,
}

/// Read-through cache of commit nodes over an object database.
pub struct CommitGraph<'a> {
    odb: &'a ObjectDatabase,
    nodes: HashMap<ObjectId, Rc<CommitNode>>,
}

impl<'a> CommitGraph<'a> {
    pub fn new(odb: &'a ObjectDatabase) -> Self {
        Self {
            odb,
            nodes: HashMap::new(),
        }
    }

    pub fn odb(&self) -> &'a ObjectDatabase {
        self.odb
    }

    /// Number of commits decoded so far.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&mut self, oid: &ObjectId) -> Result<Rc<CommitNode>, RevWalkError> {
        if let Some(node) = self.nodes.get(oid) {
            return Ok(Rc::clone(node));
        }
        let commit = self.odb.read_commit(oid).map_err(|e| match e.class() {
            ErrorClass::NotFound => RevWalkError::CommitNotFound(*oid),
            _ => RevWalkError::Odb(e),
        })?;
        let node = Rc::new(CommitNode {
            parents: commit.parents,
            time: commit.committer.date.timestamp,
        });
        self.nodes.insert(*oid, Rc::clone(&node));
        Ok(node)
    }

    pub fn time(&mut self, oid: &ObjectId) -> Result<i64, RevWalkError> {
        Ok(self.node(oid)?.time)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use gitcore_hash::ObjectId;
    use gitcore_object::{Commit, ObjectType};
    use gitcore_odb::ObjectDatabase;
    use gitcore_utils::date::{GitDate, Signature};

    pub fn commit(odb: &ObjectDatabase, parents: &[ObjectId], time: i64) -> ObjectId {
        let tree = odb.write(ObjectType::Tree, b"").unwrap();
        let sig = Signature::new("Graph Test", "graph@example.com", GitDate::new(time, 0));
        let commit = Commit {
            tree,
            parents: parents.to_vec(),
            author: sig.clone(),
            committer: sig,
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message: format!("commit at {time}\n").into(),
        };
        odb.write(ObjectType::Commit, &commit.serialize_content()).unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::commit;
    use super::*;

    #[test]
    fn nodes_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let root = commit(&odb, &[], 100);
        let child = commit(&odb, &[root], 200);

        let mut graph = CommitGraph::new(&odb);
        let node = graph.node(&child).unwrap();
        assert_eq!(node.parents, [root]);
        assert_eq!(node.time, 200);
        assert_eq!(graph.time(&root).unwrap(), 100);
        assert_eq!(graph.len(), 2);
        graph.node(&child).unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn missing_commit_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let odb = ObjectDatabase::open(dir.path()).unwrap();
        let mut graph = CommitGraph::new(&odb);
        let err = graph.node(&ObjectId::NULL_SHA1).unwrap_err();
        assert!(matches!(err, RevWalkError::CommitNotFound(_)));
        assert_eq!(err.class(), ErrorClass::NotFound);
    }
}
