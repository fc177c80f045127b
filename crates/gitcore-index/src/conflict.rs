//! Conflict bookkeeping: stages 1 to 3 and the resolve-undo record.

use bstr::{BStr, BString, ByteSlice};

use crate::entry::IndexEntry;
use crate::extensions::ResolveUndoEntry;
use crate::{validate_path, Index, IndexError, Stage};

/// The three sides of one conflicted path; a missing side had no file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conflict {
    pub ancestor: Option<IndexEntry>,
    pub ours: Option<IndexEntry>,
    pub theirs: Option<IndexEntry>,
}

impl Conflict {
    pub fn path(&self) -> Option<&BStr> {
        [&self.ancestor, &self.ours, &self.theirs]
            .into_iter()
            .flatten()
            .map(|e| e.path.as_bstr())
            .next()
    }
}

impl Index {
    pub fn has_conflicts(&self) -> bool {
        self.entries.iter().any(IndexEntry::is_conflict)
    }

    /// Distinct conflicted paths, sorted.
    pub fn conflicted_paths(&self) -> Vec<&BStr> {
        let mut paths: Vec<&BStr> = self
            .entries
            .iter()
            .filter(|e| e.is_conflict())
            .map(|e| e.path.as_bstr())
            .collect();
        paths.dedup();
        paths
    }

    /// Record a conflict for one path. Each given entry is stored at the
    /// stage of its position; the stage-0 entry for the path is removed.
    pub fn add_conflict(
        &mut self,
        ancestor: Option<IndexEntry>,
        ours: Option<IndexEntry>,
        theirs: Option<IndexEntry>,
    ) -> Result<(), IndexError> {
        let sides = [
            (Stage::Ancestor, ancestor),
            (Stage::Ours, ours),
            (Stage::Theirs, theirs),
        ];
        let path: BString = sides
            .iter()
            .find_map(|(_, e)| e.as_ref().map(|e| e.path.clone()))
            .ok_or(IndexError::ConflictPathMismatch)?;
        if sides.iter().flat_map(|(_, e)| e).any(|e| e.path != path) {
            return Err(IndexError::ConflictPathMismatch);
        }
        validate_path(path.as_bstr())?;

        self.remove_path(path.as_bstr());
        for (stage, entry) in sides {
            if let Some(mut entry) = entry {
                entry.stage = stage;
                self.add(entry)?;
            }
        }
        tracing::trace!(path = %path, "recorded conflict");
        Ok(())
    }

    pub fn get_conflict(&self, path: &BStr) -> Option<Conflict> {
        let mut conflict = Conflict::default();
        for entry in self.get_all(path) {
            let slot = match entry.stage {
                Stage::Normal => continue,
                Stage::Ancestor => &mut conflict.ancestor,
                Stage::Ours => &mut conflict.ours,
                Stage::Theirs => &mut conflict.theirs,
            };
            *slot = Some(entry.clone());
        }
        conflict.path().is_some().then_some(conflict)
    }

    /// Every conflict, in path order.
    pub fn conflicts(&self) -> Vec<Conflict> {
        self.conflicted_paths()
            .into_iter()
            .filter_map(|p| self.get_conflict(p))
            .collect()
    }

    /// Drop the conflict stages of `path` without recording them anywhere.
    pub fn remove_conflict(&mut self, path: &BStr) -> Result<(), IndexError> {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.is_conflict() && e.path == path));
        if self.entries.len() == before {
            return Err(IndexError::NotFound(path.to_owned()));
        }
        self.invalidate(path);
        Ok(())
    }

    /// Drop every conflict stage in the index.
    pub fn cleanup_conflicts(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.is_conflict());
        let removed = before - self.entries.len();
        if removed > 0 {
            self.cache_tree = None;
        }
        removed
    }

    /// Move the conflict stages of `path` into the resolve-undo record.
    pub(crate) fn resolve(&mut self, path: &BStr) {
        let Some(conflict) = self.get_conflict(path) else {
            return;
        };
        let side = |e: &Option<IndexEntry>| e.as_ref().map(|e| (e.mode, e.oid));
        self.resolve_undo.record(ResolveUndoEntry {
            path: path.to_owned(),
            stages: [side(&conflict.ancestor), side(&conflict.ours), side(&conflict.theirs)],
        });
        self.entries.retain(|e| !(e.is_conflict() && e.path == path));
        tracing::trace!(path = %path, "conflict resolved");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_hash::{HashAlgorithm, ObjectId};
    use gitcore_object::FileMode;

    fn side(path: &str, fill: u8) -> IndexEntry {
        IndexEntry::new(
            path,
            ObjectId::from_bytes(&[fill; 20], HashAlgorithm::Sha1).unwrap(),
            FileMode::Regular,
        )
    }

    #[test]
    fn conflict_round_trip() {
        let mut index = Index::new();
        index.add(side("f", 9)).unwrap();
        index
            .add_conflict(Some(side("f", 1)), None, Some(side("f", 3)))
            .unwrap();

        assert!(index.has_conflicts());
        assert!(index.get(BStr::new("f"), Stage::Normal).is_none());
        let c = index.get_conflict(BStr::new("f")).unwrap();
        assert_eq!(c.ancestor.unwrap().stage, Stage::Ancestor);
        assert!(c.ours.is_none());
        assert_eq!(c.theirs.unwrap().oid.as_bytes()[0], 3);

        index.remove_conflict(BStr::new("f")).unwrap();
        assert!(!index.has_conflicts());
        assert!(index.remove_conflict(BStr::new("f")).is_err());
    }

    #[test]
    fn sides_must_agree_on_path() {
        let mut index = Index::new();
        let err = index
            .add_conflict(Some(side("a", 1)), Some(side("b", 2)), None)
            .unwrap_err();
        assert!(matches!(err, IndexError::ConflictPathMismatch));
        assert!(index.add_conflict(None, None, None).is_err());
    }

    #[test]
    fn staging_a_resolution_fills_resolve_undo() {
        let mut index = Index::new();
        index
            .add_conflict(Some(side("f", 1)), Some(side("f", 2)), Some(side("f", 3)))
            .unwrap();
        index.add(side("f", 4)).unwrap();

        assert!(!index.has_conflicts());
        assert_eq!(index.len(), 1);
        let undo = index.resolve_undo().get(BStr::new("f")).unwrap();
        assert_eq!(undo.stages[1].unwrap().1.as_bytes()[0], 2);
    }

    #[test]
    fn cleanup_removes_all_stages() {
        let mut index = Index::new();
        index.add(side("clean", 5)).unwrap();
        index.add_conflict(None, Some(side("x", 1)), Some(side("x", 2))).unwrap();
        index.add_conflict(Some(side("y", 1)), Some(side("y", 2)), None).unwrap();
        assert_eq!(index.conflicted_paths().len(), 2);
        assert_eq!(index.conflicts().len(), 2);
        assert_eq!(index.cleanup_conflicts(), 4);
        assert!(!index.has_conflicts());
        assert_eq!(index.len(), 1);
    }
}
