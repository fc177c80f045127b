//! Batched resolution of abbreviated ids.

use gitcore_hash::ObjectId;
use gitcore_object::ObjectType;
use gitcore_utils::{Classify, ErrorClass};

use crate::{ObjectDatabase, OdbError};

/// One abbreviated id to resolve, optionally constrained to a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRequest {
    pub prefix: String,
    pub kind: Option<ObjectType>,
}

impl IdRequest {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            kind: None,
        }
    }

    pub fn of_kind(prefix: impl Into<String>, kind: ObjectType) -> Self {
        Self {
            prefix: prefix.into(),
            kind: Some(kind),
        }
    }
}

/// Outcome for one [`IdRequest`]. A failed item carries the null id and
/// the class of the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpandedId {
    pub id: ObjectId,
    pub kind: Option<ObjectType>,
    pub error: Option<ErrorClass>,
}

impl ExpandedId {
    pub fn is_resolved(&self) -> bool {
        self.error.is_none()
    }
}

impl ObjectDatabase {
    /// Resolve every request independently; one bad entry never fails the
    /// batch.
    pub fn expand_ids(&self, requests: &[IdRequest]) -> Vec<ExpandedId> {
        let null = self.hash_algorithm().null_oid();
        requests
            .iter()
            .map(|req| match self.expand_one(req) {
                Ok((id, kind)) => ExpandedId {
                    id,
                    kind: Some(kind),
                    error: None,
                },
                Err(e) => {
                    tracing::debug!(prefix = %req.prefix, error = %e, "could not expand id");
                    ExpandedId {
                        id: null,
                        kind: None,
                        error: Some(e.class()),
                    }
                }
            })
            .collect()
    }

    fn expand_one(&self, req: &IdRequest) -> Result<(ObjectId, ObjectType), OdbError> {
        let id = self.exists_prefix(&req.prefix)?;
        let (actual, _) = self.read_header(&id)?;
        match req.kind {
            Some(expected) if expected != actual => Err(OdbError::WrongKind {
                oid: id,
                expected,
                actual,
            }),
            _ => Ok((id, actual)),
        }
    }
}
