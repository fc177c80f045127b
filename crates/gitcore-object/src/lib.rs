//! Object model for gitcore.
//!
//! Blobs, trees, commits and tags, their canonical byte encoding, and the
//! `"<kind> <size>\0"` header that prefixes them when hashed or stored loose.

mod blob;
pub mod cache;
mod commit;
mod fields;
pub mod header;
mod tag;
mod tree;

pub use blob::Blob;
pub use cache::ObjectCache;
pub use commit::Commit;
pub use tag::Tag;
pub use tree::{cmp_tree_names, FileMode, Tree, TreeEntry};

use std::fmt;
use std::str::FromStr;

use bstr::BString;
use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, HashError, ObjectId};
use gitcore_utils::{Classify, ErrorClass};

#[derive(Debug, thiserror::Error)]
pub enum ObjectError {
    #[error("invalid object type: {0}")]
    InvalidType(BString),

    #[error("invalid object header: {0}")]
    InvalidHeader(String),

    #[error("truncated object: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("invalid tree entry at offset {offset}: {reason}")]
    InvalidTreeEntry { offset: usize, reason: &'static str },

    #[error("{kind} is missing the '{field}' header")]
    MissingField {
        kind: ObjectType,
        field: &'static str,
    },

    #[error("invalid file mode: {0}")]
    InvalidFileMode(BString),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("expected a {expected}, found a {actual}")]
    UnexpectedType {
        expected: ObjectType,
        actual: ObjectType,
    },

    #[error(transparent)]
    Hash(#[from] HashError),
}

impl Classify for ObjectError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::UnexpectedType { .. } => ErrorClass::InvalidArgument,
            Self::Hash(e) => e.class(),
            _ => ErrorClass::Corrupt,
        }
    }
}

/// The four object kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    Blob,
    Tree,
    Commit,
    Tag,
}

impl ObjectType {
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        match s {
            b"blob" => Ok(Self::Blob),
            b"tree" => Ok(Self::Tree),
            b"commit" => Ok(Self::Commit),
            b"tag" => Ok(Self::Tag),
            _ => Err(ObjectError::InvalidType(BString::from(s))),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
        }
    }

    pub fn as_bytes(self) -> &'static [u8] {
        self.name().as_bytes()
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ObjectType {
    type Err = ObjectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_bytes(s.as_bytes())
    }
}

/// Object kind plus undecoded content, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub kind: ObjectType,
    pub data: Vec<u8>,
}

impl RawObject {
    pub fn new(kind: ObjectType, data: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            data: data.into(),
        }
    }

    pub fn compute_id(&self, algo: HashAlgorithm) -> Result<ObjectId, HashError> {
        Hasher::hash_object(algo, self.kind.name(), &self.data)
    }

    pub fn decode(&self, algo: HashAlgorithm) -> Result<Object, ObjectError> {
        Object::parse_content_with(self.kind, &self.data, algo)
    }

    /// Decode, requiring the given kind.
    pub fn decode_as(&self, expected: ObjectType, algo: HashAlgorithm) -> Result<Object, ObjectError> {
        if self.kind != expected {
            return Err(ObjectError::UnexpectedType {
                expected,
                actual: self.kind,
            });
        }
        self.decode(algo)
    }
}

/// A decoded object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    Blob(Blob),
    Tree(Tree),
    Commit(Commit),
    Tag(Tag),
}

impl Object {
    /// Parse `"<kind> <size>\0<content>"`.
    pub fn parse(data: &[u8]) -> Result<Self, ObjectError> {
        let (kind, size, header_len) = header::parse_header(data)?;
        let content = &data[header_len..];
        if content.len() < size {
            return Err(ObjectError::Truncated {
                expected: size,
                actual: content.len(),
            });
        }
        Self::parse_content(kind, &content[..size])
    }

    pub fn parse_content(kind: ObjectType, content: &[u8]) -> Result<Self, ObjectError> {
        Self::parse_content_with(kind, content, HashAlgorithm::Sha1)
    }

    /// Parse content whose embedded binary ids use `algo`.
    pub fn parse_content_with(
        kind: ObjectType,
        content: &[u8],
        algo: HashAlgorithm,
    ) -> Result<Self, ObjectError> {
        Ok(match kind {
            ObjectType::Blob => Self::Blob(Blob::parse(content)),
            ObjectType::Tree => Self::Tree(Tree::parse_with(content, algo)?),
            ObjectType::Commit => Self::Commit(Commit::parse(content)?),
            ObjectType::Tag => Self::Tag(Tag::parse(content)?),
        })
    }

    /// Header plus content.
    pub fn serialize(&self) -> Vec<u8> {
        let content = self.serialize_content();
        let mut out = header::write_header(self.object_type(), content.len());
        out.extend_from_slice(&content);
        out
    }

    pub fn serialize_content(&self) -> Vec<u8> {
        match self {
            Self::Blob(b) => b.data.clone(),
            Self::Tree(t) => t.serialize_content(),
            Self::Commit(c) => c.serialize_content(),
            Self::Tag(t) => t.serialize_content(),
        }
    }

    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Blob(_) => ObjectType::Blob,
            Self::Tree(_) => ObjectType::Tree,
            Self::Commit(_) => ObjectType::Commit,
            Self::Tag(_) => ObjectType::Tag,
        }
    }

    pub fn into_raw(self) -> RawObject {
        let kind = self.object_type();
        let data = match self {
            Self::Blob(b) => b.data,
            other => other.serialize_content(),
        };
        RawObject { kind, data }
    }

    pub fn compute_oid(&self, algo: HashAlgorithm) -> Result<ObjectId, HashError> {
        Hasher::hash_object(algo, self.object_type().name(), &self.serialize_content())
    }

    pub fn as_tree(&self) -> Option<&Tree> {
        match self {
            Self::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_commit(&self) -> Option<&Commit> {
        match self {
            Self::Commit(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Self::Blob(b) => Some(b),
            _ => None,
        }
    }
}
