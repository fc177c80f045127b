//! Index extensions: `TREE`, `REUC`, and anything else carried verbatim.

mod resolve_undo;
mod tree;

pub use resolve_undo::{ResolveUndo, ResolveUndoEntry};
pub use tree::{CacheTree, CacheTreeNode};

/// An optional extension this crate does not interpret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExtension {
    pub signature: [u8; 4],
    pub data: Vec<u8>,
}

/// Extensions whose signature starts with `A`..`Z` may be ignored by
/// readers that do not understand them.
pub fn is_optional(signature: &[u8; 4]) -> bool {
    signature[0].is_ascii_uppercase()
}

pub(crate) fn read_cstr<'a>(
    data: &'a [u8],
    cursor: &mut usize,
    signature: &[u8],
    what: &str,
) -> Result<&'a [u8], crate::IndexError> {
    let rest = data.get(*cursor..).unwrap_or_default();
    let nul = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| crate::IndexError::extension(signature, format!("unterminated {what}")))?;
    *cursor += nul + 1;
    Ok(&rest[..nul])
}

pub(crate) fn read_oid(
    data: &[u8],
    cursor: &mut usize,
    algo: gitcore_hash::HashAlgorithm,
    signature: &[u8],
) -> Result<gitcore_hash::ObjectId, crate::IndexError> {
    let len = algo.digest_len();
    let bytes = data
        .get(*cursor..*cursor + len)
        .ok_or_else(|| crate::IndexError::extension(signature, "truncated object id"))?;
    *cursor += len;
    Ok(gitcore_hash::ObjectId::from_bytes(bytes, algo)?)
}
