//! Line-level diff algorithms.
//!
//! Inputs are split into lines and interned to integer tokens, so the
//! algorithms compare `u32`s rather than byte slices. Equal tokens mean
//! equal lines under the active comparison (exact, or with whitespace
//! ignored).

pub mod myers;
pub mod patience;

use std::collections::HashMap;

use crate::DiffAlgorithm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOp {
    Equal,
    Insert,
    Delete,
}

/// One step of an edit script. `old_index` is meaningful for `Equal` and
/// `Delete`, `new_index` for `Equal` and `Insert`; the other index records
/// the position in that sequence where the edit happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edit {
    pub op: EditOp,
    pub old_index: usize,
    pub new_index: usize,
}

impl Edit {
    pub(crate) fn equal(old_index: usize, new_index: usize) -> Self {
        Self { op: EditOp::Equal, old_index, new_index }
    }

    pub(crate) fn delete(old_index: usize, new_index: usize) -> Self {
        Self { op: EditOp::Delete, old_index, new_index }
    }

    pub(crate) fn insert(old_index: usize, new_index: usize) -> Self {
        Self { op: EditOp::Insert, old_index, new_index }
    }
}

/// Split into lines, each keeping its terminating `\n`. A final line
/// without one is kept as is.
pub fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    data.split_inclusive(|&b| b == b'\n').collect()
}

/// Line with every ASCII whitespace byte removed.
pub fn strip_whitespace(line: &[u8]) -> Vec<u8> {
    line.iter().copied().filter(|b| !b.is_ascii_whitespace()).collect()
}

/// Map both line lists to shared tokens.
pub fn intern(old: &[&[u8]], new: &[&[u8]], ignore_whitespace: bool) -> (Vec<u32>, Vec<u32>) {
    let mut table: HashMap<Vec<u8>, u32> = HashMap::new();
    let mut token = |line: &[u8]| {
        let key = if ignore_whitespace { strip_whitespace(line) } else { line.to_vec() };
        let next = table.len() as u32;
        *table.entry(key).or_insert(next)
    };
    let a = old.iter().map(|&l| token(l)).collect();
    let b = new.iter().map(|&l| token(l)).collect();
    (a, b)
}

/// Edit script turning `old` into `new`.
pub fn diff_tokens(old: &[u32], new: &[u32], algorithm: DiffAlgorithm) -> Vec<Edit> {
    let edits = match algorithm {
        DiffAlgorithm::Myers => myers::diff(old, new, false),
        DiffAlgorithm::Minimal => myers::diff(old, new, true),
        DiffAlgorithm::Patience => patience::diff(old, new),
    };
    normalize(edits)
}

/// Edit script between two line lists.
pub fn diff_lines(old: &[&[u8]], new: &[&[u8]], algorithm: DiffAlgorithm, ignore_whitespace: bool) -> Vec<Edit> {
    let (a, b) = intern(old, new, ignore_whitespace);
    diff_tokens(&a, &b, algorithm)
}

/// Within each run of changes, deletions come before insertions.
fn normalize(mut edits: Vec<Edit>) -> Vec<Edit> {
    let mut i = 0;
    while i < edits.len() {
        if edits[i].op == EditOp::Equal {
            i += 1;
            continue;
        }
        let start = i;
        while i < edits.len() && edits[i].op != EditOp::Equal {
            i += 1;
        }
        edits[start..i].sort_by_key(|e| match e.op {
            EditOp::Delete => (0, e.old_index),
            _ => (1, e.new_index),
        });
    }
    edits
}

/// Emit `old[from_old..to_old]` as deletions and `new[from_new..to_new]` as
/// insertions.
pub(crate) fn push_gap(edits: &mut Vec<Edit>, from_old: usize, to_old: usize, from_new: usize, to_new: usize) {
    edits.extend((from_old..to_old).map(|i| Edit::delete(i, from_new)));
    edits.extend((from_new..to_new).map(|j| Edit::insert(to_old, j)));
}

#[cfg(test)]
pub(crate) fn apply(old: &[u32], new: &[u32], edits: &[Edit]) -> Vec<u32> {
    let mut out = Vec::new();
    for e in edits {
        match e.op {
            EditOp::Equal => {
                assert_eq!(old[e.old_index], new[e.new_index]);
                out.push(old[e.old_index]);
            }
            EditOp::Insert => out.push(new[e.new_index]),
            EditOp::Delete => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_keeps_terminators() {
        assert!(split_lines(b"").is_empty());
        assert_eq!(split_lines(b"a\nb"), vec![b"a\n".as_slice(), b"b"]);
        assert_eq!(split_lines(b"a\n\n"), vec![b"a\n".as_slice(), b"\n"]);
    }

    #[test]
    fn whitespace_insensitive_tokens() {
        let old = split_lines(b"a b\nc\n");
        let new = split_lines(b"ab\n c\n");
        let (a, b) = intern(&old, &new, true);
        assert_eq!(a, b);
        let (a, b) = intern(&old, &new, false);
        assert_ne!(a, b);
    }

    #[test]
    fn deletions_lead_each_change_run() {
        for algorithm in [DiffAlgorithm::Myers, DiffAlgorithm::Minimal, DiffAlgorithm::Patience] {
            let edits = diff_tokens(&[1, 2, 3], &[1, 4, 3], algorithm);
            let ops: Vec<_> = edits.iter().map(|e| e.op).collect();
            assert_eq!(ops, [EditOp::Equal, EditOp::Delete, EditOp::Insert, EditOp::Equal]);
        }
    }
}
