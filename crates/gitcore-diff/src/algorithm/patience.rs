//! Patience diff.
//!
//! Lines that occur exactly once on each side anchor the alignment: the
//! longest run of such lines appearing in the same order on both sides is
//! kept, and the gaps between anchors are diffed recursively. Gaps with no
//! unique lines fall back to Myers.

use std::collections::HashMap;

use super::{myers, push_gap, Edit};

const MAX_DEPTH: usize = 64;

pub fn diff(old: &[u32], new: &[u32]) -> Vec<Edit> {
    let mut edits = Vec::with_capacity(old.len().max(new.len()));
    recurse(old, 0, old.len(), new, 0, new.len(), &mut edits, 0);
    edits
}

#[allow(clippy::too_many_arguments)]
fn recurse(
    a: &[u32],
    mut a_lo: usize,
    mut a_hi: usize,
    b: &[u32],
    mut b_lo: usize,
    mut b_hi: usize,
    edits: &mut Vec<Edit>,
    depth: usize,
) {
    while a_lo < a_hi && b_lo < b_hi && a[a_lo] == b[b_lo] {
        edits.push(Edit::equal(a_lo, b_lo));
        a_lo += 1;
        b_lo += 1;
    }
    let mut suffix = 0;
    while a_lo < a_hi && b_lo < b_hi && a[a_hi - 1] == b[b_hi - 1] {
        a_hi -= 1;
        b_hi -= 1;
        suffix += 1;
    }

    let anchors = if a_lo == a_hi || b_lo == b_hi || depth >= MAX_DEPTH {
        Vec::new()
    } else {
        longest_increasing(&unique_matches(&a[a_lo..a_hi], &b[b_lo..b_hi]))
    };

    if a_lo == a_hi || b_lo == b_hi {
        push_gap(edits, a_lo, a_hi, b_lo, b_hi);
    } else if anchors.is_empty() {
        let inner = myers::diff(&a[a_lo..a_hi], &b[b_lo..b_hi], false);
        edits.extend(inner.into_iter().map(|e| Edit {
            old_index: e.old_index + a_lo,
            new_index: e.new_index + b_lo,
            ..e
        }));
    } else {
        let (mut x, mut y) = (a_lo, b_lo);
        for (i, j) in anchors {
            let (i, j) = (a_lo + i, b_lo + j);
            recurse(a, x, i, b, y, j, edits, depth + 1);
            edits.push(Edit::equal(i, j));
            x = i + 1;
            y = j + 1;
        }
        recurse(a, x, a_hi, b, y, b_hi, edits, depth + 1);
    }

    edits.extend((0..suffix).map(|i| Edit::equal(a_hi + i, b_hi + i)));
}

/// Pairs `(i, j)` of tokens occurring once in `a` and once in `b`, ordered
/// by `i`.
fn unique_matches(a: &[u32], b: &[u32]) -> Vec<(usize, usize)> {
    // token -> (count in a, index in a, count in b, index in b)
    let mut seen: HashMap<u32, (u32, usize, u32, usize)> = HashMap::new();
    for (i, &t) in a.iter().enumerate() {
        let slot = seen.entry(t).or_insert((0, i, 0, 0));
        slot.0 += 1;
    }
    for (j, &t) in b.iter().enumerate() {
        if let Some(slot) = seen.get_mut(&t) {
            slot.2 += 1;
            slot.3 = j;
        }
    }
    let mut matches: Vec<(usize, usize)> = seen
        .into_values()
        .filter(|&(ca, _, cb, _)| ca == 1 && cb == 1)
        .map(|(_, i, _, j)| (i, j))
        .collect();
    matches.sort_unstable();
    matches
}

/// Longest subsequence of `matches` whose `j` values increase, found by
/// patience sorting.
fn longest_increasing(matches: &[(usize, usize)]) -> Vec<(usize, usize)> {
    // Each pile keeps the index (into `matches`) of its top card.
    let mut tops: Vec<usize> = Vec::new();
    let mut prev: Vec<Option<usize>> = vec![None; matches.len()];
    for (idx, &(_, j)) in matches.iter().enumerate() {
        let pile = tops.partition_point(|&t| matches[t].1 < j);
        if pile > 0 {
            prev[idx] = Some(tops[pile - 1]);
        }
        if pile == tops.len() {
            tops.push(idx);
        } else {
            tops[pile] = idx;
        }
    }

    let mut out = Vec::with_capacity(tops.len());
    let mut cursor = tops.last().copied();
    while let Some(idx) = cursor {
        out.push(matches[idx]);
        cursor = prev[idx];
    }
    out.reverse();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{apply, EditOp};

    #[test]
    fn anchors_follow_unique_lines() {
        let m = unique_matches(&[1, 2, 2, 3, 4], &[4, 3, 2, 1]);
        assert_eq!(m, vec![(0, 3), (3, 1), (4, 0)]);
        assert_eq!(longest_increasing(&[(0, 3), (1, 1), (2, 2), (3, 0), (4, 4)]), vec![(1, 1), (2, 2), (4, 4)]);
    }

    #[test]
    fn moved_function_keeps_braces_aligned() {
        // fn a { x } fn b { y }  ->  fn b { y } fn a { x }
        let a = [10, 1, 11, 2, 20, 1, 21, 2];
        let b = [20, 1, 21, 2, 10, 1, 11, 2];
        let edits = diff(&a, &b);
        assert_eq!(apply(&a, &b, &edits), b);
        assert!(edits.iter().filter(|e| e.op == EditOp::Equal).count() >= 4);
    }

    #[test]
    fn falls_back_without_unique_lines() {
        let a = [1, 1, 2, 2];
        let b = [2, 2, 1, 1];
        let edits = diff(&a, &b);
        assert_eq!(apply(&a, &b, &edits), b);
    }

    #[test]
    fn empty_sides() {
        assert!(diff(&[], &[]).is_empty());
        assert_eq!(diff(&[], &[7]), vec![Edit::insert(0, 0)]);
        assert_eq!(diff(&[7], &[]), vec![Edit::delete(0, 0)]);
    }
}
