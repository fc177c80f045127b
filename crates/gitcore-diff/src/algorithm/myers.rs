//! Myers' O(ND) difference algorithm, linear-space variant.
//!
//! The search runs forward and backward at once to find a middle snake,
//! then recurses on both halves. Without `minimal`, lines that appear on
//! only one side are set aside first: they can never match, and dropping
//! them shrinks the search on files with many unique edits.

use std::collections::HashSet;

use super::{push_gap, Edit};

pub fn diff(old: &[u32], new: &[u32], minimal: bool) -> Vec<Edit> {
    let mut edits = Vec::with_capacity(old.len().max(new.len()));
    if minimal {
        compare(old, 0, old.len(), new, 0, new.len(), &mut edits);
    } else {
        with_discards(old, new, &mut edits);
    }
    edits
}

fn with_discards(old: &[u32], new: &[u32], edits: &mut Vec<Edit>) {
    let in_new: HashSet<u32> = new.iter().copied().collect();
    let in_old: HashSet<u32> = old.iter().copied().collect();
    let keep_old: Vec<usize> = (0..old.len()).filter(|&i| in_new.contains(&old[i])).collect();
    let keep_new: Vec<usize> = (0..new.len()).filter(|&j| in_old.contains(&new[j])).collect();
    if keep_old.len() == old.len() && keep_new.len() == new.len() {
        compare(old, 0, old.len(), new, 0, new.len(), edits);
        return;
    }

    let a: Vec<u32> = keep_old.iter().map(|&i| old[i]).collect();
    let b: Vec<u32> = keep_new.iter().map(|&j| new[j]).collect();
    let mut inner = Vec::new();
    compare(&a, 0, a.len(), &b, 0, b.len(), &mut inner);

    let (mut x, mut y) = (0, 0);
    for e in inner {
        match e.op {
            super::EditOp::Equal => {
                let (ox, ny) = (keep_old[e.old_index], keep_new[e.new_index]);
                push_gap(edits, x, ox, y, ny);
                edits.push(Edit::equal(ox, ny));
                x = ox + 1;
                y = ny + 1;
            }
            super::EditOp::Delete => {
                let ox = keep_old[e.old_index];
                push_gap(edits, x, ox + 1, y, y);
                x = ox + 1;
            }
            super::EditOp::Insert => {
                let ny = keep_new[e.new_index];
                push_gap(edits, x, x, y, ny + 1);
                y = ny + 1;
            }
        }
    }
    push_gap(edits, x, old.len(), y, new.len());
}

fn compare(a: &[u32], mut a_lo: usize, mut a_hi: usize, b: &[u32], mut b_lo: usize, mut b_hi: usize, edits: &mut Vec<Edit>) {
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

    if a_lo == a_hi || b_lo == b_hi {
        push_gap(edits, a_lo, a_hi, b_lo, b_hi);
    } else {
        let snake = middle_snake(&a[a_lo..a_hi], &b[b_lo..b_hi]);
        let (x0, y0) = (a_lo + snake.x0, b_lo + snake.y0);
        let (x1, y1) = (a_lo + snake.x1, b_lo + snake.y1);
        compare(a, a_lo, x0, b, b_lo, y0, edits);
        edits.extend((0..x1 - x0).map(|i| Edit::equal(x0 + i, y0 + i)));
        compare(a, x1, a_hi, b, y1, b_hi, edits);
    }

    edits.extend((0..suffix).map(|i| Edit::equal(a_hi + i, b_hi + i)));
}

struct Snake {
    x0: usize,
    y0: usize,
    x1: usize,
    y1: usize,
}

/// Both inputs are non-empty and differ at their first and last lines.
fn middle_snake(a: &[u32], b: &[u32]) -> Snake {
    let n = a.len() as isize;
    let m = b.len() as isize;
    let delta = n - m;
    let odd = delta & 1 != 0;
    let max = (n + m + 1) / 2;
    let offset = max + 1;
    let size = (2 * max + 3) as usize;
    let mut forward = vec![0isize; size];
    let mut backward = vec![0isize; size];
    let at = |k: isize| (k + offset) as usize;

    for d in 0..=max {
        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && forward[at(k - 1)] < forward[at(k + 1)]) {
                forward[at(k + 1)]
            } else {
                forward[at(k - 1)] + 1
            };
            let mut y = x - k;
            let (sx, sy) = (x, y);
            while x < n && y < m && a[x as usize] == b[y as usize] {
                x += 1;
                y += 1;
            }
            forward[at(k)] = x;
            let rk = delta - k;
            if odd && rk >= -(d - 1) && rk <= d - 1 && x + backward[at(rk)] >= n {
                return Snake { x0: sx as usize, y0: sy as usize, x1: x as usize, y1: y as usize };
            }
            k += 2;
        }

        let mut k = -d;
        while k <= d {
            let mut x = if k == -d || (k != d && backward[at(k - 1)] < backward[at(k + 1)]) {
                backward[at(k + 1)]
            } else {
                backward[at(k - 1)] + 1
            };
            let mut y = x - k;
            let (sx, sy) = (x, y);
            while x < n && y < m && a[(n - 1 - x) as usize] == b[(m - 1 - y) as usize] {
                x += 1;
                y += 1;
            }
            backward[at(k)] = x;
            let fk = delta - k;
            if !odd && fk >= -d && fk <= d && x + forward[at(fk)] >= n {
                return Snake {
                    x0: (n - x) as usize,
                    y0: (m - y) as usize,
                    x1: (n - sx) as usize,
                    y1: (m - sy) as usize,
                };
            }
            k += 2;
        }
    }
    // Unreachable for valid input: the paths must meet by d = max.
    Snake { x0: 0, y0: 0, x1: 0, y1: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{apply, EditOp};

    fn count(edits: &[Edit], op: EditOp) -> usize {
        edits.iter().filter(|e| e.op == op).count()
    }

    #[test]
    fn identical() {
        let edits = diff(&[1, 2, 3], &[1, 2, 3], false);
        assert_eq!(edits, vec![Edit::equal(0, 0), Edit::equal(1, 1), Edit::equal(2, 2)]);
    }

    #[test]
    fn all_different() {
        let edits = diff(&[1, 2], &[3, 4], false);
        assert_eq!(count(&edits, EditOp::Delete), 2);
        assert_eq!(count(&edits, EditOp::Insert), 2);
    }

    #[test]
    fn insert_and_delete() {
        let edits = diff(&[1, 2], &[1, 2, 3], true);
        assert_eq!((count(&edits, EditOp::Insert), count(&edits, EditOp::Equal)), (1, 2));
        let edits = diff(&[1, 2, 3], &[1, 3], true);
        assert_eq!((count(&edits, EditOp::Delete), count(&edits, EditOp::Equal)), (1, 2));
    }

    #[test]
    fn empty_sides() {
        assert_eq!(count(&diff(&[], &[1, 2], false), EditOp::Insert), 2);
        assert_eq!(count(&diff(&[1, 2], &[], false), EditOp::Delete), 2);
        assert!(diff(&[], &[], true).is_empty());
    }

    #[test]
    fn minimal_finds_shortest_script() {
        // a b c a b b a -> c b a b a c (the paper's example, D = 5)
        let a = [1, 2, 3, 1, 2, 2, 1];
        let b = [3, 2, 1, 2, 1, 3];
        let edits = diff(&a, &b, true);
        assert_eq!(count(&edits, EditOp::Delete) + count(&edits, EditOp::Insert), 5);
        assert_eq!(apply(&a, &b, &edits), b);
    }

    #[test]
    fn discards_keep_the_script_valid() {
        let a = [1, 9, 2, 8, 3, 7];
        let b = [1, 2, 6, 3, 5];
        let edits = diff(&a, &b, false);
        assert_eq!(apply(&a, &b, &edits), b);
        assert_eq!(count(&edits, EditOp::Equal), 3);
    }
}
