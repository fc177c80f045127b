//! Hunks: edit scripts cut into context-bounded regions.

use bstr::BString;

use crate::algorithm::{Edit, EditOp};

pub(crate) const NO_NEWLINE: &[u8] = b"\\ No newline at end of file\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOrigin {
    Context,
    Addition,
    Deletion,
    /// Marker after a context line lacking its final newline.
    ContextEofNl,
    AddEofNl,
    DelEofNl,
}

impl LineOrigin {
    pub fn as_char(self) -> char {
        match self {
            Self::Context => ' ',
            Self::Addition => '+',
            Self::Deletion => '-',
            Self::ContextEofNl => '=',
            Self::AddEofNl => '>',
            Self::DelEofNl => '<',
        }
    }

    pub fn is_eof_marker(self) -> bool {
        matches!(self, Self::ContextEofNl | Self::AddEofNl | Self::DelEofNl)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub origin: LineOrigin,
    /// 1-based; `None` for lines that only exist in the new side.
    pub old_lineno: Option<u32>,
    pub new_lineno: Option<u32>,
    pub content: BString,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    /// `@@ -a,b +c,d @@`
    pub header: String,
    pub lines: Vec<DiffLine>,
}

fn range(start: u32, count: u32) -> String {
    if count == 1 {
        start.to_string()
    } else {
        format!("{start},{count}")
    }
}

/// Cut `edits` into hunks with `context` lines around each change. Runs
/// of changes closer than `2 * context + interhunk` lines share a hunk.
pub(crate) fn build_hunks(
    old: &[&[u8]],
    new: &[&[u8]],
    edits: &[Edit],
    context: u32,
    interhunk: u32,
) -> Vec<Hunk> {
    let ctx = context as usize;
    let mut runs: Vec<(usize, usize)> = Vec::new();
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
        match runs.last_mut() {
            Some(last) if start - last.1 <= 2 * ctx + interhunk as usize => last.1 = i,
            _ => runs.push((start, i)),
        }
    }

    runs.into_iter()
        .map(|(start, end)| {
            let from = start.saturating_sub(ctx);
            let to = (end + ctx).min(edits.len());
            hunk(old, new, &edits[from..to])
        })
        .collect()
}

fn hunk(old: &[&[u8]], new: &[&[u8]], edits: &[Edit]) -> Hunk {
    let first = edits[0];
    let old_lines = edits.iter().filter(|e| e.op != EditOp::Insert).count() as u32;
    let new_lines = edits.iter().filter(|e| e.op != EditOp::Delete).count() as u32;
    let old_pos = first.old_index as u32;
    let new_pos = first.new_index as u32;
    let old_start = if old_lines == 0 { old_pos } else { old_pos + 1 };
    let new_start = if new_lines == 0 { new_pos } else { new_pos + 1 };

    let mut lines = Vec::with_capacity(edits.len());
    for e in edits {
        let (origin, marker, text, old_lineno, new_lineno) = match e.op {
            EditOp::Equal => (
                LineOrigin::Context,
                LineOrigin::ContextEofNl,
                old[e.old_index],
                Some(e.old_index as u32 + 1),
                Some(e.new_index as u32 + 1),
            ),
            EditOp::Delete => (
                LineOrigin::Deletion,
                LineOrigin::DelEofNl,
                old[e.old_index],
                Some(e.old_index as u32 + 1),
                None,
            ),
            EditOp::Insert => (
                LineOrigin::Addition,
                LineOrigin::AddEofNl,
                new[e.new_index],
                None,
                Some(e.new_index as u32 + 1),
            ),
        };
        lines.push(DiffLine {
            origin,
            old_lineno,
            new_lineno,
            content: BString::from(text),
        });
        if !text.ends_with(b"\n") {
            lines.push(DiffLine {
                origin: marker,
                old_lineno: None,
                new_lineno: None,
                content: BString::from(NO_NEWLINE),
            });
        }
    }

    Hunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        header: format!("@@ -{} +{} @@", range(old_start, old_lines), range(new_start, new_lines)),
        lines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::{diff_lines, split_lines};
    use crate::DiffAlgorithm;

    fn hunks(old: &[u8], new: &[u8], context: u32, interhunk: u32) -> Vec<Hunk> {
        let (a, b) = (split_lines(old), split_lines(new));
        let edits = diff_lines(&a, &b, DiffAlgorithm::Myers, false);
        build_hunks(&a, &b, &edits, context, interhunk)
    }

    #[test]
    fn zero_context_single_line_change() {
        let h = hunks(b"Second line", b"Second line is modified", 0, 0);
        assert_eq!(h.len(), 1);
        let origins: Vec<_> = h[0].lines.iter().map(|l| l.origin).collect();
        assert_eq!(
            origins,
            [LineOrigin::Deletion, LineOrigin::DelEofNl, LineOrigin::Addition, LineOrigin::AddEofNl]
        );
        assert_eq!(h[0].header, "@@ -1 +1 @@");
    }

    #[test]
    fn context_joins_nearby_changes() {
        let old = b"1\n2\n3\n4\n5\n6\n7\n8\n9\n";
        let new = b"1\nX\n3\n4\n5\n6\n7\nY\n9\n";
        assert_eq!(hunks(old, new, 1, 0).len(), 2);
        assert_eq!(hunks(old, new, 3, 0).len(), 1);
        assert_eq!(hunks(old, new, 1, 4).len(), 1);

        let h = &hunks(old, new, 1, 0)[1];
        assert_eq!((h.old_start, h.old_lines, h.new_start, h.new_lines), (7, 3, 7, 3));
        assert_eq!(h.header, "@@ -7,3 +7,3 @@");
    }

    #[test]
    fn pure_insertion_points_at_preceding_line() {
        let h = &hunks(b"a\nb\n", b"a\nnew\nb\n", 0, 0)[0];
        assert_eq!((h.old_start, h.old_lines, h.new_start, h.new_lines), (1, 0, 2, 1));
        assert_eq!(h.header, "@@ -1,0 +2 @@");
        assert_eq!(h.lines[0].new_lineno, Some(2));
    }

    #[test]
    fn new_file_from_nothing() {
        let h = &hunks(b"", b"x\ny\n", 3, 0)[0];
        assert_eq!(h.header, "@@ -0,0 +1,2 @@");
    }
}
