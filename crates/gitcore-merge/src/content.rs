//! Three-way file merge.
//!
//! Ancestor→ours and ancestor→theirs are diffed line by line and turned
//! into change regions over the ancestor. Regions from the two sides that
//! overlap or touch form one chunk: a chunk changed by one side takes that
//! side, a chunk both sides changed the same way takes either, anything
//! else is a conflict. Text outside every chunk is copied from ours.

use bstr::{BStr, BString, ByteSlice};
use gitcore_diff::algorithm::{diff_lines, split_lines, strip_whitespace, Edit, EditOp};
use gitcore_diff::binary::is_binary;
use gitcore_index::IndexEntry;
use gitcore_object::FileMode;
use gitcore_odb::ObjectDatabase;

use crate::{ConflictStyle, MergeError, MergeFavor, MergeFileOptions};

/// One version of a file taking part in a merge.
#[derive(Debug, Clone, Copy)]
pub struct MergeFileInput<'a> {
    pub content: &'a [u8],
    pub path: Option<&'a BStr>,
    pub mode: Option<FileMode>,
}

impl<'a> MergeFileInput<'a> {
    pub fn new(content: &'a [u8]) -> Self {
        Self {
            content,
            path: None,
            mode: None,
        }
    }

    pub fn with_path(mut self, path: &'a BStr, mode: FileMode) -> Self {
        self.path = Some(path);
        self.mode = Some(mode);
        self
    }
}

/// Result of [`merge_files`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeFileResult {
    /// True when no conflict markers were needed.
    pub automergeable: bool,
    /// The merged path, `None` when the sides renamed it differently.
    pub path: Option<BString>,
    /// The merged mode, `None` when the sides disagree.
    pub mode: Option<FileMode>,
    pub content: Vec<u8>,
}

/// Merge three versions of a file. A missing ancestor merges as empty.
pub fn merge_files(
    ancestor: Option<&MergeFileInput<'_>>,
    ours: &MergeFileInput<'_>,
    theirs: &MergeFileInput<'_>,
    options: &MergeFileOptions,
) -> Result<MergeFileResult, MergeError> {
    if options.marker_size == 0 {
        return Err(MergeError::InvalidMarkerSize);
    }
    let labels = Labels {
        ancestor: label(options.ancestor_label.as_deref(), ancestor.and_then(|a| a.path)),
        ours: label(options.our_label.as_deref(), ours.path),
        theirs: label(options.their_label.as_deref(), theirs.path),
    };
    let base = ancestor.map_or(&b""[..], |a| a.content);
    let merged = merge_content(base, ours.content, theirs.content, &labels, options);

    let path = best(ancestor.and_then(|a| a.path), ours.path, theirs.path).map(BStr::to_owned);
    let mode = best(ancestor.and_then(|a| a.mode), ours.mode, theirs.mode).or_else(|| match (ancestor, ours.mode, theirs.mode) {
        (None, Some(o), Some(t)) if o.is_file() && t.is_file() => Some(FileMode::Executable),
        _ => None,
    });
    Ok(MergeFileResult {
        automergeable: merged.clean,
        path,
        mode,
        content: merged.content,
    })
}

/// Merge the blobs named by three index entries. Labels default to the
/// entries' paths.
pub fn merge_file_from_index(
    odb: &ObjectDatabase,
    ancestor: Option<&IndexEntry>,
    ours: &IndexEntry,
    theirs: &IndexEntry,
    options: &MergeFileOptions,
) -> Result<MergeFileResult, MergeError> {
    let ancestor_data = ancestor.map(|e| odb.read(&e.oid)).transpose()?;
    let ours_data = odb.read(&ours.oid)?;
    let theirs_data = odb.read(&theirs.oid)?;

    let ancestor_input = match (ancestor, &ancestor_data) {
        (Some(entry), Some(raw)) => Some(MergeFileInput::new(&raw.data).with_path(entry.path.as_bstr(), entry.mode)),
        _ => None,
    };
    let ours_input = MergeFileInput::new(&ours_data.data).with_path(ours.path.as_bstr(), ours.mode);
    let theirs_input = MergeFileInput::new(&theirs_data.data).with_path(theirs.path.as_bstr(), theirs.mode);
    merge_files(ancestor_input.as_ref(), &ours_input, &theirs_input, options)
}

/// With an ancestor, the side that changed wins; without one, the sides
/// must agree.
pub(crate) fn best<T: PartialEq + Copy>(ancestor: Option<T>, ours: Option<T>, theirs: Option<T>) -> Option<T> {
    match ancestor {
        None => (ours == theirs).then_some(ours).flatten(),
        Some(a) if ours == Some(a) => theirs,
        Some(a) if theirs == Some(a) => ours,
        Some(_) => (ours == theirs).then_some(ours).flatten(),
    }
}

fn label(explicit: Option<&str>, path: Option<&BStr>) -> Option<String> {
    explicit
        .map(str::to_owned)
        .or_else(|| path.map(|p| p.to_str_lossy().into_owned()))
}

/// Marker labels for the three sides.
#[derive(Debug, Clone, Default)]
pub(crate) struct Labels {
    pub ancestor: Option<String>,
    pub ours: Option<String>,
    pub theirs: Option<String>,
}

impl Labels {
    pub(crate) fn from_options(options: &MergeFileOptions, ancestor: Option<&BStr>, ours: &BStr, theirs: &BStr) -> Self {
        Self {
            ancestor: label(options.ancestor_label.as_deref(), ancestor),
            ours: label(options.our_label.as_deref(), Some(ours)),
            theirs: label(options.their_label.as_deref(), Some(theirs)),
        }
    }
}

pub(crate) struct Merged {
    pub content: Vec<u8>,
    pub clean: bool,
}

/// Line-level three-way merge of raw contents.
pub(crate) fn merge_content(
    base: &[u8],
    ours: &[u8],
    theirs: &[u8],
    labels: &Labels,
    options: &MergeFileOptions,
) -> Merged {
    if ours == theirs || base == theirs {
        return Merged { content: ours.to_vec(), clean: true };
    }
    if base == ours {
        return Merged { content: theirs.to_vec(), clean: true };
    }
    if is_binary(base) || is_binary(ours) || is_binary(theirs) {
        tracing::debug!("binary content, no line merge");
        return match options.favor {
            MergeFavor::Theirs => Merged { content: theirs.to_vec(), clean: true },
            MergeFavor::Ours => Merged { content: ours.to_vec(), clean: true },
            MergeFavor::Normal | MergeFavor::Union => Merged { content: ours.to_vec(), clean: false },
        };
    }

    let base_lines = split_lines(base);
    let ours_lines = split_lines(ours);
    let theirs_lines = split_lines(theirs);
    let ours_regions = regions(&diff_lines(&base_lines, &ours_lines, options.algorithm, options.ignore_whitespace));
    let theirs_regions = regions(&diff_lines(&base_lines, &theirs_lines, options.algorithm, options.ignore_whitespace));

    let mut writer = Writer {
        out: Vec::with_capacity(ours.len().max(theirs.len())),
        options,
        labels,
        conflicts: 0,
    };
    let (mut b, mut o, mut t) = (0usize, 0usize, 0usize);
    let (mut i, mut j) = (0usize, 0usize);
    while i < ours_regions.len() || j < theirs_regions.len() {
        let start = match (ours_regions.get(i), theirs_regions.get(j)) {
            (Some(x), Some(y)) => x.base_start.min(y.base_start),
            (Some(x), None) => x.base_start,
            (None, Some(y)) => y.base_start,
            (None, None) => break,
        };
        let (i0, j0) = (i, j);
        let mut end = start;
        loop {
            if let Some(r) = ours_regions.get(i).filter(|r| r.base_start <= end) {
                end = end.max(r.base_end);
                i += 1;
            } else if let Some(r) = theirs_regions.get(j).filter(|r| r.base_start <= end) {
                end = end.max(r.base_end);
                j += 1;
            } else {
                break;
            }
        }

        // Unchanged text up to the chunk.
        let gap = start - b;
        writer.lines(&ours_lines[o..o + gap]);
        o += gap;
        t += gap;

        let oe = if i > i0 { side_end(&ours_regions[i - 1], end) } else { o + (end - start) };
        let te = if j > j0 { side_end(&theirs_regions[j - 1], end) } else { t + (end - start) };
        let (our_part, their_part) = (&ours_lines[o..oe], &theirs_lines[t..te]);

        if j == j0 {
            writer.lines(our_part);
        } else if i == i0 || same_lines(our_part, their_part, options.ignore_whitespace) {
            writer.lines(if i == i0 { their_part } else { our_part });
        } else {
            writer.conflict(&base_lines[start..end], our_part, their_part);
        }
        b = end;
        o = oe;
        t = te;
    }
    writer.lines(&ours_lines[o..]);

    tracing::trace!(conflicts = writer.conflicts, "merged content");
    Merged {
        clean: writer.conflicts == 0,
        content: writer.out,
    }
}

/// A run of changed lines: `base[base_start..base_end]` became
/// `side[side_start..side_end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Region {
    base_start: usize,
    base_end: usize,
    side_start: usize,
    side_end: usize,
}

fn regions(edits: &[Edit]) -> Vec<Region> {
    let mut out = Vec::new();
    let (mut bi, mut si) = (0usize, 0usize);
    let mut current: Option<Region> = None;
    for edit in edits {
        if edit.op == EditOp::Equal {
            out.extend(current.take());
            bi += 1;
            si += 1;
            continue;
        }
        let region = current.get_or_insert(Region {
            base_start: bi,
            base_end: bi,
            side_start: si,
            side_end: si,
        });
        match edit.op {
            EditOp::Delete => {
                bi += 1;
                region.base_end = bi;
            }
            EditOp::Insert => {
                si += 1;
                region.side_end = si;
            }
            EditOp::Equal => {}
        }
    }
    out.extend(current);
    out
}

/// Side position matching base position `end`, past the region's end.
fn side_end(last: &Region, end: usize) -> usize {
    last.side_end + (end - last.base_end)
}

fn same_lines(a: &[&[u8]], b: &[&[u8]], ignore_whitespace: bool) -> bool {
    if !ignore_whitespace {
        return a == b;
    }
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| strip_whitespace(x) == strip_whitespace(y))
}

struct Writer<'a> {
    out: Vec<u8>,
    options: &'a MergeFileOptions,
    labels: &'a Labels,
    conflicts: usize,
}

impl Writer<'_> {
    fn lines(&mut self, lines: &[&[u8]]) {
        for line in lines {
            self.out.extend_from_slice(line);
        }
    }

    /// Like `lines`, but leaves the output ending in a newline.
    fn block(&mut self, lines: &[&[u8]]) {
        self.lines(lines);
        if !lines.is_empty() && self.out.last() != Some(&b'\n') {
            self.out.push(b'\n');
        }
    }

    fn marker(&mut self, ch: u8, label: Option<&str>) {
        self.out.extend(std::iter::repeat(ch).take(self.options.marker_size));
        if let Some(label) = label {
            self.out.push(b' ');
            self.out.extend_from_slice(label.as_bytes());
        }
        self.out.push(b'\n');
    }

    fn conflict(&mut self, base: &[&[u8]], ours: &[&[u8]], theirs: &[&[u8]]) {
        match self.options.favor {
            MergeFavor::Ours => return self.lines(ours),
            MergeFavor::Theirs => return self.lines(theirs),
            MergeFavor::Union => {
                self.block(ours);
                return self.lines(theirs);
            }
            MergeFavor::Normal => {}
        }
        self.conflicts += 1;

        let (mut ours, mut theirs) = (ours, theirs);
        let mut suffix: &[&[u8]] = &[];
        if self.options.style == ConflictStyle::ZDiff3 {
            let head = ours.iter().zip(theirs).take_while(|(a, b)| a == b).count();
            self.lines(&ours[..head]);
            ours = &ours[head..];
            theirs = &theirs[head..];
            let tail = ours.iter().rev().zip(theirs.iter().rev()).take_while(|(a, b)| a == b).count();
            suffix = &ours[ours.len() - tail..];
            ours = &ours[..ours.len() - tail];
            theirs = &theirs[..theirs.len() - tail];
        }

        let labels = self.labels;
        self.marker(b'<', labels.ours.as_deref());
        self.block(ours);
        if self.options.style != ConflictStyle::Merge {
            self.marker(b'|', labels.ancestor.as_deref());
            self.block(base);
        }
        self.marker(b'=', None);
        self.block(theirs);
        self.marker(b'>', labels.theirs.as_deref());
        self.lines(suffix);
    }
}
