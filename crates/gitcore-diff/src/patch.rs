//! Line-level patches and their unified text form.

use std::fmt::Write as _;

use bstr::{BString, ByteSlice};
use gitcore_hash::hasher::Hasher;
use gitcore_hash::ObjectId;
use gitcore_object::FileMode;
use gitcore_odb::ObjectDatabase;
use gitcore_utils::Control;

use crate::algorithm::{diff_lines, split_lines};
use crate::binary::is_binary;
use crate::hunk::{build_hunks, DiffLine, Hunk, LineOrigin};
use crate::{DeltaStatus, DiffDelta, DiffError, DiffFile, DiffFileFlags, DiffOptions};

/// A delta with its hunks. Binary deltas have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub delta: DiffDelta,
    pub hunks: Vec<Hunk>,
}

/// Receives a patch file by file, hunk by hunk and line by line.
///
/// Returning [`Control::Skip`] from `file` or `hunk` skips what it
/// contains; [`Control::Abort`] from any method stops the walk with
/// [`DiffError::Cancelled`].
pub trait DiffVisitor {
    fn file(&mut self, _delta: &DiffDelta) -> Control {
        Control::Continue
    }

    fn hunk(&mut self, _delta: &DiffDelta, _hunk: &Hunk) -> Control {
        Control::Continue
    }

    fn line(&mut self, _delta: &DiffDelta, _hunk: &Hunk, _line: &DiffLine) -> Control {
        Control::Continue
    }
}

pub(crate) fn shows_content(status: DeltaStatus) -> bool {
    matches!(
        status,
        DeltaStatus::Added
            | DeltaStatus::Deleted
            | DeltaStatus::Modified
            | DeltaStatus::Renamed
            | DeltaStatus::Copied
            | DeltaStatus::Typechange
    )
}

pub(crate) fn build_patch(mut delta: DiffDelta, old: &[u8], new: &[u8], options: &DiffOptions) -> Patch {
    let binary = options.force_binary || is_binary(old) || is_binary(new);
    let flag = if binary {
        DiffFileFlags::BINARY
    } else {
        DiffFileFlags::NOT_BINARY
    };
    delta.old_file.flags |= flag;
    delta.new_file.flags |= flag;

    let hunks = if binary || !shows_content(delta.status) {
        Vec::new()
    } else {
        let (a, b) = (split_lines(old), split_lines(new));
        let edits = diff_lines(&a, &b, options.algorithm, options.ignore_whitespace);
        build_hunks(&a, &b, &edits, options.context_lines, options.interhunk_lines)
    };
    Patch { delta, hunks }
}

fn abbrev(file: &DiffFile) -> String {
    if file.exists() && !file.id.is_null() {
        file.id.to_hex_short(7)
    } else {
        "0000000".to_owned()
    }
}

fn mode_str(mode: FileMode) -> String {
    format!("{:06o}", mode.raw())
}

impl Patch {
    pub fn is_binary(&self) -> bool {
        self.delta.is_binary()
    }

    /// `(context, additions, deletions)` line counts.
    pub fn line_stats(&self) -> (usize, usize, usize) {
        let mut stats = (0, 0, 0);
        for line in self.hunks.iter().flat_map(|h| &h.lines) {
            match line.origin {
                LineOrigin::Context => stats.0 += 1,
                LineOrigin::Addition => stats.1 += 1,
                LineOrigin::Deletion => stats.2 += 1,
                _ => {}
            }
        }
        stats
    }

    /// Unified `diff --git` text. Deltas without content changes to show
    /// (unmodified, untracked, ignored, conflicted, unreadable) render empty.
    pub fn to_text(&self) -> String {
        let d = &self.delta;
        if !shows_content(d.status) {
            return String::new();
        }
        let old_path = d.old_file.path.to_str_lossy();
        let new_path = d.new_file.path.to_str_lossy();
        let mut out = String::new();
        let _ = writeln!(out, "diff --git a/{old_path} b/{new_path}");

        match (d.status, d.old_file.mode, d.new_file.mode) {
            (DeltaStatus::Added, _, Some(mode)) => {
                let _ = writeln!(out, "new file mode {}", mode_str(mode));
            }
            (DeltaStatus::Deleted, Some(mode), _) => {
                let _ = writeln!(out, "deleted file mode {}", mode_str(mode));
            }
            (_, Some(old), Some(new)) if old != new => {
                let _ = writeln!(out, "old mode {}\nnew mode {}", mode_str(old), mode_str(new));
            }
            _ => {}
        }

        let verb = match d.status {
            DeltaStatus::Renamed => Some("rename"),
            DeltaStatus::Copied => Some("copy"),
            _ => None,
        };
        if let Some(verb) = verb {
            let _ = writeln!(out, "similarity index {}%", d.similarity);
            let _ = writeln!(out, "{verb} from {old_path}\n{verb} to {new_path}");
        }

        if d.old_file.id == d.new_file.id && d.old_file.exists() && d.new_file.exists() {
            return out;
        }
        let _ = write!(out, "index {}..{}", abbrev(&d.old_file), abbrev(&d.new_file));
        match (d.old_file.mode, d.new_file.mode) {
            (Some(old), Some(new)) if old == new => {
                let _ = writeln!(out, " {}", mode_str(old));
            }
            _ => out.push('\n'),
        }

        let minus = if d.old_file.exists() {
            format!("a/{old_path}")
        } else {
            "/dev/null".to_owned()
        };
        let plus = if d.new_file.exists() {
            format!("b/{new_path}")
        } else {
            "/dev/null".to_owned()
        };
        if self.is_binary() {
            let _ = writeln!(out, "Binary files {minus} and {plus} differ");
            return out;
        }
        if self.hunks.is_empty() {
            return out;
        }
        let _ = writeln!(out, "--- {minus}\n+++ {plus}");
        for hunk in &self.hunks {
            let _ = writeln!(out, "{}", hunk.header);
            for line in &hunk.lines {
                if !line.origin.is_eof_marker() {
                    out.push(line.origin.as_char());
                }
                out.push_str(&line.content.to_str_lossy());
            }
        }
        out
    }

    /// Walk the patch with `visitor`.
    pub fn visit(&self, visitor: &mut dyn DiffVisitor) -> Result<(), DiffError> {
        match visitor.file(&self.delta) {
            Control::Continue => {}
            Control::Skip => return Ok(()),
            Control::Abort => return Err(DiffError::Cancelled),
        }
        for hunk in &self.hunks {
            match visitor.hunk(&self.delta, hunk) {
                Control::Continue => {}
                Control::Skip => continue,
                Control::Abort => return Err(DiffError::Cancelled),
            }
            for line in &hunk.lines {
                if visitor.line(&self.delta, hunk, line) == Control::Abort {
                    return Err(DiffError::Cancelled);
                }
            }
        }
        Ok(())
    }
}

fn buffer_file(path: &str, id: Option<ObjectId>, size: usize) -> DiffFile {
    match id {
        Some(id) => {
            let mut file = DiffFile::present(BString::from(path), id, FileMode::Regular, true);
            file.size = size as u64;
            file
        }
        None => DiffFile::absent(BString::from(path), ObjectId::NULL_SHA1),
    }
}

fn patch_between(
    old: Option<(&[u8], ObjectId)>,
    old_path: &str,
    new: Option<(&[u8], ObjectId)>,
    new_path: &str,
    options: &DiffOptions,
) -> Patch {
    let status = match (&old, &new) {
        (None, Some(_)) => DeltaStatus::Added,
        (Some(_), None) => DeltaStatus::Deleted,
        (Some((_, a)), Some((_, b))) if a != b => DeltaStatus::Modified,
        _ => DeltaStatus::Unmodified,
    };
    let delta = DiffDelta {
        status,
        old_file: buffer_file(old_path, old.map(|o| o.1), old.map_or(0, |o| o.0.len())),
        new_file: buffer_file(new_path, new.map(|n| n.1), new.map_or(0, |n| n.0.len())),
        similarity: 0,
    };
    let old_data = old.map_or(&[][..], |o| o.0);
    let new_data = new.map_or(&[][..], |n| n.0);
    build_patch(delta, old_data, new_data, options)
}

fn blob_id(data: &[u8]) -> Result<ObjectId, DiffError> {
    Ok(Hasher::hash_object(gitcore_hash::HashAlgorithm::Sha1, "blob", data)?)
}

/// Diff two in-memory buffers. `None` stands for a missing file.
pub fn diff_buffers(
    old: Option<&[u8]>,
    old_path: &str,
    new: Option<&[u8]>,
    new_path: &str,
    options: &DiffOptions,
) -> Result<Patch, DiffError> {
    let old = old.map(|d| blob_id(d).map(|id| (d, id))).transpose()?;
    let new = new.map(|d| blob_id(d).map(|id| (d, id))).transpose()?;
    Ok(patch_between(old, old_path, new, new_path, options))
}

/// Diff two blobs from `odb`.
pub fn diff_blobs(
    odb: &ObjectDatabase,
    old: Option<&ObjectId>,
    old_path: &str,
    new: Option<&ObjectId>,
    new_path: &str,
    options: &DiffOptions,
) -> Result<Patch, DiffError> {
    let old_raw = old.map(|id| odb.read(id)).transpose()?;
    let new_raw = new.map(|id| odb.read(id)).transpose()?;
    Ok(patch_between(
        old_raw.as_ref().zip(old).map(|(raw, id)| (raw.data.as_slice(), *id)),
        old_path,
        new_raw.as_ref().zip(new).map(|(raw, id)| (raw.data.as_slice(), *id)),
        new_path,
        options,
    ))
}

/// Diff a blob from `odb` against an in-memory buffer.
pub fn diff_blob_to_buffer(
    odb: &ObjectDatabase,
    old: Option<&ObjectId>,
    old_path: &str,
    new: Option<&[u8]>,
    new_path: &str,
    options: &DiffOptions,
) -> Result<Patch, DiffError> {
    let old_raw = old.map(|id| odb.read(id)).transpose()?;
    let new = new.map(|d| blob_id(d).map(|id| (d, id))).transpose()?;
    Ok(patch_between(
        old_raw.as_ref().zip(old).map(|(raw, id)| (raw.data.as_slice(), *id)),
        old_path,
        new,
        new_path,
        options,
    ))
}
