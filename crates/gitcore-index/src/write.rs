//! Encoding the `DIRC` file and installing it under a lock.

use std::io::Write;
use std::path::Path;

use gitcore_hash::hasher::Hasher;
use gitcore_hash::ObjectId;
use gitcore_utils::lockfile::LockFile;

use crate::entry::IndexEntry;
use crate::extensions::{CacheTree, ResolveUndo};
use crate::read::{
    padded_entry_len, EXT_INTENT_TO_ADD, EXT_SKIP_WORKTREE, FLAG_ASSUME_VALID, FLAG_EXTENDED, NAME_MASK,
    SIGNATURE, STAGE_SHIFT,
};
use crate::{Index, IndexError};

/// Version actually written: extended flags force at least 3.
fn effective_version(index: &Index) -> u32 {
    if index.version == 2 && index.entries.iter().any(|e| e.flags.has_extended()) {
        3
    } else {
        index.version
    }
}

pub(crate) fn serialize(index: &Index) -> Result<Vec<u8>, IndexError> {
    let version = effective_version(index);
    let count = u32::try_from(index.entries.len())
        .map_err(|_| IndexError::BadHeader("too many entries".into()))?;

    let mut buf = Vec::with_capacity(12 + index.entries.len() * 80);
    buf.extend_from_slice(SIGNATURE);
    buf.extend_from_slice(&version.to_be_bytes());
    buf.extend_from_slice(&count.to_be_bytes());

    let mut previous: &[u8] = b"";
    for entry in &index.entries {
        write_entry(&mut buf, entry, version, previous);
        previous = entry.path.as_slice();
    }

    if let Some(tree) = &index.cache_tree {
        push_extension(&mut buf, CacheTree::SIGNATURE, &tree.serialize());
    }
    if !index.resolve_undo.is_empty() {
        push_extension(&mut buf, ResolveUndo::SIGNATURE, &index.resolve_undo.serialize());
    }
    for ext in &index.unknown_extensions {
        push_extension(&mut buf, &ext.signature, &ext.data);
    }

    let checksum = Hasher::digest(index.algo, &buf)?;
    buf.extend_from_slice(checksum.as_bytes());
    Ok(buf)
}

fn push_extension(buf: &mut Vec<u8>, signature: &[u8; 4], data: &[u8]) {
    buf.extend_from_slice(signature);
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
}

fn write_entry(buf: &mut Vec<u8>, entry: &IndexEntry, version: u32, previous: &[u8]) {
    let start = buf.len();
    let stat = &entry.stat;
    for field in [
        stat.ctime_secs,
        stat.ctime_nsecs,
        stat.mtime_secs,
        stat.mtime_nsecs,
        stat.dev,
        stat.ino,
        entry.mode.raw(),
        stat.uid,
        stat.gid,
        stat.size,
    ] {
        buf.extend_from_slice(&field.to_be_bytes());
    }
    buf.extend_from_slice(entry.oid.as_bytes());

    let extended = version >= 3 && entry.flags.has_extended();
    let mut flags = entry.path.len().min(usize::from(NAME_MASK)) as u16;
    flags |= u16::from(entry.stage.as_u8()) << STAGE_SHIFT;
    if entry.flags.assume_valid {
        flags |= FLAG_ASSUME_VALID;
    }
    if extended {
        flags |= FLAG_EXTENDED;
    }
    buf.extend_from_slice(&flags.to_be_bytes());
    if extended {
        let mut ext = 0u16;
        if entry.flags.skip_worktree {
            ext |= EXT_SKIP_WORKTREE;
        }
        if entry.flags.intent_to_add {
            ext |= EXT_INTENT_TO_ADD;
        }
        buf.extend_from_slice(&ext.to_be_bytes());
    }

    if version >= 4 {
        let common = previous
            .iter()
            .zip(entry.path.iter())
            .take_while(|(a, b)| a == b)
            .count();
        write_offset_varint(buf, previous.len() - common);
        buf.extend_from_slice(&entry.path[common..]);
        buf.push(0);
    } else {
        buf.extend_from_slice(&entry.path);
        let len = padded_entry_len(entry.oid.as_bytes().len(), extended, entry.path.len());
        buf.resize(start + len, 0);
    }
}

fn write_offset_varint(buf: &mut Vec<u8>, mut value: usize) {
    let mut tmp = [0u8; 16];
    let mut pos = tmp.len() - 1;
    tmp[pos] = (value & 0x7f) as u8;
    while value >> 7 != 0 {
        value = (value >> 7) - 1;
        pos -= 1;
        tmp[pos] = 0x80 | (value & 0x7f) as u8;
    }
    buf.extend_from_slice(&tmp[pos..]);
}

/// Serialize, write under `<path>.lock` and rename into place.
pub(crate) fn write_locked(index: &Index, path: &Path) -> Result<ObjectId, IndexError> {
    let bytes = serialize(index)?;
    let mut lock = LockFile::acquire(path)?;
    lock.write_all(&bytes)?;
    lock.commit()?;
    let trailer = &bytes[bytes.len() - index.algo.digest_len()..];
    Ok(ObjectId::from_bytes(trailer, index.algo)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_varint_encoding() {
        let enc = |v| {
            let mut b = Vec::new();
            write_offset_varint(&mut b, v);
            b
        };
        assert_eq!(enc(0), [0x00]);
        assert_eq!(enc(127), [0x7f]);
        assert_eq!(enc(128), [0x80, 0x00]);
        assert_eq!(enc(300), [0x81, 0x2c]);
    }
}
