//! Decoding the `DIRC` file, versions 2 to 4.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use bstr::BString;
use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_object::FileMode;

use crate::entry::{EntryFlags, IndexEntry, StatData};
use crate::extensions::{is_optional, CacheTree, RawExtension, ResolveUndo};
use crate::{Index, IndexError, Stage};

pub(crate) const SIGNATURE: &[u8; 4] = b"DIRC";
pub(crate) const HEADER_LEN: usize = 12;
/// ctime, mtime, dev, ino, mode, uid, gid, size.
pub(crate) const STAT_LEN: usize = 40;

pub(crate) const FLAG_ASSUME_VALID: u16 = 0x8000;
pub(crate) const FLAG_EXTENDED: u16 = 0x4000;
pub(crate) const STAGE_SHIFT: u16 = 12;
pub(crate) const NAME_MASK: u16 = 0x0fff;
pub(crate) const EXT_SKIP_WORKTREE: u16 = 0x4000;
pub(crate) const EXT_INTENT_TO_ADD: u16 = 0x2000;

/// Padded size of a v2/v3 entry: NUL-terminated and rounded up to 8.
pub(crate) fn padded_entry_len(hash_len: usize, extended: bool, name_len: usize) -> usize {
    let flags = if extended { 4 } else { 2 };
    (STAT_LEN + hash_len + flags + name_len + 8) & !7
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

/// Offset-encoded varint used by v4 path compression.
fn read_offset_varint(data: &[u8], cursor: &mut usize) -> Option<usize> {
    let mut byte = *data.get(*cursor)?;
    *cursor += 1;
    let mut value = usize::from(byte & 0x7f);
    while byte & 0x80 != 0 {
        byte = *data.get(*cursor)?;
        *cursor += 1;
        value = value.checked_add(1)?.checked_shl(7)? | usize::from(byte & 0x7f);
    }
    Some(value)
}

pub(crate) fn parse(data: &[u8], algo: HashAlgorithm) -> Result<Index, IndexError> {
    let hash_len = algo.digest_len();
    if data.len() < HEADER_LEN + hash_len {
        return Err(IndexError::BadHeader("file too short".into()));
    }
    let body_end = data.len() - hash_len;
    let expected = ObjectId::from_bytes(&data[body_end..], algo)?;
    let actual = Hasher::digest(algo, &data[..body_end])?;
    if expected != actual {
        return Err(IndexError::ChecksumMismatch { expected, actual });
    }

    if &data[..4] != SIGNATURE {
        return Err(IndexError::BadHeader("missing DIRC signature".into()));
    }
    let version = be32(data, 4);
    if !(2..=4).contains(&version) {
        return Err(IndexError::UnsupportedVersion(version));
    }
    let count = be32(data, 8) as usize;

    let body = &data[..body_end];
    let mut cursor = HEADER_LEN;
    let mut entries: Vec<IndexEntry> = Vec::with_capacity(count.min(body.len() / 62));
    let mut previous = BString::default();
    for _ in 0..count {
        let entry = parse_entry(body, &mut cursor, version, algo, &previous)?;
        if let Some(last) = entries.last() {
            let ordered = (last.path.as_slice(), last.stage) < (entry.path.as_slice(), entry.stage);
            if !ordered {
                return Err(IndexError::entry(cursor, format!("'{}' is out of order", entry.path)));
            }
        }
        previous.clone_from(&entry.path);
        entries.push(entry);
    }

    let mut index = Index::with_hash_algorithm(algo);
    index.version = version;
    index.entries = entries;

    while cursor < body.len() {
        if cursor + 8 > body.len() {
            return Err(IndexError::BadHeader("truncated extension header".into()));
        }
        let mut signature = [0u8; 4];
        signature.copy_from_slice(&body[cursor..cursor + 4]);
        let len = be32(body, cursor + 4) as usize;
        cursor += 8;
        let payload = body
            .get(cursor..cursor.saturating_add(len))
            .ok_or_else(|| IndexError::extension(&signature, "runs past the end of the file"))?;
        cursor += len;

        match &signature {
            b"TREE" => index.cache_tree = Some(CacheTree::parse(payload, algo)?),
            b"REUC" => index.resolve_undo = ResolveUndo::parse(payload, algo)?,
            sig if is_optional(sig) => {
                tracing::trace!(signature = %String::from_utf8_lossy(sig), len, "keeping unknown extension");
                index.unknown_extensions.push(RawExtension {
                    signature,
                    data: payload.to_vec(),
                });
            }
            sig => return Err(IndexError::RequiredExtension(String::from_utf8_lossy(sig).into_owned())),
        }
    }

    index.checksum = Some(expected);
    Ok(index)
}

fn parse_entry(
    data: &[u8],
    cursor: &mut usize,
    version: u32,
    algo: HashAlgorithm,
    previous: &BString,
) -> Result<IndexEntry, IndexError> {
    let start = *cursor;
    let hash_len = algo.digest_len();
    let fixed = STAT_LEN + hash_len + 2;
    if start + fixed > data.len() {
        return Err(IndexError::entry(start, "truncated entry"));
    }

    let stat = StatData {
        ctime_secs: be32(data, start),
        ctime_nsecs: be32(data, start + 4),
        mtime_secs: be32(data, start + 8),
        mtime_nsecs: be32(data, start + 12),
        dev: be32(data, start + 16),
        ino: be32(data, start + 20),
        uid: be32(data, start + 28),
        gid: be32(data, start + 32),
        size: be32(data, start + 36),
    };
    let mode = FileMode::from_raw(be32(data, start + 24));
    let oid = ObjectId::from_bytes(&data[start + STAT_LEN..start + STAT_LEN + hash_len], algo)?;
    let flags = be16(data, start + STAT_LEN + hash_len);
    *cursor = start + fixed;

    let stage = Stage::from_u8(((flags >> STAGE_SHIFT) & 0x3) as u8)
        .ok_or_else(|| IndexError::entry(start, "bad stage"))?;
    let extended = flags & FLAG_EXTENDED != 0;
    let mut entry_flags = EntryFlags {
        assume_valid: flags & FLAG_ASSUME_VALID != 0,
        ..EntryFlags::default()
    };
    if extended {
        if version < 3 {
            return Err(IndexError::entry(start, "extended flags in a version 2 index"));
        }
        if *cursor + 2 > data.len() {
            return Err(IndexError::entry(start, "truncated extended flags"));
        }
        let ext = be16(data, *cursor);
        *cursor += 2;
        entry_flags.skip_worktree = ext & EXT_SKIP_WORKTREE != 0;
        entry_flags.intent_to_add = ext & EXT_INTENT_TO_ADD != 0;
    }

    let path = if version >= 4 {
        let strip = read_offset_varint(data, cursor)
            .ok_or_else(|| IndexError::entry(start, "bad path prefix length"))?;
        if strip > previous.len() {
            return Err(IndexError::entry(start, "path prefix longer than previous path"));
        }
        let rest = &data[*cursor..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| IndexError::entry(start, "unterminated path"))?;
        let mut path = BString::from(&previous[..previous.len() - strip]);
        path.extend_from_slice(&rest[..nul]);
        *cursor += nul + 1;
        path
    } else {
        let rest = &data[*cursor..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| IndexError::entry(start, "unterminated path"))?;
        let path = BString::from(&rest[..nul]);
        *cursor = start + padded_entry_len(hash_len, extended, nul);
        if *cursor > data.len() {
            return Err(IndexError::entry(start, "padding runs past the end"));
        }
        path
    };

    let name_field = usize::from(flags & NAME_MASK);
    if name_field != path.len().min(usize::from(NAME_MASK)) {
        return Err(IndexError::entry(start, "name length does not match path"));
    }

    Ok(IndexEntry {
        path,
        oid,
        mode,
        stage,
        stat,
        flags: entry_flags,
    })
}

/// Trailer of the index file at `path`, or `None` when it does not exist.
pub(crate) fn trailer_of(path: &Path, algo: HashAlgorithm) -> Result<Option<ObjectId>, IndexError> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let len = algo.digest_len();
    if file.metadata()?.len() < (HEADER_LEN + len) as u64 {
        return Err(IndexError::BadHeader("file too short".into()));
    }
    file.seek(SeekFrom::End(-(len as i64)))?;
    let mut buf = vec![0u8; len];
    file.read_exact(&mut buf)?;
    Ok(Some(ObjectId::from_bytes(&buf, algo)?))
}
