//! Entry header codec.
//!
//! The first byte holds the type in bits 4..7 and the low four size bits;
//! further size bits follow seven at a time while the high bit is set.
//! OFS deltas then carry a backwards distance in a big-endian varint where
//! every continuation adds one, and REF deltas carry the base id.

use flate2::{Decompress, FlushDecompress, Status};
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_object::ObjectType;

use crate::PackError;

pub const OBJ_COMMIT: u8 = 1;
pub const OBJ_TREE: u8 = 2;
pub const OBJ_BLOB: u8 = 3;
pub const OBJ_TAG: u8 = 4;
pub const OBJ_OFS_DELTA: u8 = 6;
pub const OBJ_REF_DELTA: u8 = 7;

pub fn type_code(kind: ObjectType) -> u8 {
    match kind {
        ObjectType::Commit => OBJ_COMMIT,
        ObjectType::Tree => OBJ_TREE,
        ObjectType::Blob => OBJ_BLOB,
        ObjectType::Tag => OBJ_TAG,
    }
}

fn kind_from_code(code: u8) -> Option<ObjectType> {
    match code {
        OBJ_COMMIT => Some(ObjectType::Commit),
        OBJ_TREE => Some(ObjectType::Tree),
        OBJ_BLOB => Some(ObjectType::Blob),
        OBJ_TAG => Some(ObjectType::Tag),
        _ => None,
    }
}

/// What an entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Base(ObjectType),
    /// Delta against the entry starting at `base_offset` in the same pack.
    OfsDelta { base_offset: u64 },
    /// Delta against the object `base`, which may live outside the pack.
    RefDelta { base: ObjectId },
}

impl EntryKind {
    pub fn is_delta(&self) -> bool {
        !matches!(self, Self::Base(_))
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::Base(kind) => type_code(*kind),
            Self::OfsDelta { .. } => OBJ_OFS_DELTA,
            Self::RefDelta { .. } => OBJ_REF_DELTA,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    pub kind: EntryKind,
    /// Inflated size of the payload (the delta itself for delta entries).
    pub size: u64,
    /// Bytes from the entry start to the zlib stream.
    pub header_len: usize,
}

/// Decode the header of the entry at pack offset `offset`.
///
/// Returns `Ok(None)` when `data` stops before the header does, which the
/// streaming indexer treats as "wait for more bytes".
pub fn decode_header(
    data: &[u8],
    offset: u64,
    algo: HashAlgorithm,
) -> Result<Option<EntryHeader>, PackError> {
    let Some(&first) = data.first() else {
        return Ok(None);
    };
    let code = (first >> 4) & 0x07;
    let mut size = u64::from(first & 0x0f);
    let mut shift = 4u32;
    let mut pos = 1;
    let mut byte = first;
    while byte & 0x80 != 0 {
        let Some(&next) = data.get(pos) else {
            return Ok(None);
        };
        if shift > 57 {
            return Err(PackError::corrupt(offset, "size varint overflows"));
        }
        byte = next;
        size |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        pos += 1;
    }

    let kind = match code {
        OBJ_OFS_DELTA => {
            let Some(&b) = data.get(pos) else {
                return Ok(None);
            };
            pos += 1;
            let mut distance = u64::from(b & 0x7f);
            let mut byte = b;
            while byte & 0x80 != 0 {
                let Some(&next) = data.get(pos) else {
                    return Ok(None);
                };
                pos += 1;
                if distance >= 1 << 56 {
                    return Err(PackError::corrupt(offset, "base distance overflows"));
                }
                byte = next;
                distance = ((distance + 1) << 7) | u64::from(byte & 0x7f);
            }
            if distance == 0 || distance > offset {
                return Err(PackError::corrupt(
                    offset,
                    format!("base distance {distance} points outside the pack"),
                ));
            }
            EntryKind::OfsDelta {
                base_offset: offset - distance,
            }
        }
        OBJ_REF_DELTA => {
            let len = algo.digest_len();
            let Some(raw) = data.get(pos..pos + len) else {
                return Ok(None);
            };
            pos += len;
            EntryKind::RefDelta {
                base: ObjectId::from_bytes(raw, algo)?,
            }
        }
        other => match kind_from_code(other) {
            Some(kind) => EntryKind::Base(kind),
            None => return Err(PackError::corrupt(offset, format!("unknown entry type {other}"))),
        },
    };

    Ok(Some(EntryHeader {
        kind,
        size,
        header_len: pos,
    }))
}

/// Like [`decode_header`] for random access, where running out of bytes
/// means the pack is truncated.
pub fn decode_header_at(
    data: &[u8],
    offset: u64,
    algo: HashAlgorithm,
) -> Result<EntryHeader, PackError> {
    let start = usize::try_from(offset)
        .ok()
        .filter(|&s| s < data.len())
        .ok_or_else(|| PackError::corrupt(offset, "offset past end of pack"))?;
    decode_header(&data[start..], offset, algo)?
        .ok_or_else(|| PackError::corrupt(offset, "truncated entry header"))
}

/// Append the header for an entry that will start at `offset`.
pub fn encode_header(kind: &EntryKind, size: u64, offset: u64, out: &mut Vec<u8>) {
    let mut byte = (kind.code() << 4) | (size & 0x0f) as u8;
    let mut rest = size >> 4;
    while rest != 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);

    match kind {
        EntryKind::Base(_) => {}
        EntryKind::OfsDelta { base_offset } => encode_distance(offset - base_offset, out),
        EntryKind::RefDelta { base } => out.extend_from_slice(base.as_bytes()),
    }
}

fn encode_distance(mut distance: u64, out: &mut Vec<u8>) {
    let mut tmp = [0u8; 10];
    let mut pos = tmp.len() - 1;
    tmp[pos] = (distance & 0x7f) as u8;
    distance >>= 7;
    while distance != 0 {
        distance -= 1;
        pos -= 1;
        tmp[pos] = 0x80 | (distance & 0x7f) as u8;
        distance >>= 7;
    }
    out.extend_from_slice(&tmp[pos..]);
}

/// Inflate one zlib stream of exactly `size` bytes from the front of
/// `input`. Returns the content and the number of compressed bytes used.
pub(crate) fn inflate_exact(input: &[u8], size: usize) -> Result<(Vec<u8>, usize), &'static str> {
    let mut z = Decompress::new(true);
    // One byte past `size` so an overlong stream shows up; the declared
    // size is untrusted, so capacity grows with the output instead.
    let limit = size.saturating_add(1);
    let mut out = Vec::with_capacity(limit.min(input.len().saturating_mul(4).max(64)));
    loop {
        if out.len() == out.capacity() {
            out.reserve(out.capacity().max(64).min(limit - out.len()));
        }
        let consumed = z.total_in() as usize;
        let produced = out.len();
        let status = z
            .decompress_vec(&input[consumed..], &mut out, FlushDecompress::None)
            .map_err(|_| "zlib stream is corrupt")?;
        if out.len() > size {
            return Err("inflates past its declared size");
        }
        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                let stalled = z.total_in() as usize == consumed && out.len() == produced;
                if stalled && consumed == input.len() {
                    return Err("truncated zlib stream");
                }
                if stalled {
                    return Err("zlib stream makes no progress");
                }
            }
        }
    }
    if out.len() != size {
        return Err("inflates short of its declared size");
    }
    Ok((out, z.total_in() as usize))
}
