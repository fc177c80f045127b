//! Delta instruction streams.
//!
//! A delta starts with the source and target sizes as little-endian base-128
//! varints, followed by instructions: a byte with the high bit set copies a
//! range of the source (bits 0..3 select offset bytes, bits 4..6 size bytes,
//! a zero size meaning 0x10000); a byte in 1..=127 inserts that many
//! literal bytes; a zero byte is reserved.

use std::collections::HashMap;

use crate::PackError;

const WINDOW: usize = 16;
const MAX_INSERT: usize = 0x7f;
const MAX_COPY: usize = 0x00ff_ffff;

/// Read a size varint, advancing `pos`.
pub fn read_size(data: &[u8], pos: &mut usize) -> Result<u64, PackError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos).ok_or(PackError::BadDelta("truncated size"))?;
        *pos += 1;
        if shift > 63 {
            return Err(PackError::BadDelta("size overflows"));
        }
        value |= u64::from(byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

pub fn write_size(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Source and target sizes from the delta preamble.
pub fn sizes(delta: &[u8]) -> Result<(u64, u64), PackError> {
    let mut pos = 0;
    let source = read_size(delta, &mut pos)?;
    let target = read_size(delta, &mut pos)?;
    Ok((source, target))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op<'a> {
    Copy { offset: usize, len: usize },
    Insert(&'a [u8]),
}

/// Iterator over the instructions following the size preamble.
pub struct Ops<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Ops<'a> {
    pub fn new(instructions: &'a [u8]) -> Self {
        Self {
            data: instructions,
            pos: 0,
        }
    }

    fn byte(&mut self) -> Result<u8, PackError> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(PackError::BadDelta("truncated copy instruction"))?;
        self.pos += 1;
        Ok(b)
    }

    fn decode_copy(&mut self, cmd: u8) -> Result<Op<'a>, PackError> {
        let mut offset = 0usize;
        for i in 0..4 {
            if cmd & (1 << i) != 0 {
                offset |= usize::from(self.byte()?) << (8 * i);
            }
        }
        let mut len = 0usize;
        for i in 0..3 {
            if cmd & (0x10 << i) != 0 {
                len |= usize::from(self.byte()?) << (8 * i);
            }
        }
        if len == 0 {
            len = 0x10000;
        }
        Ok(Op::Copy { offset, len })
    }
}

impl<'a> Iterator for Ops<'a> {
    type Item = Result<Op<'a>, PackError>;

    fn next(&mut self) -> Option<Self::Item> {
        let cmd = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(match cmd {
            0 => Err(PackError::BadDelta("reserved instruction 0")),
            c if c & 0x80 != 0 => self.decode_copy(c),
            n => {
                let end = self.pos + usize::from(n);
                match self.data.get(self.pos..end) {
                    Some(lit) => {
                        self.pos = end;
                        Ok(Op::Insert(lit))
                    }
                    None => Err(PackError::BadDelta("truncated insert")),
                }
            }
        })
    }
}

/// Rebuild the target from `base` and `delta`.
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>, PackError> {
    let mut pos = 0;
    let source_len = read_size(delta, &mut pos)?;
    let target_len = read_size(delta, &mut pos)?;
    if source_len != base.len() as u64 {
        return Err(PackError::BadDelta("base size does not match delta"));
    }
    let target_len =
        usize::try_from(target_len).map_err(|_| PackError::BadDelta("target too large"))?;

    // The declared size is untrusted until the output reaches it.
    let mut out = Vec::with_capacity(target_len.min(base.len().saturating_add(delta.len())));
    for op in Ops::new(&delta[pos..]) {
        match op? {
            Op::Copy { offset, len } => {
                let src = offset
                    .checked_add(len)
                    .and_then(|end| base.get(offset..end))
                    .ok_or(PackError::BadDelta("copy outside base"))?;
                out.extend_from_slice(src);
            }
            Op::Insert(lit) => out.extend_from_slice(lit),
        }
        if out.len() > target_len {
            return Err(PackError::BadDelta("output exceeds target size"));
        }
    }
    if out.len() != target_len {
        return Err(PackError::BadDelta("output shorter than target size"));
    }
    Ok(out)
}

fn push_copy(mut offset: usize, mut len: usize, out: &mut Vec<u8>) {
    while len > 0 {
        let chunk = len.min(MAX_COPY);
        let mut cmd = 0x80u8;
        let mut args = [0u8; 7];
        let mut n = 0;
        for i in 0..4 {
            let b = (offset >> (8 * i)) as u8;
            if b != 0 {
                cmd |= 1 << i;
                args[n] = b;
                n += 1;
            }
        }
        if chunk != 0x10000 {
            for i in 0..3 {
                let b = (chunk >> (8 * i)) as u8;
                if b != 0 {
                    cmd |= 0x10 << i;
                    args[n] = b;
                    n += 1;
                }
            }
        }
        out.push(cmd);
        out.extend_from_slice(&args[..n]);
        offset += chunk;
        len -= chunk;
    }
}

fn push_insert(mut lit: &[u8], out: &mut Vec<u8>) {
    while !lit.is_empty() {
        let n = lit.len().min(MAX_INSERT);
        out.push(n as u8);
        out.extend_from_slice(&lit[..n]);
        lit = &lit[n..];
    }
}

/// Encode `target` as a delta against `source`.
///
/// Source windows of 16 bytes are indexed at window-aligned positions;
/// each target position probes the index, and matches are extended in both
/// directions before being emitted as copies.
pub fn compute(source: &[u8], target: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(target.len() / 2 + 16);
    write_size(source.len() as u64, &mut out);
    write_size(target.len() as u64, &mut out);

    let mut index: HashMap<&[u8], usize> = HashMap::new();
    if source.len() >= WINDOW {
        for start in (0..=source.len() - WINDOW).step_by(WINDOW) {
            index.entry(&source[start..start + WINDOW]).or_insert(start);
        }
    }

    let mut pending = 0usize;
    let mut i = 0usize;
    while i + WINDOW <= target.len() {
        let Some(&found) = index.get(&target[i..i + WINDOW]) else {
            i += 1;
            continue;
        };
        let (mut s, mut t) = (found, i);
        while t > pending && s > 0 && target[t - 1] == source[s - 1] {
            t -= 1;
            s -= 1;
        }
        let mut len = i + WINDOW - t;
        while s + len < source.len() && t + len < target.len() && source[s + len] == target[t + len] {
            len += 1;
        }
        push_insert(&target[pending..t], &mut out);
        push_copy(s, len, &mut out);
        i = t + len;
        pending = i;
    }
    push_insert(&target[pending..], &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn size_varint() {
        for v in [0u64, 1, 127, 128, 300, 1 << 35] {
            let mut buf = Vec::new();
            write_size(v, &mut buf);
            let mut pos = 0;
            assert_eq!(read_size(&buf, &mut pos).unwrap(), v);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn hand_built_delta() {
        let base = b"the quick brown fox";
        let mut delta = Vec::new();
        write_size(base.len() as u64, &mut delta);
        write_size(13, &mut delta);
        push_copy(4, 5, &mut delta);
        push_insert(b" red ", &mut delta);
        push_copy(16, 3, &mut delta);
        assert_eq!(apply(base, &delta).unwrap(), b"quick red fox");
    }

    #[test]
    fn oversized_target_is_reported_not_allocated() {
        let mut delta = Vec::new();
        write_size(5, &mut delta);
        write_size(1 << 60, &mut delta);
        push_insert(b"x", &mut delta);
        let err = apply(b"hello", &delta).unwrap_err();
        assert!(matches!(err, PackError::BadDelta("output shorter than target size")));
        assert_eq!(gitcore_utils::Classify::class(&err), gitcore_utils::ErrorClass::Corrupt);
    }

    #[test]
    fn copy_of_0x10000_has_no_size_bytes() {
        let mut out = Vec::new();
        push_copy(0, 0x10000, &mut out);
        assert_eq!(out, vec![0x80]);
        let ops: Vec<_> = Ops::new(&out).collect::<Result<_, _>>().unwrap();
        assert_eq!(ops, vec![Op::Copy { offset: 0, len: 0x10000 }]);
    }

    #[test]
    fn rejects_malformed() {
        let base = b"abc";
        let mut delta = Vec::new();
        write_size(3, &mut delta);
        write_size(3, &mut delta);
        delta.push(0);
        assert!(apply(base, &delta).is_err());

        let mut wrong_base = Vec::new();
        write_size(4, &mut wrong_base);
        write_size(0, &mut wrong_base);
        assert!(apply(base, &wrong_base).is_err());

        let mut overrun = Vec::new();
        write_size(3, &mut overrun);
        write_size(4, &mut overrun);
        push_copy(1, 4, &mut overrun);
        assert!(apply(base, &overrun).is_err());
    }

    #[test]
    fn similar_inputs_compress() {
        let source: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 251) as u8).collect();
        let mut target = source.clone();
        target[4000] ^= 0xff;
        target.extend_from_slice(b"tail");
        let delta = compute(&source, &target);
        assert!(delta.len() < 64, "delta was {} bytes", delta.len());
        assert_eq!(apply(&source, &delta).unwrap(), target);
        assert_eq!(sizes(&delta).unwrap(), (8192, target.len() as u64));
    }

    proptest! {
        #[test]
        fn compute_then_apply(
            source in proptest::collection::vec(any::<u8>(), 0..2048),
            edits in proptest::collection::vec((any::<u16>(), any::<u8>()), 0..16),
            tail in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let mut target = source.clone();
            for (at, byte) in edits {
                if !target.is_empty() {
                    let at = at as usize % target.len();
                    target[at] = byte;
                }
            }
            target.extend_from_slice(&tail);
            let delta = compute(&source, &target);
            prop_assert_eq!(apply(&source, &delta).unwrap(), target);
        }
    }
}
