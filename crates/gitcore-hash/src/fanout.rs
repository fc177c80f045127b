//! The 256-entry first-byte table at the head of pack indexes.

use std::ops::Range;

use crate::{HashError, ObjectId};

/// Size of the serialized table.
pub const FANOUT_BYTES: usize = 256 * 4;

/// `counts[b]` is the number of ids whose first byte is `<= b`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fanout {
    counts: [u32; 256],
}

impl Fanout {
    /// Build from ids sorted ascending.
    pub fn build<'a>(sorted: impl IntoIterator<Item = &'a ObjectId>) -> Self {
        let mut counts = [0u32; 256];
        for oid in sorted {
            counts[oid.first_byte() as usize] += 1;
        }
        let mut running = 0u32;
        for slot in counts.iter_mut() {
            running += *slot;
            *slot = running;
        }
        Self { counts }
    }

    /// Positions of the ids starting with `first_byte`.
    pub fn range(&self, first_byte: u8) -> Range<usize> {
        let b = first_byte as usize;
        let lo = if b == 0 { 0 } else { self.counts[b - 1] };
        lo as usize..self.counts[b] as usize
    }

    pub fn total(&self) -> u32 {
        self.counts[255]
    }

    /// Parse 256 big-endian words; the sequence must be non-decreasing.
    pub fn from_bytes(data: &[u8]) -> Result<Self, HashError> {
        if data.len() < FANOUT_BYTES {
            return Err(HashError::InvalidHashLength {
                expected: FANOUT_BYTES,
                actual: data.len(),
            });
        }
        let mut counts = [0u32; 256];
        let mut prev = 0u32;
        for (slot, chunk) in counts.iter_mut().zip(data[..FANOUT_BYTES].chunks_exact(4)) {
            let value = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if value < prev {
                return Err(HashError::InvalidHashLength {
                    expected: prev as usize,
                    actual: value as usize,
                });
            }
            prev = value;
            *slot = value;
        }
        Ok(Self { counts })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.counts.iter().flat_map(|c| c.to_be_bytes()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(first: u8) -> ObjectId {
        let mut bytes = [0u8; 20];
        bytes[0] = first;
        ObjectId::Sha1(bytes)
    }

    #[test]
    fn ranges_cover_buckets() {
        let ids = [id(0x00), id(0x01), id(0x01), id(0xab), id(0xff)];
        let fan = Fanout::build(&ids);
        assert_eq!(fan.total(), 5);
        assert_eq!(fan.range(0x00), 0..1);
        assert_eq!(fan.range(0x01), 1..3);
        assert_eq!(fan.range(0x02), 3..3);
        assert_eq!(fan.range(0xab), 3..4);
        assert_eq!(fan.range(0xff), 4..5);
    }

    #[test]
    fn serialized_form_parses_back() {
        let ids = [id(3), id(9), id(9)];
        let fan = Fanout::build(&ids);
        let bytes = fan.to_bytes();
        assert_eq!(bytes.len(), FANOUT_BYTES);
        assert_eq!(Fanout::from_bytes(&bytes).unwrap(), fan);
    }

    #[test]
    fn decreasing_counts_are_corrupt() {
        let mut bytes = Fanout::build(&[id(5)]).to_bytes();
        bytes[255 * 4 + 3] = 0;
        assert!(Fanout::from_bytes(&bytes).is_err());
        assert!(Fanout::from_bytes(&bytes[..100]).is_err());
    }
}
