use std::cmp::Ordering;
use std::fmt;

use crate::hex::decode_into;
use crate::{HashAlgorithm, HashError, ObjectId};

/// Shortest abbreviation accepted for lookups.
pub const MIN_PREFIX_HEX_LEN: usize = 4;

/// An abbreviated object id: the leading `hex_len` hex digits of an id.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Prefix {
    padded: ObjectId,
    hex_len: usize,
}

impl Prefix {
    /// Parse an abbreviated id. Full-length input yields a prefix that
    /// matches exactly one id.
    pub fn from_hex(hex: &str, algo: HashAlgorithm) -> Result<Self, HashError> {
        if hex.len() < MIN_PREFIX_HEX_LEN {
            return Err(HashError::PrefixTooShort {
                prefix: hex.to_owned(),
                min: MIN_PREFIX_HEX_LEN,
            });
        }
        let mut padded = algo.null_oid();
        decode_into(hex.as_bytes(), padded.as_mut_bytes())?;
        Ok(Self {
            padded,
            hex_len: hex.len(),
        })
    }

    /// Abbreviate `oid` to `hex_len` digits.
    pub fn from_id(oid: &ObjectId, hex_len: usize) -> Self {
        let hex_len = hex_len.min(oid.algorithm().hex_len());
        let mut padded = oid.algorithm().null_oid();
        let whole = hex_len / 2;
        padded.as_mut_bytes()[..whole].copy_from_slice(&oid.as_bytes()[..whole]);
        if hex_len % 2 == 1 {
            padded.as_mut_bytes()[whole] = oid.as_bytes()[whole] & 0xf0;
        }
        Self { padded, hex_len }
    }

    pub fn hex_len(&self) -> usize {
        self.hex_len
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.padded.algorithm()
    }

    /// True when the prefix covers every digit of an id.
    pub fn is_full(&self) -> bool {
        self.hex_len == self.algorithm().hex_len()
    }

    /// The id with all digits past the prefix zeroed.
    pub fn as_padded_id(&self) -> &ObjectId {
        &self.padded
    }

    /// Compare this prefix against `oid` truncated to the prefix length.
    pub fn cmp_oid(&self, oid: &ObjectId) -> Ordering {
        let whole = self.hex_len / 2;
        let mine = self.padded.as_bytes();
        let theirs = oid.as_bytes();
        match mine[..whole].cmp(&theirs[..whole.min(theirs.len())]) {
            Ordering::Equal if self.hex_len % 2 == 1 && whole < theirs.len() => {
                mine[whole].cmp(&(theirs[whole] & 0xf0))
            }
            ord => ord,
        }
    }

    pub fn matches(&self, oid: &ObjectId) -> bool {
        oid.algorithm() == self.algorithm() && self.cmp_oid(oid) == Ordering::Equal
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.padded.to_hex_short(self.hex_len))
    }
}

impl fmt::Debug for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Prefix({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    #[test]
    fn even_and_odd_prefixes_match() {
        let id = oid("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        assert!(Prefix::from_hex("e69d", HashAlgorithm::Sha1).unwrap().matches(&id));
        assert!(Prefix::from_hex("e69de", HashAlgorithm::Sha1).unwrap().matches(&id));
        assert!(!Prefix::from_hex("e69df", HashAlgorithm::Sha1).unwrap().matches(&id));
    }

    #[test]
    fn too_short_is_rejected() {
        assert!(matches!(
            Prefix::from_hex("e69", HashAlgorithm::Sha1),
            Err(HashError::PrefixTooShort { min: 4, .. })
        ));
    }

    #[test]
    fn ordering_supports_binary_search() {
        let mut ids = vec![
            oid("aaaa000000000000000000000000000000000000"),
            oid("abcd100000000000000000000000000000000000"),
            oid("abcd200000000000000000000000000000000000"),
            oid("ffff000000000000000000000000000000000000"),
        ];
        ids.sort();
        let prefix = Prefix::from_hex("abcd", HashAlgorithm::Sha1).unwrap();
        let start = ids.partition_point(|o| prefix.cmp_oid(o) == Ordering::Greater);
        let hits: Vec<_> = ids[start..].iter().take_while(|o| prefix.matches(o)).collect();
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn from_id_truncates() {
        let id = oid("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        let p = Prefix::from_id(&id, 7);
        assert_eq!(p.to_string(), "e69de29");
        assert!(p.matches(&id));
        assert!(Prefix::from_id(&id, 40).is_full());
    }
}
