use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher as StdHasher};
use std::str::FromStr;

use crate::hex::{decode_into, encode_to_string};
use crate::{HashAlgorithm, HashError};

/// Identifier of a stored object: the digest of its canonical encoding.
///
/// Equality inspects every byte regardless of where the first difference
/// is, so comparing ids does not leak the length of a common prefix.
#[derive(Clone, Copy)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl ObjectId {
    pub const NULL_SHA1: Self = Self::Sha1([0u8; 20]);
    pub const NULL_SHA256: Self = Self::Sha256([0u8; 32]);

    pub fn from_bytes(bytes: &[u8], algo: HashAlgorithm) -> Result<Self, HashError> {
        if bytes.len() != algo.digest_len() {
            return Err(HashError::InvalidHashLength {
                expected: algo.digest_len(),
                actual: bytes.len(),
            });
        }
        let mut oid = algo.null_oid();
        oid.as_mut_bytes().copy_from_slice(bytes);
        Ok(oid)
    }

    /// Parse a full-length hex id; the algorithm follows from the length.
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let algo = HashAlgorithm::from_hex_len(hex.len()).ok_or(HashError::InvalidHexLength {
            expected: HashAlgorithm::Sha1.hex_len(),
            actual: hex.len(),
        })?;
        let mut oid = algo.null_oid();
        decode_into(hex.as_bytes(), oid.as_mut_bytes())?;
        Ok(oid)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(b) => b,
            Self::Sha256(b) => b,
        }
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        match self {
            Self::Sha1(b) => b,
            Self::Sha256(b) => b,
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha1(_) => HashAlgorithm::Sha1,
            Self::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    pub fn is_null(&self) -> bool {
        self.as_bytes().iter().fold(0u8, |acc, &b| acc | b) == 0
    }

    pub fn to_hex(&self) -> String {
        encode_to_string(self.as_bytes())
    }

    /// First `len` hex digits.
    pub fn to_hex_short(&self, len: usize) -> String {
        let mut hex = self.to_hex();
        hex.truncate(len.min(hex.len()));
        hex
    }

    pub fn first_byte(&self) -> u8 {
        self.as_bytes()[0]
    }

    /// Relative location inside an objects directory: `("ab", "cdef...")`.
    pub fn loose_path_parts(&self) -> (String, String) {
        let hex = self.to_hex();
        let (dir, file) = hex.split_at(2);
        (dir.to_owned(), file.to_owned())
    }
}

impl PartialEq for ObjectId {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.as_bytes(), other.as_bytes());
        if a.len() != b.len() {
            return false;
        }
        a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
    }
}

impl Eq for ObjectId {}

impl Hash for ObjectId {
    fn hash<H: StdHasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl Ord for ObjectId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PartialOrd for ObjectId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.to_hex_short(8))
    }
}

impl FromStr for ObjectId {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const EMPTY_SHA1: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn hex_parse_picks_algorithm() {
        assert_eq!(ObjectId::from_hex(EMPTY_SHA1).unwrap().algorithm(), HashAlgorithm::Sha1);
        assert_eq!(ObjectId::from_hex(EMPTY_SHA256).unwrap().algorithm(), HashAlgorithm::Sha256);
        assert!(matches!(
            ObjectId::from_hex("abcd"),
            Err(HashError::InvalidHexLength { .. })
        ));
    }

    #[test]
    fn display_and_debug() {
        let oid: ObjectId = EMPTY_SHA1.parse().unwrap();
        assert_eq!(oid.to_string(), EMPTY_SHA1);
        assert_eq!(format!("{oid:?}"), "ObjectId(da39a3ee)");
    }

    #[test]
    fn uppercase_hex_accepted() {
        let lower = ObjectId::from_hex(EMPTY_SHA1).unwrap();
        let upper = ObjectId::from_hex(&EMPTY_SHA1.to_uppercase()).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn equality_across_algorithms() {
        assert_ne!(ObjectId::NULL_SHA1, ObjectId::NULL_SHA256);
        let a = ObjectId::from_hex(EMPTY_SHA1).unwrap();
        let mut b = a;
        b.as_mut_bytes()[19] ^= 1;
        assert_ne!(a, b);
        let set: HashSet<_> = [a, a, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = ObjectId::from_hex("0000000000000000000000000000000000000100").unwrap();
        assert!(a < b);
    }

    #[test]
    fn bytes_roundtrip() {
        let oid = ObjectId::from_hex(EMPTY_SHA1).unwrap();
        assert_eq!(ObjectId::from_bytes(oid.as_bytes(), HashAlgorithm::Sha1).unwrap(), oid);
        assert!(matches!(
            ObjectId::from_bytes(&[0; 10], HashAlgorithm::Sha1),
            Err(HashError::InvalidHashLength { expected: 20, actual: 10 })
        ));
    }

    #[test]
    fn loose_path_split() {
        let oid = ObjectId::from_hex(EMPTY_SHA1).unwrap();
        let (dir, file) = oid.loose_path_parts();
        assert_eq!(dir, "da");
        assert_eq!(file, &EMPTY_SHA1[2..]);
    }
}
