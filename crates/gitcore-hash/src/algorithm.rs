use std::fmt;

use crate::ObjectId;

/// Hash function used to derive object ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1 with collision detection, 20-byte ids.
    #[default]
    Sha1,
    /// SHA-256, 32-byte ids.
    Sha256,
}

impl HashAlgorithm {
    pub const fn digest_len(self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    pub const fn hex_len(self) -> usize {
        self.digest_len() * 2
    }

    /// The all-zero id, used for "absent" sides in diffs and batch lookups.
    pub const fn null_oid(self) -> ObjectId {
        match self {
            Self::Sha1 => ObjectId::NULL_SHA1,
            Self::Sha256 => ObjectId::NULL_SHA256,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sha1" | "sha-1" => Some(Self::Sha1),
            "sha256" | "sha-256" => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }

    pub fn from_hex_len(len: usize) -> Option<Self> {
        Self::from_digest_len(len / 2).filter(|_| len % 2 == 0)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
