use gitcore_utils::{Classify, ErrorClass};

/// Errors produced by hash and id operations.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("invalid hex character at position {position}: '{character}'")]
    InvalidHex { position: usize, character: char },

    #[error("invalid hex length: expected {expected}, got {actual}")]
    InvalidHexLength { expected: usize, actual: usize },

    #[error("invalid hash length: expected {expected} bytes, got {actual}")]
    InvalidHashLength { expected: usize, actual: usize },

    #[error("object id prefix '{prefix}' is shorter than {min} hex digits")]
    PrefixTooShort { prefix: String, min: usize },

    #[error("SHA-1 collision detected")]
    Sha1Collision,
}

impl Classify for HashError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Sha1Collision => ErrorClass::Corrupt,
            _ => ErrorClass::InvalidArgument,
        }
    }
}
