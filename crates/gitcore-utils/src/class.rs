//! Cross-crate error classification.
//!
//! Every crate keeps its own error enum; [`Classify`] maps each variant onto
//! one coarse [`ErrorClass`] so callers can branch on the kind of failure
//! without matching variants from every layer.

use std::fmt;
use std::io;

/// Coarse failure categories shared by all gitcore crates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// An object, reference, or path does not exist.
    NotFound,
    /// A short id or name matched more than one candidate.
    Ambiguous,
    /// Stored bytes failed to parse or failed a checksum.
    Corrupt,
    /// The operation would overwrite divergent state, or left unresolved conflicts.
    Conflict,
    /// A malformed name, path, or option combination.
    InvalidArgument,
    /// A callback asked to stop.
    Cancelled,
    /// A pack delta base was still missing when indexing finished.
    Unresolved,
    /// Another writer holds the lock.
    Locked,
    /// Any other filesystem failure.
    Io,
}

impl ErrorClass {
    /// Classify a raw I/O error.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::InvalidInput => Self::InvalidArgument,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Self::Corrupt,
            _ => Self::Io,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not found",
            Self::Ambiguous => "ambiguous",
            Self::Corrupt => "corrupt",
            Self::Conflict => "conflict",
            Self::InvalidArgument => "invalid argument",
            Self::Cancelled => "cancelled",
            Self::Unresolved => "unresolved",
            Self::Locked => "locked",
            Self::Io => "i/o",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every error enum in the workspace.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl Classify for io::Error {
    fn class(&self) -> ErrorClass {
        ErrorClass::from_io(self)
    }
}
