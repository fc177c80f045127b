//! Foundation utilities shared by every gitcore crate.

pub mod class;
pub mod control;
pub mod date;
pub mod error;
pub mod glob;
pub mod lockfile;

// Re-export core types at crate root for convenience
pub use bstr::{BStr, BString, ByteSlice, ByteVec};
pub use class::{Classify, ErrorClass};
pub use control::Control;
pub use error::{LockError, UtilError};

pub type Result<T> = std::result::Result<T, UtilError>;
