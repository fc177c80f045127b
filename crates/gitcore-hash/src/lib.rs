//! Object identity for gitcore.
//!
//! [`ObjectId`] is the content hash of an object's canonical encoding,
//! [`Prefix`] is an abbreviated id used for lookups, and
//! [`hasher::Hasher`] computes ids incrementally.

mod algorithm;
mod error;
pub mod fanout;
pub mod hasher;
pub mod hex;
mod oid;
mod prefix;

pub use algorithm::HashAlgorithm;
pub use error::HashError;
pub use oid::ObjectId;
pub use prefix::{Prefix, MIN_PREFIX_HEX_LEN};
