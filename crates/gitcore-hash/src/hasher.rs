//! Incremental id computation.

use std::io;

use crate::{HashAlgorithm, HashError, ObjectId};

enum Engine {
    Sha1(Box<sha1_checked::Sha1>),
    Sha256(sha2::Sha256),
}

/// Streaming digest over SHA-1 (with collision detection) or SHA-256.
///
/// Feed bytes with [`update`](Hasher::update) or through `io::Write`, then
/// call [`finalize`](Hasher::finalize).
pub struct Hasher {
    engine: Engine,
}

impl Hasher {
    pub fn new(algo: HashAlgorithm) -> Self {
        use digest::Digest;
        let engine = match algo {
            HashAlgorithm::Sha1 => Engine::Sha1(Box::new(sha1_checked::Sha1::new())),
            HashAlgorithm::Sha256 => Engine::Sha256(sha2::Sha256::new()),
        };
        Self { engine }
    }

    /// A hasher already primed with the `"<kind> <len>\0"` object header.
    pub fn for_object(algo: HashAlgorithm, kind: &str, len: u64) -> Self {
        let mut hasher = Self::new(algo);
        hasher.update(format!("{kind} {len}\0").as_bytes());
        hasher
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        match self.engine {
            Engine::Sha1(_) => HashAlgorithm::Sha1,
            Engine::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        use digest::Digest;
        match &mut self.engine {
            Engine::Sha1(h) => h.update(data),
            Engine::Sha256(h) => h.update(data),
        }
    }

    /// Finish hashing. Fails if SHA-1 collision detection fires.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        match self.engine {
            Engine::Sha1(h) => {
                let result = h.try_finalize();
                if result.has_collision() {
                    return Err(HashError::Sha1Collision);
                }
                ObjectId::from_bytes(result.hash().as_slice(), HashAlgorithm::Sha1)
            }
            Engine::Sha256(h) => {
                use digest::Digest;
                ObjectId::from_bytes(h.finalize().as_slice(), HashAlgorithm::Sha256)
            }
        }
    }

    /// Digest of raw bytes (pack and index trailers).
    pub fn digest(algo: HashAlgorithm, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new(algo);
        h.update(data);
        h.finalize()
    }

    /// Id of an object: digest of `"<kind> <len>\0<data>"`.
    pub fn hash_object(algo: HashAlgorithm, kind: &str, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::for_object(algo, kind, data.len() as u64);
        h.update(data);
        h.finalize()
    }
}

impl io::Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
