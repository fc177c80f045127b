//! The storage backend seam.

use std::io::{self, Write};

use gitcore_hash::{ObjectId, Prefix};
use gitcore_loose::{LooseStore, LooseWriter};
use gitcore_object::{ObjectType, RawObject};
use gitcore_pack::BaseLookup;

use crate::OdbError;

pub type IdIter<'a> = Box<dyn Iterator<Item = Result<ObjectId, OdbError>> + 'a>;

/// One place objects can live.
///
/// `bases` lets delta-encoded storage resolve bases held by other
/// backends; storage without deltas ignores it.
pub trait OdbBackend: Send + Sync {
    /// Short label for logs and errors.
    fn name(&self) -> &'static str;

    fn read(&self, oid: &ObjectId, bases: &dyn BaseLookup) -> Result<Option<RawObject>, OdbError>;

    fn read_header(
        &self,
        oid: &ObjectId,
        bases: &dyn BaseLookup,
    ) -> Result<Option<(ObjectType, u64)>, OdbError>;

    fn contains(&self, oid: &ObjectId) -> bool;

    /// Up to `limit` ids matching `prefix`.
    fn find_prefix(&self, prefix: &Prefix, limit: usize) -> Result<Vec<ObjectId>, OdbError>;

    /// Every id this backend holds, each once.
    fn ids(&self) -> Result<IdIter<'_>, OdbError>;

    fn is_writable(&self) -> bool {
        false
    }

    fn write(&self, _kind: ObjectType, _data: &[u8]) -> Result<ObjectId, OdbError> {
        Err(OdbError::ReadOnly(self.name()))
    }

    fn write_stream(&self, _kind: ObjectType, _size: u64) -> Result<Box<dyn ObjectStream>, OdbError> {
        Err(OdbError::ReadOnly(self.name()))
    }

    /// Pick up storage that appeared since opening.
    fn refresh(&self) -> Result<(), OdbError> {
        Ok(())
    }
}

/// A backend's half of a streaming write.
pub trait ObjectStream: Write + Send {
    fn commit(self: Box<Self>) -> Result<ObjectId, OdbError>;
}

impl ObjectStream for LooseWriter {
    fn commit(self: Box<Self>) -> Result<ObjectId, OdbError> {
        Ok(LooseWriter::commit(*self)?)
    }
}

/// Streaming write handed out by [`ObjectDatabase::write_stream`](crate::ObjectDatabase::write_stream).
///
/// The id is known only after [`commit`](Self::commit); dropping the
/// stream first discards everything written.
pub struct OdbWriteStream {
    inner: Box<dyn ObjectStream>,
}

impl OdbWriteStream {
    pub(crate) fn new(inner: Box<dyn ObjectStream>) -> Self {
        Self { inner }
    }

    pub fn commit(self) -> Result<ObjectId, OdbError> {
        self.inner.commit()
    }
}

impl Write for OdbWriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl OdbBackend for LooseStore {
    fn name(&self) -> &'static str {
        "loose"
    }

    fn read(&self, oid: &ObjectId, _bases: &dyn BaseLookup) -> Result<Option<RawObject>, OdbError> {
        Ok(LooseStore::read(self, oid)?)
    }

    fn read_header(
        &self,
        oid: &ObjectId,
        _bases: &dyn BaseLookup,
    ) -> Result<Option<(ObjectType, u64)>, OdbError> {
        Ok(LooseStore::read_header(self, oid)?.map(|(kind, size)| (kind, size as u64)))
    }

    fn contains(&self, oid: &ObjectId) -> bool {
        LooseStore::contains(self, oid)
    }

    fn find_prefix(&self, prefix: &Prefix, limit: usize) -> Result<Vec<ObjectId>, OdbError> {
        let mut found = LooseStore::find_prefix(self, prefix)?;
        found.truncate(limit);
        Ok(found)
    }

    fn ids(&self) -> Result<IdIter<'_>, OdbError> {
        Ok(Box::new(self.iter()?.map(|r| r.map_err(OdbError::from))))
    }

    fn is_writable(&self) -> bool {
        true
    }

    fn write(&self, kind: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError> {
        Ok(LooseStore::write(self, kind, data)?)
    }

    fn write_stream(&self, kind: ObjectType, size: u64) -> Result<Box<dyn ObjectStream>, OdbError> {
        Ok(Box::new(self.writer(kind, size)?))
    }
}

/// Wraps a backend so it never takes writes; used for alternates.
pub(crate) struct ReadOnly<B>(pub B);

impl<B: OdbBackend> OdbBackend for ReadOnly<B> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn read(&self, oid: &ObjectId, bases: &dyn BaseLookup) -> Result<Option<RawObject>, OdbError> {
        self.0.read(oid, bases)
    }

    fn read_header(
        &self,
        oid: &ObjectId,
        bases: &dyn BaseLookup,
    ) -> Result<Option<(ObjectType, u64)>, OdbError> {
        self.0.read_header(oid, bases)
    }

    fn contains(&self, oid: &ObjectId) -> bool {
        self.0.contains(oid)
    }

    fn find_prefix(&self, prefix: &Prefix, limit: usize) -> Result<Vec<ObjectId>, OdbError> {
        self.0.find_prefix(prefix, limit)
    }

    fn ids(&self) -> Result<IdIter<'_>, OdbError> {
        self.0.ids()
    }

    fn refresh(&self) -> Result<(), OdbError> {
        self.0.refresh()
    }
}
