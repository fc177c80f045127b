use std::collections::HashSet;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use gitcore_hash::hasher::Hasher;
use gitcore_hash::{HashAlgorithm, ObjectId, Prefix};
use gitcore_loose::LooseStore;
use gitcore_object::{Commit, Object, ObjectCache, ObjectType, RawObject, Tree};
use gitcore_pack::{BaseLookup, Indexer, IndexerOptions, IndexerProgress};
use gitcore_utils::Control;

use crate::alternates::load_alternates;
use crate::backend::{IdIter, OdbBackend, OdbWriteStream, ReadOnly};
use crate::packs::PackDirBackend;
use crate::{OdbError, OdbOptions, LOOSE_PRIORITY, PACKED_PRIORITY};

const INDEX_CHUNK: usize = 64 * 1024;

struct Slot {
    backend: Arc<dyn OdbBackend>,
    priority: i32,
    alternate: bool,
}

/// Prioritized composition of object backends.
///
/// Backends are consulted local-first, then by descending priority, then in
/// the order they were added. Reads take the first hit; a backend that
/// fails on an object it holds fails the read instead of being skipped.
pub struct ObjectDatabase {
    objects_dir: Option<PathBuf>,
    options: OdbOptions,
    backends: Vec<Slot>,
    cache: Mutex<ObjectCache>,
}

impl ObjectDatabase {
    /// An empty database with no backends.
    pub fn new(options: OdbOptions) -> Self {
        Self {
            objects_dir: None,
            options,
            backends: Vec::new(),
            cache: Mutex::new(ObjectCache::new(options.cache_capacity)),
        }
    }

    /// Open `objects_dir` with its loose store, packs and alternates.
    pub fn open(objects_dir: impl AsRef<Path>) -> Result<Self, OdbError> {
        Self::open_with(objects_dir, OdbOptions::default())
    }

    pub fn open_with(objects_dir: impl AsRef<Path>, options: OdbOptions) -> Result<Self, OdbError> {
        let dir = objects_dir.as_ref().to_path_buf();
        let mut db = Self::new(options);

        let mut loose = LooseStore::open(&dir, options.hash_algorithm);
        loose.set_compression_level(options.compression_level);
        db.add_backend(loose, LOOSE_PRIORITY);
        let packs = PackDirBackend::open(dir.join("pack"), options.hash_algorithm, options.max_delta_depth)?;
        db.add_backend(packs, PACKED_PRIORITY);

        for backend in load_alternates(&dir, &options)? {
            db.insert(backend, 0, true);
        }
        tracing::debug!(dir = %dir.display(), backends = db.backends.len(), "opened object database");
        db.objects_dir = Some(dir);
        Ok(db)
    }

    pub fn objects_dir(&self) -> Option<&Path> {
        self.objects_dir.as_deref()
    }

    pub fn options(&self) -> &OdbOptions {
        &self.options
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.options.hash_algorithm
    }

    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Add a local backend. Writable local backends become write targets in
    /// priority order.
    pub fn add_backend(&mut self, backend: impl OdbBackend + 'static, priority: i32) {
        self.insert(Arc::new(backend), priority, false);
    }

    /// Add a backend searched after every local one and never written to.
    pub fn add_alternate_backend(&mut self, backend: impl OdbBackend + 'static, priority: i32) {
        self.insert(Arc::new(ReadOnly(backend)), priority, true);
    }

    /// Add another objects directory (and its own alternates) as an alternate.
    pub fn add_alternate(&mut self, objects_dir: impl AsRef<Path>) -> Result<(), OdbError> {
        let dir = objects_dir.as_ref();
        let algo = self.options.hash_algorithm;
        self.add_alternate_backend(LooseStore::open(dir, algo), 0);
        self.add_alternate_backend(
            PackDirBackend::open(dir.join("pack"), algo, self.options.max_delta_depth)?,
            0,
        );
        for backend in load_alternates(dir, &self.options)? {
            self.insert(backend, 0, true);
        }
        Ok(())
    }

    fn insert(&mut self, backend: Arc<dyn OdbBackend>, priority: i32, alternate: bool) {
        tracing::debug!(backend = backend.name(), priority, alternate, "adding backend");
        self.backends.push(Slot {
            backend,
            priority,
            alternate,
        });
        // Stable: equal keys keep insertion order.
        self.backends
            .sort_by(|a, b| a.alternate.cmp(&b.alternate).then(b.priority.cmp(&a.priority)));
    }

    /// Rescan every backend for storage added since opening.
    pub fn refresh(&self) -> Result<(), OdbError> {
        for slot in &self.backends {
            slot.backend.refresh()?;
        }
        Ok(())
    }

    pub fn exists(&self, oid: &ObjectId) -> bool {
        self.backends.iter().any(|s| s.backend.contains(oid))
    }

    /// Resolve an abbreviated hex id that must match exactly one object.
    pub fn exists_prefix(&self, hex: &str) -> Result<ObjectId, OdbError> {
        let prefix = Prefix::from_hex(hex, self.options.hash_algorithm)?;
        if prefix.is_full() {
            let oid = *prefix.as_padded_id();
            return if self.exists(&oid) {
                Ok(oid)
            } else {
                Err(OdbError::PrefixNotFound(hex.to_owned()))
            };
        }

        let mut found: Vec<ObjectId> = Vec::new();
        for slot in &self.backends {
            for oid in slot.backend.find_prefix(&prefix, usize::MAX)? {
                if !found.contains(&oid) {
                    found.push(oid);
                }
            }
        }
        match found.as_slice() {
            [] => Err(OdbError::PrefixNotFound(hex.to_owned())),
            [one] => Ok(*one),
            many => Err(OdbError::Ambiguous {
                prefix: hex.to_owned(),
                count: many.len(),
            }),
        }
    }

    /// The object, or `None` when no backend has it.
    pub fn try_read(&self, oid: &ObjectId) -> Result<Option<RawObject>, OdbError> {
        for slot in &self.backends {
            if let Some(obj) = slot.backend.read(oid, self)? {
                tracing::trace!(%oid, backend = slot.backend.name(), "read object");
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    pub fn read(&self, oid: &ObjectId) -> Result<RawObject, OdbError> {
        self.try_read(oid)?.ok_or(OdbError::NotFound(*oid))
    }

    /// Kind and size without inflating the body where the backend allows.
    pub fn read_header(&self, oid: &ObjectId) -> Result<(ObjectType, u64), OdbError> {
        for slot in &self.backends {
            if let Some(header) = slot.backend.read_header(oid, self)? {
                return Ok(header);
            }
        }
        Err(OdbError::NotFound(*oid))
    }

    /// Read through the shared LRU cache.
    pub fn read_cached(&self, oid: &ObjectId) -> Result<Arc<RawObject>, OdbError> {
        if let Some(hit) = self.lock_cache().get(oid) {
            return Ok(hit);
        }
        let obj = Arc::new(self.read(oid)?);
        self.lock_cache().insert(*oid, Arc::clone(&obj));
        Ok(obj)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, ObjectCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read and require a particular kind.
    pub fn read_as(&self, oid: &ObjectId, expected: ObjectType) -> Result<Arc<RawObject>, OdbError> {
        let obj = self.read_cached(oid)?;
        if obj.kind != expected {
            return Err(OdbError::WrongKind {
                oid: *oid,
                expected,
                actual: obj.kind,
            });
        }
        Ok(obj)
    }

    pub fn read_object(&self, oid: &ObjectId) -> Result<Object, OdbError> {
        Ok(self.read_cached(oid)?.decode(self.options.hash_algorithm)?)
    }

    pub fn read_tree(&self, oid: &ObjectId) -> Result<Tree, OdbError> {
        let raw = self.read_as(oid, ObjectType::Tree)?;
        Ok(Tree::parse_with(&raw.data, self.options.hash_algorithm)?)
    }

    pub fn read_commit(&self, oid: &ObjectId) -> Result<Commit, OdbError> {
        let raw = self.read_as(oid, ObjectType::Commit)?;
        Ok(Commit::parse(&raw.data)?)
    }

    fn primary(&self) -> Result<&Arc<dyn OdbBackend>, OdbError> {
        self.backends
            .iter()
            .find(|s| !s.alternate && s.backend.is_writable())
            .map(|s| &s.backend)
            .ok_or(OdbError::NoWritableBackend)
    }

    /// Store `data` as an object of `kind`. Writing content that already
    /// exists anywhere on the search path touches nothing.
    pub fn write(&self, kind: ObjectType, data: &[u8]) -> Result<ObjectId, OdbError> {
        let oid = Hasher::hash_object(self.options.hash_algorithm, kind.name(), data)?;
        if self.exists(&oid) {
            tracing::trace!(%oid, "object already present");
            return Ok(oid);
        }
        let written = self.primary()?.write(kind, data)?;
        tracing::debug!(oid = %written, %kind, size = data.len(), "wrote object");
        Ok(written)
    }

    pub fn write_object(&self, object: &Object) -> Result<ObjectId, OdbError> {
        self.write(object.object_type(), &object.serialize_content())
    }

    /// Start a streaming write of exactly `size` bytes.
    pub fn write_stream(&self, kind: ObjectType, size: u64) -> Result<OdbWriteStream, OdbError> {
        Ok(OdbWriteStream::new(self.primary()?.write_stream(kind, size)?))
    }

    /// Visit every id, backend by backend. Ids stored in more than one
    /// backend are visited once per backend.
    pub fn for_each_id(&self, mut f: impl FnMut(&ObjectId) -> Control) -> Result<(), OdbError> {
        for slot in &self.backends {
            for oid in slot.backend.ids()? {
                if f(&oid?).is_abort() {
                    return Err(OdbError::Cancelled);
                }
            }
        }
        Ok(())
    }

    /// Every distinct id across all backends.
    pub fn iter_ids(&self) -> IdIter<'_> {
        let mut seen = HashSet::new();
        Box::new(
            self.backends
                .iter()
                .flat_map(|slot| match slot.backend.ids() {
                    Ok(ids) => ids,
                    Err(e) => Box::new(std::iter::once(Err(e))) as IdIter<'_>,
                })
                .filter(move |r| match r {
                    Ok(oid) => seen.insert(*oid),
                    Err(_) => true,
                }),
        )
    }

    /// An indexer that writes into `objects/pack` and resolves thin-pack
    /// bases against this database.
    pub fn pack_indexer(&self, options: IndexerOptions) -> Result<Indexer<'_>, OdbError> {
        let dir = self.objects_dir.as_ref().ok_or(OdbError::NoDirectory)?.join("pack");
        fs::create_dir_all(&dir)?;
        Ok(Indexer::new(dir, options).with_bases(self))
    }

    /// Index a whole pack stream and make its objects readable.
    pub fn index_pack(&self, mut stream: impl Read) -> Result<IndexerProgress, OdbError> {
        let options = IndexerOptions {
            hash_algorithm: self.options.hash_algorithm,
            ..IndexerOptions::default()
        };
        let progress = {
            let mut indexer = self.pack_indexer(options)?;
            let mut buf = vec![0u8; INDEX_CHUNK];
            loop {
                let n = stream.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                indexer.append(&buf[..n])?;
            }
            indexer.commit()?
        };
        self.refresh()?;
        Ok(progress)
    }
}

impl BaseLookup for ObjectDatabase {
    fn find_base(&self, oid: &ObjectId) -> Option<RawObject> {
        match self.try_read(oid) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(%oid, error = %e, "delta base unreadable");
                None
            }
        }
    }
}

impl std::fmt::Debug for ObjectDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.backends.iter().map(|s| s.backend.name()).collect();
        f.debug_struct("ObjectDatabase")
            .field("objects_dir", &self.objects_dir)
            .field("backends", &names)
            .finish()
    }
}
