use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use gitcore_hash::{HashAlgorithm, ObjectId, Prefix};
use gitcore_object::{ObjectType, RawObject};
use gitcore_pack::{BaseLookup, PackFile};

use crate::backend::{IdIter, OdbBackend};
use crate::OdbError;

/// Every `pack-*.pack` with a matching `.idx` in one directory.
///
/// Packs are searched newest first. A pack that fails to open is logged and
/// skipped so the rest of the store stays readable.
pub struct PackDirBackend {
    dir: PathBuf,
    algo: HashAlgorithm,
    max_delta_depth: usize,
    packs: RwLock<Vec<Arc<PackFile>>>,
}

impl PackDirBackend {
    pub fn open(dir: impl AsRef<Path>, algo: HashAlgorithm, max_delta_depth: usize) -> Result<Self, OdbError> {
        let backend = Self {
            dir: dir.as_ref().to_path_buf(),
            algo,
            max_delta_depth,
            packs: RwLock::new(Vec::new()),
        };
        backend.rescan()?;
        Ok(backend)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pack_count(&self) -> usize {
        self.snapshot().len()
    }

    fn snapshot(&self) -> Vec<Arc<PackFile>> {
        self.packs.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn rescan(&self) -> Result<(), OdbError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_idx = path.extension().is_some_and(|e| e == "idx");
            let is_pack_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("pack-"));
            if !is_idx || !is_pack_name {
                continue;
            }
            let pack_path = path.with_extension("pack");
            if let Ok(meta) = fs::metadata(&pack_path) {
                found.push((meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), pack_path));
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let previous = self.snapshot();
        let mut packs = Vec::with_capacity(found.len());
        for (_, path) in found {
            if let Some(open) = previous.iter().find(|p| p.path() == path) {
                packs.push(Arc::clone(open));
                continue;
            }
            match PackFile::open(&path, self.algo) {
                Ok(mut pack) => {
                    pack.set_max_delta_depth(self.max_delta_depth);
                    packs.push(Arc::new(pack));
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable pack"),
            }
        }
        tracing::debug!(dir = %self.dir.display(), packs = packs.len(), "scanned packs");
        *self.packs.write().unwrap_or_else(PoisonError::into_inner) = packs;
        Ok(())
    }
}

impl OdbBackend for PackDirBackend {
    fn name(&self) -> &'static str {
        "pack"
    }

    fn read(&self, oid: &ObjectId, bases: &dyn BaseLookup) -> Result<Option<RawObject>, OdbError> {
        for pack in self.snapshot() {
            if let Some(obj) = pack.read(oid, bases)? {
                return Ok(Some(obj));
            }
        }
        Ok(None)
    }

    fn read_header(
        &self,
        oid: &ObjectId,
        bases: &dyn BaseLookup,
    ) -> Result<Option<(ObjectType, u64)>, OdbError> {
        for pack in self.snapshot() {
            if let Some(header) = pack.read_header(oid, bases)? {
                return Ok(Some(header));
            }
        }
        Ok(None)
    }

    fn contains(&self, oid: &ObjectId) -> bool {
        self.snapshot().iter().any(|p| p.contains(oid))
    }

    fn find_prefix(&self, prefix: &Prefix, limit: usize) -> Result<Vec<ObjectId>, OdbError> {
        let mut found: Vec<ObjectId> = Vec::new();
        for pack in self.snapshot() {
            for oid in pack.index().find_prefix(prefix, limit) {
                if !found.contains(&oid) {
                    found.push(oid);
                }
            }
            if found.len() >= limit {
                found.truncate(limit);
                break;
            }
        }
        Ok(found)
    }

    fn ids(&self) -> Result<IdIter<'_>, OdbError> {
        let mut ids: Vec<ObjectId> = self
            .snapshot()
            .iter()
            .flat_map(|p| p.index().ids().collect::<Vec<_>>())
            .collect();
        ids.sort();
        ids.dedup();
        Ok(Box::new(ids.into_iter().map(Ok)))
    }

    fn refresh(&self) -> Result<(), OdbError> {
        self.rescan()
    }
}
