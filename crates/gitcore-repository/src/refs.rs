//! Minimal files-backed reference store: loose refs under the git
//! directory plus the `packed-refs` file. Loose refs shadow packed ones.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bstr::ByteSlice;
use gitcore_hash::ObjectId;
use gitcore_utils::lockfile::LockFile;
use gitcore_utils::Control;

use crate::RepoError;

pub const HEAD: &str = "HEAD";
const PACKED_REFS: &str = "packed-refs";
const MAX_SYMREF_DEPTH: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    Direct { name: String, target: ObjectId },
    Symbolic { name: String, target: String },
}

impl Reference {
    pub fn name(&self) -> &str {
        match self {
            Self::Direct { name, .. } | Self::Symbolic { name, .. } => name,
        }
    }

    pub fn target_oid(&self) -> Option<ObjectId> {
        match self {
            Self::Direct { target, .. } => Some(*target),
            Self::Symbolic { .. } => None,
        }
    }

    pub fn symbolic_target(&self) -> Option<&str> {
        match self {
            Self::Symbolic { target, .. } => Some(target),
            Self::Direct { .. } => None,
        }
    }
}

/// Check a full reference name: either `refs/...` or an all-caps
/// top-level name such as `HEAD` or `ORIG_HEAD`.
pub fn validate_ref_name(name: &str) -> Result<(), RepoError> {
    let invalid = || RepoError::InvalidRefName(name.to_string());
    if !name.contains('/') {
        let pseudo = !name.is_empty() && name.bytes().all(|b| b.is_ascii_uppercase() || b == b'_');
        return if pseudo { Ok(()) } else { Err(invalid()) };
    }
    if !name.starts_with("refs/") || name.ends_with('/') || name.ends_with('.') || name.contains("@{") {
        return Err(invalid());
    }
    for component in name.split('/') {
        if component.is_empty()
            || component.starts_with('.')
            || component.ends_with(".lock")
            || component.contains("..")
            || component
                .bytes()
                .any(|b| b < 0x20 || b == 0x7f || b" ~^:?*[\\".contains(&b))
        {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Loose and packed references of one git directory.
#[derive(Debug, Clone)]
pub struct RefStore {
    git_dir: PathBuf,
}

impl RefStore {
    pub fn new(git_dir: impl AsRef<Path>) -> Self {
        Self {
            git_dir: git_dir.as_ref().to_path_buf(),
        }
    }

    fn loose_path(&self, name: &str) -> PathBuf {
        self.git_dir.join(name)
    }

    /// Read `name` without following symbolic targets.
    pub fn read(&self, name: &str) -> Result<Option<Reference>, RepoError> {
        validate_ref_name(name)?;
        let path = self.loose_path(name);
        match fs::read(&path) {
            Ok(data) => return parse_loose(name, &data).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound || path.is_dir() => {}
            Err(e) => return Err(e.into()),
        }
        Ok(self.packed()?.remove(name).map(|target| Reference::Direct {
            name: name.to_string(),
            target,
        }))
    }

    /// Follow `name` to an object id. `None` when the chain ends at a
    /// reference that does not exist (an unborn branch).
    pub fn resolve(&self, name: &str) -> Result<Option<ObjectId>, RepoError> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.read(&current)? {
                Some(Reference::Direct { target, .. }) => return Ok(Some(target)),
                Some(Reference::Symbolic { target, .. }) => current = target,
                None => return Ok(None),
            }
        }
        Err(RepoError::SymrefLoop(name.to_string()))
    }

    /// Point `name` at `oid`, replacing the loose file under its lock.
    pub fn update(&self, name: &str, oid: &ObjectId) -> Result<(), RepoError> {
        validate_ref_name(name)?;
        self.write_loose(name, format!("{}\n", oid.to_hex()).as_bytes())?;
        tracing::debug!(name, %oid, "updated reference");
        Ok(())
    }

    pub fn set_symbolic(&self, name: &str, target: &str) -> Result<(), RepoError> {
        validate_ref_name(name)?;
        validate_ref_name(target)?;
        self.write_loose(name, format!("ref: {target}\n").as_bytes())?;
        tracing::debug!(name, target, "updated symbolic reference");
        Ok(())
    }

    fn write_loose(&self, name: &str, content: &[u8]) -> Result<(), RepoError> {
        let path = self.loose_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut lock = LockFile::acquire(&path)?;
        lock.write_all(content)?;
        lock.commit()?;
        Ok(())
    }

    /// Remove `name` from both the loose and packed stores. Returns whether
    /// anything was removed.
    pub fn delete(&self, name: &str) -> Result<bool, RepoError> {
        validate_ref_name(name)?;
        let loose = match fs::remove_file(self.loose_path(name)) {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        let mut packed = self.packed()?;
        let was_packed = packed.remove(name).is_some();
        if was_packed {
            self.write_packed(&packed)?;
        }
        Ok(loose || was_packed)
    }

    /// Every reference under `refs/`, sorted by name.
    pub fn references(&self) -> Result<Vec<Reference>, RepoError> {
        let mut all: BTreeMap<String, Reference> = self
            .packed()?
            .into_iter()
            .map(|(name, target)| (name.clone(), Reference::Direct { name, target }))
            .collect();
        let mut loose = Vec::new();
        collect_loose(&self.git_dir.join("refs"), "refs", &mut loose)?;
        for name in loose {
            if let Ok(data) = fs::read(self.loose_path(&name)) {
                all.insert(name.clone(), parse_loose(&name, &data)?);
            }
        }
        Ok(all.into_values().collect())
    }

    /// Visit references in name order until the callback aborts.
    pub fn for_each_reference(&self, mut f: impl FnMut(&Reference) -> Control) -> Result<(), RepoError> {
        for reference in &self.references()? {
            if f(reference).is_abort() {
                return Err(RepoError::Cancelled);
            }
        }
        Ok(())
    }

    fn packed(&self) -> Result<BTreeMap<String, ObjectId>, RepoError> {
        match fs::read(self.git_dir.join(PACKED_REFS)) {
            Ok(data) => parse_packed(&data),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_packed(&self, refs: &BTreeMap<String, ObjectId>) -> Result<(), RepoError> {
        let mut out = String::from("# pack-refs with: sorted\n");
        for (name, oid) in refs {
            out.push_str(&format!("{} {name}\n", oid.to_hex()));
        }
        LockFile::write_atomic(self.git_dir.join(PACKED_REFS), out.as_bytes())?;
        Ok(())
    }
}

fn parse_loose(name: &str, data: &[u8]) -> Result<Reference, RepoError> {
    let malformed = |reason: &str| RepoError::MalformedRef {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let text = data.trim().to_str().map_err(|_| malformed("not UTF-8"))?;
    if let Some(target) = text.strip_prefix("ref:") {
        let target = target.trim();
        validate_ref_name(target).map_err(|_| malformed("bad symbolic target"))?;
        return Ok(Reference::Symbolic {
            name: name.to_string(),
            target: target.to_string(),
        });
    }
    let target = ObjectId::from_hex(text).map_err(|_| malformed("bad object id"))?;
    Ok(Reference::Direct {
        name: name.to_string(),
        target,
    })
}

fn parse_packed(data: &[u8]) -> Result<BTreeMap<String, ObjectId>, RepoError> {
    let mut refs = BTreeMap::new();
    for line in data.lines() {
        if line.is_empty() || line.starts_with(b"#") || line.starts_with(b"^") {
            continue;
        }
        let malformed = || RepoError::MalformedRef {
            name: PACKED_REFS.to_string(),
            reason: format!("bad line '{}'", line.as_bstr()),
        };
        let text = line.to_str().map_err(|_| malformed())?;
        let (hex, name) = text.split_once(' ').ok_or_else(malformed)?;
        let oid = ObjectId::from_hex(hex).map_err(|_| malformed())?;
        refs.insert(name.trim().to_string(), oid);
    }
    Ok(refs)
}

fn collect_loose(dir: &Path, prefix: &str, out: &mut Vec<String>) -> Result<(), RepoError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let Some(file_name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let name = format!("{prefix}/{file_name}");
        if entry.file_type()?.is_dir() {
            collect_loose(&entry.path(), &name, out)?;
        } else if !file_name.ends_with(".lock") {
            out.push(name);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(byte: u8) -> ObjectId {
        ObjectId::Sha1([byte; 20])
    }

    #[test]
    fn ref_names() {
        for good in ["HEAD", "ORIG_HEAD", "refs/heads/main", "refs/tags/v1.0", "refs/heads/feature/x"] {
            assert!(validate_ref_name(good).is_ok(), "{good}");
        }
        for bad in ["", "head", "heads/main", "refs/heads/", "refs/heads/a..b", "refs/heads/.hidden", "refs/heads/x.lock", "refs/heads/a b", "refs/heads/a@{1}"] {
            assert!(validate_ref_name(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn loose_shadows_packed() {
        let dir = tempfile::tempdir().unwrap();
        let store = RefStore::new(dir.path());
        fs::write(
            dir.path().join(PACKED_REFS),
            format!(
                "# pack-refs with: peeled sorted\n{} refs/heads/main\n{} refs/tags/v1\n^{}\n",
                oid(1).to_hex(),
                oid(2).to_hex(),
                oid(3).to_hex()
            ),
        )
        .unwrap();
        assert_eq!(store.resolve("refs/heads/main").unwrap(), Some(oid(1)));
        assert_eq!(store.resolve("refs/tags/v1").unwrap(), Some(oid(2)));

        store.update("refs/heads/main", &oid(4)).unwrap();
        assert_eq!(store.resolve("refs/heads/main").unwrap(), Some(oid(4)));

        let names: Vec<_> = store.references().unwrap().iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, ["refs/heads/main", "refs/tags/v1"]);

        assert!(store.delete("refs/heads/main").unwrap());
        assert_eq!(store.resolve("refs/heads/main").unwrap(), None);
        assert!(!store.delete("refs/heads/main").unwrap());
    }

    #[test]
    fn symbolic_chains_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        let store = RefStore::new(dir.path());
        store.set_symbolic(HEAD, "refs/heads/main").unwrap();
        assert_eq!(store.resolve(HEAD).unwrap(), None);
        store.update("refs/heads/main", &oid(7)).unwrap();
        assert_eq!(store.resolve(HEAD).unwrap(), Some(oid(7)));

        store.set_symbolic("refs/heads/a", "refs/heads/b").unwrap();
        store.set_symbolic("refs/heads/b", "refs/heads/a").unwrap();
        assert!(matches!(store.resolve("refs/heads/a"), Err(RepoError::SymrefLoop(_))));
    }

    #[test]
    fn callback_can_stop_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let store = RefStore::new(dir.path());
        store.update("refs/heads/a", &oid(1)).unwrap();
        store.update("refs/heads/b", &oid(2)).unwrap();
        let mut seen = Vec::new();
        let err = store
            .for_each_reference(|r| {
                seen.push(r.name().to_string());
                Control::Abort
            })
            .unwrap_err();
        assert!(matches!(err, RepoError::Cancelled));
        assert_eq!(seen, ["refs/heads/a"]);
    }

    #[test]
    fn garbage_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        fs::write(dir.path().join("refs/heads/bad"), "not a hash\n").unwrap();
        let err = RefStore::new(dir.path()).read("refs/heads/bad").unwrap_err();
        assert!(matches!(err, RepoError::MalformedRef { .. }));
    }
}
