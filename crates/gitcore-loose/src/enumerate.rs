use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use gitcore_hash::{hex, ObjectId, Prefix};

use crate::{LooseError, LooseStore};

fn fan_out_dirs(objects_dir: &Path) -> Result<Vec<(u8, PathBuf)>, LooseError> {
    let mut dirs = Vec::new();
    let entries = match fs::read_dir(objects_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(dirs),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let mut byte = [0u8; 1];
        if name.len() == 2
            && hex::decode_into(name.as_bytes(), &mut byte).is_ok()
            && entry.file_type()?.is_dir()
        {
            dirs.push((byte[0], entry.path()));
        }
    }
    dirs.sort_by_key(|(b, _)| *b);
    Ok(dirs)
}

fn ids_in_dir(dir: &Path, first: u8, hex_len: usize) -> Result<Vec<ObjectId>, LooseError> {
    let prefix = hex::encode_to_string(&[first]);
    let mut ids = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ids),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if name.len() + 2 != hex_len {
            continue;
        }
        if let Ok(oid) = ObjectId::from_hex(&format!("{prefix}{name}")) {
            ids.push(oid);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Yields every loose id, fan-out directory by directory, each sorted.
pub struct LooseIdIter {
    dirs: std::vec::IntoIter<(u8, PathBuf)>,
    current: std::vec::IntoIter<ObjectId>,
    hex_len: usize,
}

impl Iterator for LooseIdIter {
    type Item = Result<ObjectId, LooseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(oid) = self.current.next() {
                return Some(Ok(oid));
            }
            let (first, dir) = self.dirs.next()?;
            match ids_in_dir(&dir, first, self.hex_len) {
                Ok(ids) => self.current = ids.into_iter(),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

impl LooseStore {
    pub fn iter(&self) -> Result<LooseIdIter, LooseError> {
        Ok(LooseIdIter {
            dirs: fan_out_dirs(&self.objects_dir)?.into_iter(),
            current: Vec::new().into_iter(),
            hex_len: self.algo.hex_len(),
        })
    }

    /// Ids matching `prefix`; reads a single fan-out directory.
    pub fn find_prefix(&self, prefix: &Prefix) -> Result<Vec<ObjectId>, LooseError> {
        let first = prefix.as_padded_id().first_byte();
        let dir = self.objects_dir.join(hex::encode_to_string(&[first]));
        Ok(ids_in_dir(&dir, first, self.algo.hex_len())?
            .into_iter()
            .filter(|oid| prefix.matches(oid))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_hash::HashAlgorithm;
    use gitcore_object::ObjectType;

    #[test]
    fn enumerates_written_objects() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let mut expected: Vec<_> = (0..20)
            .map(|i| store.write(ObjectType::Blob, format!("blob {i}").as_bytes()).unwrap())
            .collect();
        expected.sort();
        fs::create_dir_all(dir.path().join("pack")).unwrap();
        fs::create_dir_all(dir.path().join("info")).unwrap();

        let found: Vec<_> = store.iter().unwrap().collect::<Result<_, _>>().unwrap();
        assert_eq!(found, expected);
    }

    #[test]
    fn prefix_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let store = LooseStore::open(dir.path(), HashAlgorithm::Sha1);
        let oid = store.write(ObjectType::Blob, b"some content").unwrap();
        let hit = Prefix::from_hex("f0eec8", HashAlgorithm::Sha1).unwrap();
        assert_eq!(store.find_prefix(&hit).unwrap(), vec![oid]);
        let miss = Prefix::from_hex("f0eec9", HashAlgorithm::Sha1).unwrap();
        assert!(store.find_prefix(&miss).unwrap().is_empty());
    }

    #[test]
    fn missing_directory_is_empty() {
        let store = LooseStore::open("/nonexistent/objects", HashAlgorithm::Sha1);
        assert_eq!(store.iter().unwrap().count(), 0);
    }
}
