use bstr::{BStr, BString};
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_object::FileMode;

use super::{read_cstr, read_oid};
use crate::IndexError;

const SIG: &[u8; 4] = b"REUC";

/// The conflict stages a path had before it was resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolveUndo {
    pub entries: Vec<ResolveUndoEntry>,
}

/// Ancestor, ours and theirs, each absent when that side had no file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolveUndoEntry {
    pub path: BString,
    pub stages: [Option<(FileMode, ObjectId)>; 3],
}

impl ResolveUndo {
    pub const SIGNATURE: &'static [u8; 4] = SIG;

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, path: &BStr) -> Option<&ResolveUndoEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Record `entry`, replacing an older record for the same path.
    pub fn record(&mut self, entry: ResolveUndoEntry) {
        match self.entries.binary_search_by(|e| e.path.cmp(&entry.path)) {
            Ok(i) => self.entries[i] = entry,
            Err(i) => self.entries.insert(i, entry),
        }
    }

    pub fn remove(&mut self, path: &BStr) -> Option<ResolveUndoEntry> {
        let i = self.entries.iter().position(|e| e.path == path)?;
        Some(self.entries.remove(i))
    }

    pub fn parse(data: &[u8], algo: HashAlgorithm) -> Result<Self, IndexError> {
        let mut entries = Vec::new();
        let mut cursor = 0;
        while cursor < data.len() {
            let path = BString::from(read_cstr(data, &mut cursor, SIG, "path")?);
            let mut modes = [0u32; 3];
            for mode in &mut modes {
                let text = read_cstr(data, &mut cursor, SIG, "mode")?;
                *mode = std::str::from_utf8(text)
                    .ok()
                    .and_then(|t| u32::from_str_radix(t, 8).ok())
                    .ok_or_else(|| IndexError::extension(SIG, "mode is not octal"))?;
            }
            let mut stages = [None; 3];
            for (slot, &mode) in stages.iter_mut().zip(&modes) {
                if mode != 0 {
                    *slot = Some((FileMode::from_raw(mode), read_oid(data, &mut cursor, algo, SIG)?));
                }
            }
            entries.push(ResolveUndoEntry { path, stages });
        }
        Ok(Self { entries })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for entry in &self.entries {
            buf.extend_from_slice(&entry.path);
            buf.push(0);
            for stage in &entry.stages {
                let raw = stage.map_or(0, |(mode, _)| mode.raw());
                buf.extend_from_slice(format!("{raw:o}").as_bytes());
                buf.push(0);
            }
            for (_, oid) in entry.stages.iter().flatten() {
                buf.extend_from_slice(oid.as_bytes());
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(b: u8) -> ObjectId {
        ObjectId::from_bytes(&[b; 20], HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn missing_sides_have_no_id() {
        let reuc = ResolveUndo {
            entries: vec![ResolveUndoEntry {
                path: "file.txt".into(),
                stages: [None, Some((FileMode::Regular, oid(2))), Some((FileMode::Executable, oid(3)))],
            }],
        };
        let bytes = reuc.serialize();
        assert!(bytes.starts_with(b"file.txt\x000\x00100644\x00100755\x00"));
        assert_eq!(bytes.len(), "file.txt".len() + 1 + 2 + 7 + 7 + 40);
        assert_eq!(ResolveUndo::parse(&bytes, HashAlgorithm::Sha1).unwrap(), reuc);
    }

    #[test]
    fn truncated_id_is_corrupt() {
        let err = ResolveUndo::parse(b"p\x00100644\x000\x000\x00abc", HashAlgorithm::Sha1).unwrap_err();
        assert!(matches!(err, IndexError::BadExtension { .. }));
    }

    #[test]
    fn record_keeps_paths_sorted_and_unique() {
        let mut reuc = ResolveUndo::default();
        for p in ["b", "a", "b"] {
            reuc.record(ResolveUndoEntry {
                path: p.into(),
                stages: [Some((FileMode::Regular, oid(1))), None, None],
            });
        }
        let paths: Vec<_> = reuc.entries.iter().map(|e| e.path.to_string()).collect();
        assert_eq!(paths, ["a", "b"]);
        assert!(reuc.remove(BStr::new("a")).is_some());
        assert!(reuc.get(BStr::new("a")).is_none());
    }
}
