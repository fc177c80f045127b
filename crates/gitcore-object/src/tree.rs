use std::cmp::Ordering;

use bstr::{BStr, BString, ByteSlice};
use gitcore_hash::{HashAlgorithm, ObjectId};

use crate::{ObjectError, ObjectType};

/// Mode of a tree entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileMode {
    Regular,
    Executable,
    Symlink,
    Gitlink,
    Tree,
    /// Preserved so odd historical modes survive a rewrite.
    Unknown(u32),
}

impl FileMode {
    /// Parse the octal ASCII form used inside tree objects.
    pub fn from_bytes(s: &[u8]) -> Result<Self, ObjectError> {
        let invalid = || ObjectError::InvalidFileMode(BString::from(s));
        if s.is_empty() || s.len() > 7 {
            return Err(invalid());
        }
        let mut raw = 0u32;
        for &c in s {
            if !(b'0'..=b'7').contains(&c) {
                return Err(invalid());
            }
            raw = raw * 8 + u32::from(c - b'0');
        }
        Ok(Self::from_raw(raw))
    }

    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0o100644 => Self::Regular,
            0o100755 => Self::Executable,
            0o120000 => Self::Symlink,
            0o160000 => Self::Gitlink,
            0o040000 => Self::Tree,
            other => Self::Unknown(other),
        }
    }

    /// Canonicalize a filesystem or index mode the way trees store it.
    pub fn from_stat_mode(mode: u32) -> Self {
        match mode & 0o170000 {
            0o040000 => Self::Tree,
            0o120000 => Self::Symlink,
            0o160000 => Self::Gitlink,
            _ if mode & 0o111 != 0 => Self::Executable,
            _ => Self::Regular,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            Self::Regular => 0o100644,
            Self::Executable => 0o100755,
            Self::Symlink => 0o120000,
            Self::Gitlink => 0o160000,
            Self::Tree => 0o040000,
            Self::Unknown(v) => v,
        }
    }

    /// Octal without leading zeros (`40000` for trees).
    pub fn as_bytes(self) -> BString {
        BString::from(format!("{:o}", self.raw()))
    }

    pub fn is_tree(self) -> bool {
        self == Self::Tree
    }

    /// Regular or executable file.
    pub fn is_file(self) -> bool {
        matches!(self, Self::Regular | Self::Executable)
    }

    pub fn is_symlink(self) -> bool {
        self == Self::Symlink
    }

    pub fn is_gitlink(self) -> bool {
        self == Self::Gitlink
    }

    /// Kind of object an entry with this mode points at.
    pub fn object_type(self) -> ObjectType {
        match self {
            Self::Tree => ObjectType::Tree,
            Self::Gitlink => ObjectType::Commit,
            _ => ObjectType::Blob,
        }
    }

    /// True when switching between the two modes is not a type change
    /// (only the executable bit differs, or nothing does).
    pub fn same_content_type(self, other: Self) -> bool {
        (self.is_file() && other.is_file()) || self == other
    }
}

/// Order two entry names, treating trees as if their name ended in `/`.
pub fn cmp_tree_names(a: &[u8], a_is_tree: bool, b: &[u8], b_is_tree: bool) -> Ordering {
    let common = a.len().min(b.len());
    a[..common].cmp(&b[..common]).then_with(|| {
        let tail = |name: &[u8], is_tree: bool| match name.get(common) {
            Some(&c) => c,
            None if is_tree => b'/',
            None => 0,
        };
        tail(a, a_is_tree).cmp(&tail(b, b_is_tree))
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: FileMode,
    pub name: BString,
    pub oid: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: FileMode, name: impl Into<BString>, oid: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            oid,
        }
    }

    pub fn cmp_entries(a: &TreeEntry, b: &TreeEntry) -> Ordering {
        cmp_tree_names(&a.name, a.mode.is_tree(), &b.name, b.mode.is_tree())
    }
}

impl PartialOrd for TreeEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        Self::cmp_entries(self, other)
    }
}

/// A directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    pub entries: Vec<TreeEntry>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse with SHA-1 entry ids.
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        Self::parse_with(content, HashAlgorithm::Sha1)
    }

    /// Parse `<octal mode> <name>\0<raw id>` records.
    pub fn parse_with(content: &[u8], algo: HashAlgorithm) -> Result<Self, ObjectError> {
        let id_len = algo.digest_len();
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < content.len() {
            let rest = &content[pos..];
            let space = rest.find_byte(b' ').ok_or(ObjectError::InvalidTreeEntry {
                offset: pos,
                reason: "missing space after mode",
            })?;
            let mode = FileMode::from_bytes(&rest[..space]).map_err(|_| ObjectError::InvalidTreeEntry {
                offset: pos,
                reason: "invalid mode",
            })?;
            let nul = rest[space..].find_byte(0).map(|n| space + n).ok_or(ObjectError::InvalidTreeEntry {
                offset: pos,
                reason: "missing NUL after name",
            })?;
            let name = &rest[space + 1..nul];
            if name.is_empty() || name.contains(&b'/') {
                return Err(ObjectError::InvalidTreeEntry {
                    offset: pos,
                    reason: "invalid entry name",
                });
            }
            let id_bytes = rest.get(nul + 1..nul + 1 + id_len).ok_or(ObjectError::InvalidTreeEntry {
                offset: pos,
                reason: "truncated id",
            })?;

            entries.push(TreeEntry {
                mode,
                name: BString::from(name),
                oid: ObjectId::from_bytes(id_bytes, algo)?,
            });
            pos += nul + 1 + id_len;
        }

        Ok(Self { entries })
    }

    /// Canonical encoding; entries are written in tree order.
    pub fn serialize_content(&self) -> Vec<u8> {
        let mut sorted: Vec<&TreeEntry> = self.entries.iter().collect();
        sorted.sort();
        let mut out = Vec::with_capacity(self.entries.len() * 48);
        for entry in sorted {
            out.extend_from_slice(&entry.mode.as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        out
    }

    pub fn sort(&mut self) {
        self.entries.sort();
    }

    pub fn find(&self, name: &BStr) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name.as_bstr() == name)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TreeEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(hex: &str) -> ObjectId {
        ObjectId::from_hex(hex).unwrap()
    }

    #[test]
    fn modes() {
        assert_eq!(FileMode::from_bytes(b"40000").unwrap(), FileMode::Tree);
        assert_eq!(FileMode::from_bytes(b"100755").unwrap(), FileMode::Executable);
        assert_eq!(FileMode::from_bytes(b"100664").unwrap(), FileMode::Unknown(0o100664));
        assert!(FileMode::from_bytes(b"10x644").is_err());
        assert_eq!(FileMode::Tree.as_bytes(), "40000");
        assert_eq!(FileMode::from_stat_mode(0o100775), FileMode::Executable);
        assert_eq!(FileMode::from_stat_mode(0o100600), FileMode::Regular);
        assert!(FileMode::Regular.same_content_type(FileMode::Executable));
        assert!(!FileMode::Regular.same_content_type(FileMode::Symlink));
        assert_eq!(FileMode::Gitlink.object_type(), ObjectType::Commit);
    }

    #[test]
    fn trees_sort_with_trailing_slash() {
        assert_eq!(cmp_tree_names(b"foo", true, b"foo.c", false), Ordering::Greater);
        assert_eq!(cmp_tree_names(b"foo", true, b"foo0", false), Ordering::Less);
        assert_eq!(cmp_tree_names(b"foo", false, b"foo.c", false), Ordering::Less);
        assert_eq!(cmp_tree_names(b"a", false, b"a", false), Ordering::Equal);
    }

    #[test]
    fn parse_and_serialize() {
        let blob = oid("e69de29bb2d1d6434b8b29ae775ad8c2e48c5391");
        let sub = oid("4b825dc642cb6eb9a060e54bf8d69288fbee4904");
        let tree = Tree {
            entries: vec![
                TreeEntry::new(FileMode::Tree, "foo", sub),
                TreeEntry::new(FileMode::Regular, "foo.c", blob),
            ],
        };
        let bytes = tree.serialize_content();
        let parsed = Tree::parse(&bytes).unwrap();
        assert_eq!(parsed.entries[0].name, "foo.c");
        assert_eq!(parsed.entries[1].name, "foo");
        assert_eq!(parsed.find(BStr::new("foo")).unwrap().oid, sub);
    }

    #[test]
    fn rejects_bad_entries() {
        let mut truncated = b"100644 a\0".to_vec();
        truncated.extend_from_slice(&[0u8; 10]);
        assert!(Tree::parse(&truncated).is_err());

        let mut slash = b"100644 a/b\0".to_vec();
        slash.extend_from_slice(&[0u8; 20]);
        assert!(Tree::parse(&slash).is_err());
    }

    #[test]
    fn sha256_entries() {
        let id = HashAlgorithm::Sha256.null_oid();
        let mut data = b"100644 f\0".to_vec();
        data.extend_from_slice(id.as_bytes());
        let tree = Tree::parse_with(&data, HashAlgorithm::Sha256).unwrap();
        assert_eq!(tree.entries[0].oid, id);
    }
}
