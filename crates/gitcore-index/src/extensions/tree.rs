//! `TREE`: tree ids cached per directory so unchanged subtrees need not
//! be rebuilt. A node with a negative entry count is invalid.

use bstr::{BStr, BString, ByteSlice};
use gitcore_hash::{HashAlgorithm, ObjectId};

use super::{read_cstr, read_oid};
use crate::IndexError;

const SIG: &[u8; 4] = b"TREE";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTree {
    pub root: CacheTreeNode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTreeNode {
    /// Directory name; empty for the root.
    pub name: BString,
    /// Index entries covered, or -1 when invalidated.
    pub entry_count: i32,
    pub oid: Option<ObjectId>,
    pub children: Vec<CacheTreeNode>,
}

impl CacheTreeNode {
    pub fn new(name: impl Into<BString>, entry_count: i32, oid: ObjectId) -> Self {
        Self {
            name: name.into(),
            entry_count,
            oid: Some(oid),
            children: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.entry_count >= 0 && self.oid.is_some()
    }

    fn invalidate(&mut self) {
        self.entry_count = -1;
        self.oid = None;
    }

    /// Valid cached id of the directory at `path` below this node.
    pub fn find(&self, path: &[u8]) -> Option<&CacheTreeNode> {
        if path.is_empty() {
            return Some(self);
        }
        let (head, rest) = match path.find_byte(b'/') {
            Some(i) => (&path[..i], &path[i + 1..]),
            None => (path, &b""[..]),
        };
        self.children.iter().find(|c| c.name == head)?.find(rest)
    }
}

impl CacheTree {
    pub const SIGNATURE: &'static [u8; 4] = SIG;

    pub fn root_oid(&self) -> Option<ObjectId> {
        if self.root.is_valid() {
            self.root.oid
        } else {
            None
        }
    }

    /// Invalidate every directory from the root down to the one holding
    /// `path`.
    pub fn invalidate(&mut self, path: &BStr) {
        let mut node = &mut self.root;
        node.invalidate();
        let mut components = path.split_str("/").peekable();
        while let Some(component) = components.next() {
            if components.peek().is_none() {
                break;
            }
            match node.children.iter_mut().find(|c| c.name == component) {
                Some(child) => {
                    child.invalidate();
                    node = child;
                }
                None => break,
            }
        }
    }

    pub fn parse(data: &[u8], algo: HashAlgorithm) -> Result<Self, IndexError> {
        let mut cursor = 0;
        let root = parse_node(data, &mut cursor, algo)?;
        if cursor != data.len() {
            return Err(IndexError::extension(SIG, "trailing bytes"));
        }
        Ok(Self { root })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        serialize_node(&self.root, &mut buf);
        buf
    }
}

fn parse_number<T: std::str::FromStr>(
    data: &[u8],
    cursor: &mut usize,
    end: u8,
    what: &str,
) -> Result<T, IndexError> {
    let rest = data.get(*cursor..).unwrap_or_default();
    let len = rest
        .find_byte(end)
        .ok_or_else(|| IndexError::extension(SIG, format!("unterminated {what}")))?;
    let value = std::str::from_utf8(&rest[..len])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| IndexError::extension(SIG, format!("bad {what}")))?;
    *cursor += len + 1;
    Ok(value)
}

fn parse_node(data: &[u8], cursor: &mut usize, algo: HashAlgorithm) -> Result<CacheTreeNode, IndexError> {
    let name = BString::from(read_cstr(data, cursor, SIG, "name")?);
    let entry_count: i32 = parse_number(data, cursor, b' ', "entry count")?;
    let subtrees: usize = parse_number(data, cursor, b'\n', "subtree count")?;
    let oid = if entry_count >= 0 {
        Some(read_oid(data, cursor, algo, SIG)?)
    } else {
        None
    };
    let mut children = Vec::with_capacity(subtrees.min(1024));
    for _ in 0..subtrees {
        children.push(parse_node(data, cursor, algo)?);
    }
    Ok(CacheTreeNode {
        name,
        entry_count,
        oid,
        children,
    })
}

fn serialize_node(node: &CacheTreeNode, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&node.name);
    buf.push(0);
    let count = if node.is_valid() { node.entry_count } else { -1 };
    buf.extend_from_slice(format!("{count} {}\n", node.children.len()).as_bytes());
    if let (true, Some(oid)) = (count >= 0, node.oid) {
        buf.extend_from_slice(oid.as_bytes());
    }
    for child in &node.children {
        serialize_node(child, buf);
    }
}
