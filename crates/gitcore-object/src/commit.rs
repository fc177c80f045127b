use bstr::{BStr, BString, ByteSlice};
use gitcore_hash::ObjectId;
use gitcore_utils::date::Signature;

use crate::fields::{write_field, Fields};
use crate::{ObjectError, ObjectType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub author: Signature,
    pub committer: Signature,
    pub encoding: Option<BString>,
    /// Detached signature (`gpgsig`), newline-joined.
    pub gpgsig: Option<BString>,
    /// Any other headers in their original order.
    pub extra_headers: Vec<(BString, BString)>,
    pub message: BString,
}

fn parse_id(value: &[u8], field: &'static str) -> Result<ObjectId, ObjectError> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| ObjectError::InvalidHeader(format!("non-ASCII {field} id")))?;
    Ok(ObjectId::from_hex(hex)?)
}

pub(crate) fn parse_signature(value: &[u8]) -> Result<Signature, ObjectError> {
    Signature::parse(BStr::new(value)).map_err(|e| ObjectError::InvalidSignature(e.to_string()))
}

impl Commit {
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let missing = |field| ObjectError::MissingField {
            kind: ObjectType::Commit,
            field,
        };

        let mut tree = None;
        let mut parents = Vec::new();
        let mut author = None;
        let mut committer = None;
        let mut encoding = None;
        let mut gpgsig = None;
        let mut extra_headers = Vec::new();

        let mut fields = Fields::new(content);
        for (key, value) in fields.by_ref() {
            match key {
                b"tree" => tree = Some(parse_id(&value, "tree")?),
                b"parent" => parents.push(parse_id(&value, "parent")?),
                b"author" => author = Some(parse_signature(&value)?),
                b"committer" => committer = Some(parse_signature(&value)?),
                b"encoding" => encoding = Some(value),
                b"gpgsig" => gpgsig = Some(value),
                _ => extra_headers.push((BString::from(key), value)),
            }
        }
        let message = BString::from(&content[fields.body_offset()..]);

        Ok(Self {
            tree: tree.ok_or_else(|| missing("tree"))?,
            parents,
            author: author.ok_or_else(|| missing("author"))?,
            committer: committer.ok_or_else(|| missing("committer"))?,
            encoding,
            gpgsig,
            extra_headers,
            message,
        })
    }

    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.message.len());
        write_field(&mut out, b"tree", self.tree.to_hex().as_bytes());
        for parent in &self.parents {
            write_field(&mut out, b"parent", parent.to_hex().as_bytes());
        }
        write_field(&mut out, b"author", &self.author.to_bytes());
        write_field(&mut out, b"committer", &self.committer.to_bytes());
        if let Some(enc) = &self.encoding {
            write_field(&mut out, b"encoding", enc);
        }
        if let Some(sig) = &self.gpgsig {
            write_field(&mut out, b"gpgsig", sig);
        }
        for (key, value) in &self.extra_headers {
            write_field(&mut out, key, value);
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        out
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }

    /// First line of the message.
    pub fn summary(&self) -> &BStr {
        let msg = self.message.as_bytes();
        msg.lines().next().unwrap_or_default().as_bstr()
    }
}
