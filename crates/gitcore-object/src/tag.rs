use bstr::{BString, ByteSlice};
use gitcore_hash::ObjectId;
use gitcore_utils::date::Signature;

use crate::commit::parse_signature;
use crate::fields::{write_field, Fields};
use crate::{ObjectError, ObjectType};

const SIGNATURE_MARKERS: [&[u8]; 2] = [
    b"-----BEGIN PGP SIGNATURE-----",
    b"-----BEGIN SSH SIGNATURE-----",
];

/// An annotated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub target: ObjectId,
    pub target_type: ObjectType,
    pub name: BString,
    /// Absent on some very old tags.
    pub tagger: Option<Signature>,
    pub message: BString,
    /// Trailing signature block split off the message.
    pub signature: Option<BString>,
}

impl Tag {
    pub fn parse(content: &[u8]) -> Result<Self, ObjectError> {
        let missing = |field| ObjectError::MissingField {
            kind: ObjectType::Tag,
            field,
        };

        let mut target = None;
        let mut target_type = None;
        let mut name = None;
        let mut tagger = None;

        let mut fields = Fields::new(content);
        for (key, value) in fields.by_ref() {
            match key {
                b"object" => {
                    let hex = std::str::from_utf8(&value)
                        .map_err(|_| ObjectError::InvalidHeader("non-ASCII object id".into()))?;
                    target = Some(ObjectId::from_hex(hex)?);
                }
                b"type" => target_type = Some(ObjectType::from_bytes(&value)?),
                b"tag" => name = Some(value),
                b"tagger" => tagger = Some(parse_signature(&value)?),
                _ => {}
            }
        }

        let rest = &content[fields.body_offset()..];
        let split = SIGNATURE_MARKERS.iter().filter_map(|m| rest.find(m)).min();
        let (message, signature) = match split {
            Some(at) => (BString::from(&rest[..at]), Some(BString::from(&rest[at..]))),
            None => (BString::from(rest), None),
        };

        Ok(Self {
            target: target.ok_or_else(|| missing("object"))?,
            target_type: target_type.ok_or_else(|| missing("type"))?,
            name: name.ok_or_else(|| missing("tag"))?,
            tagger,
            message,
            signature,
        })
    }

    pub fn serialize_content(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(160 + self.message.len());
        write_field(&mut out, b"object", self.target.to_hex().as_bytes());
        write_field(&mut out, b"type", self.target_type.as_bytes());
        write_field(&mut out, b"tag", &self.name);
        if let Some(tagger) = &self.tagger {
            write_field(&mut out, b"tagger", &tagger.to_bytes());
        }
        out.push(b'\n');
        out.extend_from_slice(&self.message);
        if let Some(sig) = &self.signature {
            out.extend_from_slice(sig);
        }
        out
    }
}
