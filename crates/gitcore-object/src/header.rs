//! The `"<kind> <size>\0"` prefix of hashed and loose objects.

use crate::{ObjectError, ObjectType};

/// Longest header: `"commit "` plus a 20-digit size plus NUL.
pub const MAX_HEADER_LEN: usize = 32;

/// Parse a header, returning `(kind, content size, header length incl. NUL)`.
pub fn parse_header(data: &[u8]) -> Result<(ObjectType, usize, usize), ObjectError> {
    let nul = data
        .iter()
        .take(MAX_HEADER_LEN)
        .position(|&b| b == 0)
        .ok_or_else(|| ObjectError::InvalidHeader("missing NUL terminator".into()))?;
    let header = &data[..nul];
    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| ObjectError::InvalidHeader("missing space".into()))?;

    let kind = ObjectType::from_bytes(&header[..space])?;
    let digits = &header[space + 1..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) || (digits.len() > 1 && digits[0] == b'0') {
        return Err(ObjectError::InvalidHeader(format!(
            "invalid size '{}'",
            String::from_utf8_lossy(digits)
        )));
    }
    let size = digits
        .iter()
        .try_fold(0usize, |acc, &d| acc.checked_mul(10)?.checked_add(usize::from(d - b'0')))
        .ok_or_else(|| ObjectError::InvalidHeader("size overflows".into()))?;

    Ok((kind, size, nul + 1))
}

pub fn write_header(kind: ObjectType, size: usize) -> Vec<u8> {
    format!("{kind} {size}\0").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_and_size() {
        let data = b"blob 12\0some content";
        let (kind, size, len) = parse_header(data).unwrap();
        assert_eq!((kind, size, len), (ObjectType::Blob, 12, 8));
        assert_eq!(&data[len..], b"some content");
    }

    #[test]
    fn written_header_parses() {
        let hdr = write_header(ObjectType::Commit, 256);
        assert_eq!(hdr, b"commit 256\0");
        assert_eq!(parse_header(&hdr).unwrap(), (ObjectType::Commit, 256, hdr.len()));
    }

    #[test]
    fn malformed_headers() {
        for bad in [
            &b"blob 12"[..],
            b"blob12\0",
            b"shrub 1\0",
            b"blob x\0",
            b"blob \0",
            b"blob 012\0",
            b"blob 99999999999999999999999\0",
        ] {
            assert!(parse_header(bad).is_err(), "{:?}", String::from_utf8_lossy(bad));
        }
    }
}
