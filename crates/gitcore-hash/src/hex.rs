//! Lowercase hex encoding and decoding.

use crate::HashError;

const DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Value of one hex digit, or `None`.
#[inline]
pub fn nibble(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}

pub fn encode_to_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        out.push(DIGITS[(b >> 4) as usize] as char);
        out.push(DIGITS[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decode `hex` into `out`; `hex` may be shorter than `out` (and of odd
/// length), in which case the remaining nibbles stay zero.
pub fn decode_into(hex: &[u8], out: &mut [u8]) -> Result<(), HashError> {
    if hex.len() > out.len() * 2 {
        return Err(HashError::InvalidHexLength {
            expected: out.len() * 2,
            actual: hex.len(),
        });
    }
    for (pos, &c) in hex.iter().enumerate() {
        let v = nibble(c).ok_or(HashError::InvalidHex {
            position: pos,
            character: c as char,
        })?;
        if pos % 2 == 0 {
            out[pos / 2] = v << 4;
        } else {
            out[pos / 2] |= v;
        }
    }
    Ok(())
}

pub fn decode_to_vec(hex: &str) -> Result<Vec<u8>, HashError> {
    if hex.len() % 2 != 0 {
        return Err(HashError::InvalidHexLength {
            expected: hex.len() + 1,
            actual: hex.len(),
        });
    }
    let mut out = vec![0u8; hex.len() / 2];
    decode_into(hex.as_bytes(), &mut out)?;
    Ok(out)
}

pub fn is_hex(s: &str) -> bool {
    s.bytes().all(|c| nibble(c).is_some())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_bytes() {
        let bytes: Vec<u8> = (0..=255).collect();
        assert_eq!(decode_to_vec(&encode_to_string(&bytes)).unwrap(), bytes);
    }

    #[test]
    fn reports_bad_digit_position() {
        match decode_to_vec("deadgoof") {
            Err(HashError::InvalidHex { position: 4, character: 'g' }) => {}
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn odd_prefix_leaves_low_nibble_zero() {
        let mut out = [0xffu8; 2];
        decode_into(b"abc", &mut out).unwrap();
        assert_eq!(out, [0xab, 0xc0]);
    }

    #[test]
    fn odd_length_rejected_for_whole_bytes() {
        assert!(decode_to_vec("abc").is_err());
        assert!(is_hex("DeadBeef"));
        assert!(!is_hex("xyz"));
    }
}
