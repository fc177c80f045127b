//! Binary content detection.

/// Bytes sampled from the start of a buffer.
pub const SNIFF_LEN: usize = 8000;

/// A buffer is binary when its first [`SNIFF_LEN`] bytes hold a NUL, or
/// when non-printable bytes outnumber printable ones by more than 1 to 128.
/// Bytes at or above 0x80 count as printable so UTF-8 text stays text.
pub fn is_binary(data: &[u8]) -> bool {
    let mut sample = &data[..data.len().min(SNIFF_LEN)];
    // A trailing DOS EOF marker is not evidence of binary content.
    if sample.last() == Some(&0x1a) {
        sample = &sample[..sample.len() - 1];
    }
    let mut printable = 0usize;
    let mut nonprintable = 0usize;
    for &c in sample {
        match c {
            0 => return true,
            b'\t' | b'\n' | b'\r' | 0x08 | 0x0c | 0x1b => printable += 1,
            0x7f => nonprintable += 1,
            c if c < 0x20 => nonprintable += 1,
            _ => printable += 1,
        }
    }
    (printable >> 7) < nonprintable
}
