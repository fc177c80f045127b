//! `key value` header lines shared by commits and tags.
//!
//! A value continues onto following lines that start with a single space;
//! the continuation is joined with `\n` and the leading space dropped.

use bstr::BString;

pub(crate) struct Fields<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

impl<'a> Fields<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            done: false,
        }
    }

    /// Offset of the message, valid once iteration has finished.
    pub(crate) fn body_offset(&self) -> usize {
        self.pos
    }

    fn line_end(&self, from: usize) -> usize {
        self.data[from..]
            .iter()
            .position(|&b| b == b'\n')
            .map_or(self.data.len(), |p| from + p)
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = (&'a [u8], BString);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done || self.pos >= self.data.len() {
                self.done = true;
                return None;
            }
            if self.data[self.pos] == b'\n' {
                self.pos += 1;
                self.done = true;
                return None;
            }

            let end = self.line_end(self.pos);
            let line = &self.data[self.pos..end];
            self.pos = (end + 1).min(self.data.len());

            let Some(space) = line.iter().position(|&b| b == b' ') else {
                continue;
            };
            let key = &line[..space];
            let mut value = BString::from(&line[space + 1..]);
            while self.data.get(self.pos) == Some(&b' ') {
                let end = self.line_end(self.pos);
                value.push(b'\n');
                value.extend_from_slice(&self.data[self.pos + 1..end]);
                self.pos = (end + 1).min(self.data.len());
            }
            return Some((key, value));
        }
    }
}

/// Append `key value\n`, continuing embedded newlines with a leading space.
pub(crate) fn write_field(out: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    out.extend_from_slice(key);
    out.push(b' ');
    for (i, line) in value.split(|&b| b == b'\n').enumerate() {
        if i > 0 {
            out.extend_from_slice(b"\n ");
        }
        out.extend_from_slice(line);
    }
    out.push(b'\n');
}
