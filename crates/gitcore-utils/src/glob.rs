//! Shell-style glob matching for pathspecs.
//!
//! Supports `*`, `?`, bracket classes (ranges, negation, POSIX classes),
//! backslash escapes, and `**` directory wildcards when matching in
//! pathname mode.

use bstr::{BStr, BString, ByteSlice};

bitflags::bitflags! {
    /// Flags controlling glob matching.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GlobFlags: u32 {
        /// ASCII case-insensitive matching.
        const CASEFOLD = 0x01;
        /// Wildcards do not cross `/`; `**` spans directories.
        const PATHNAME = 0x02;
    }
}

fn is_glob_special(c: u8) -> bool {
    matches!(c, b'*' | b'?' | b'[' | b'\\')
}

/// True when `pattern` contains any glob metacharacter.
pub fn has_glob_chars(pattern: &[u8]) -> bool {
    pattern.iter().any(|&c| is_glob_special(c))
}

fn fold(c: u8, flags: GlobFlags) -> u8 {
    if flags.contains(GlobFlags::CASEFOLD) {
        c.to_ascii_lowercase()
    } else {
        c
    }
}

fn match_from(p: &[u8], t: &[u8], flags: GlobFlags) -> bool {
    let pathname = flags.contains(GlobFlags::PATHNAME);
    let mut pi = 0;
    let mut ti = 0;

    while pi < p.len() {
        match p[pi] {
            b'*' => {
                let star_start = pi;
                while pi < p.len() && p[pi] == b'*' {
                    pi += 1;
                }
                let double = pi - star_start >= 2;
                let at_segment_start = star_start == 0 || p[star_start - 1] == b'/';

                if pathname && double && at_segment_start {
                    if pi == p.len() {
                        return true;
                    }
                    if p[pi] == b'/' {
                        // `**/` matches zero or more leading directories.
                        let rest = &p[pi + 1..];
                        if match_from(rest, &t[ti..], flags) {
                            return true;
                        }
                        for (off, &c) in t[ti..].iter().enumerate() {
                            if c == b'/' && match_from(rest, &t[ti + off + 1..], flags) {
                                return true;
                            }
                        }
                        return false;
                    }
                }

                let rest = &p[pi..];
                for k in ti..=t.len() {
                    if k > ti && pathname && t[k - 1] == b'/' {
                        break;
                    }
                    if match_from(rest, &t[k..], flags) {
                        return true;
                    }
                }
                return false;
            }
            b'?' => {
                match t.get(ti) {
                    Some(b'/') if pathname => return false,
                    Some(_) => {}
                    None => return false,
                }
                pi += 1;
                ti += 1;
            }
            b'[' => {
                let Some(&c) = t.get(ti) else {
                    return false;
                };
                if pathname && c == b'/' {
                    return false;
                }
                match match_bracket(&p[pi..], c, flags) {
                    Some((true, used)) => {
                        pi += used;
                        ti += 1;
                    }
                    Some((false, _)) => return false,
                    // Unterminated class matches a literal '['.
                    None => {
                        if c != b'[' {
                            return false;
                        }
                        pi += 1;
                        ti += 1;
                    }
                }
            }
            b'\\' if pi + 1 < p.len() => {
                match t.get(ti) {
                    Some(&c) if fold(c, flags) == fold(p[pi + 1], flags) => {}
                    _ => return false,
                }
                pi += 2;
                ti += 1;
            }
            lit => {
                match t.get(ti) {
                    Some(&c) if fold(c, flags) == fold(lit, flags) => {}
                    _ => return false,
                }
                pi += 1;
                ti += 1;
            }
        }
    }

    ti == t.len()
}

/// Match one byte against the bracket expression at the start of `p`.
/// Returns (matched, bytes consumed), or None if the class is unterminated.
fn match_bracket(p: &[u8], c: u8, flags: GlobFlags) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = matches!(p.get(i), Some(b'!') | Some(b'^'));
    if negate {
        i += 1;
    }

    let target = fold(c, flags);
    let mut matched = false;
    let mut first = true;

    loop {
        let ch = *p.get(i)?;
        if ch == b']' && !first {
            i += 1;
            break;
        }
        first = false;

        if ch == b'[' && p.get(i + 1) == Some(&b':') {
            let end = p[i + 2..].find(":]")?;
            let class = &p[i + 2..i + 2 + end];
            if posix_class(class, c, flags) {
                matched = true;
            }
            i += end + 4;
            continue;
        }

        let lo = if ch == b'\\' {
            i += 1;
            *p.get(i)?
        } else {
            ch
        };
        i += 1;

        if p.get(i) == Some(&b'-') && p.get(i + 1).is_some_and(|&n| n != b']') {
            let mut hi = p[i + 1];
            i += 2;
            if hi == b'\\' {
                hi = *p.get(i)?;
                i += 1;
            }
            if (lo..=hi).contains(&c) || (fold(lo, flags)..=fold(hi, flags)).contains(&target) {
                matched = true;
            }
        } else if fold(lo, flags) == target {
            matched = true;
        }
    }

    Some((matched != negate, i))
}

fn posix_class(class: &[u8], c: u8, flags: GlobFlags) -> bool {
    match class {
        b"alnum" => c.is_ascii_alphanumeric(),
        b"alpha" => c.is_ascii_alphabetic(),
        b"blank" => c == b' ' || c == b'\t',
        b"cntrl" => c.is_ascii_control(),
        b"digit" => c.is_ascii_digit(),
        b"graph" => c.is_ascii_graphic(),
        b"lower" => c.is_ascii_lowercase() || (flags.contains(GlobFlags::CASEFOLD) && c.is_ascii_uppercase()),
        b"print" => c.is_ascii_graphic() || c == b' ',
        b"punct" => c.is_ascii_punctuation(),
        b"space" => c.is_ascii_whitespace(),
        b"upper" => c.is_ascii_uppercase() || (flags.contains(GlobFlags::CASEFOLD) && c.is_ascii_lowercase()),
        b"xdigit" => c.is_ascii_hexdigit(),
        _ => false,
    }
}

/// Match `text` against the glob `pattern`.
pub fn glob_match(pattern: &BStr, text: &BStr, flags: GlobFlags) -> bool {
    match_from(pattern.as_bytes(), text.as_bytes(), flags)
}

/// A pattern kept alongside its flags, with a fast path for literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    pattern: BString,
    flags: GlobFlags,
    literal: bool,
}

impl GlobPattern {
    pub fn new(pattern: &BStr, flags: GlobFlags) -> Self {
        Self {
            pattern: pattern.to_owned(),
            flags,
            literal: !has_glob_chars(pattern),
        }
    }

    pub fn as_bstr(&self) -> &BStr {
        self.pattern.as_bstr()
    }

    pub fn is_literal(&self) -> bool {
        self.literal
    }

    pub fn matches(&self, text: &BStr) -> bool {
        if self.literal {
            return if self.flags.contains(GlobFlags::CASEFOLD) {
                self.pattern.eq_ignore_ascii_case(text.as_bytes())
            } else {
                self.pattern.as_bytes() == text.as_bytes()
            };
        }
        match_from(&self.pattern, text.as_bytes(), self.flags)
    }
}
