//! Pathspecs: the patterns callers use to pick paths.
//!
//! Magic prefixes: `:(top)`, `:(exclude)` or `:!`/`:^`, `:(icase)`,
//! `:(glob)` and `:(literal)`. Without `glob`, wildcards also match `/`.

use bstr::{BStr, BString, ByteSlice};
use gitcore_utils::glob::{has_glob_chars, GlobFlags, GlobPattern};

use crate::IndexError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathspecMagic {
    pub top: bool,
    pub exclude: bool,
    pub icase: bool,
    pub glob: bool,
    pub literal: bool,
}

#[derive(Debug, Clone)]
pub struct PathspecPattern {
    /// The pattern as the caller wrote it.
    pub raw: String,
    /// Pattern text after magic is stripped and the prefix applied.
    pub pattern: BString,
    pub magic: PathspecMagic,
    glob: Option<GlobPattern>,
}

impl PathspecPattern {
    pub fn parse(input: &str) -> Result<Self, IndexError> {
        Self::parse_in(input, BStr::new(""))
    }

    /// Parse relative to `prefix`, a directory inside the work tree.
    /// `:(top)` patterns ignore the prefix.
    pub fn parse_in(input: &str, prefix: &BStr) -> Result<Self, IndexError> {
        let mut magic = PathspecMagic::default();
        let body = if let Some(rest) = input.strip_prefix(":(") {
            let close = rest
                .find(')')
                .ok_or_else(|| IndexError::InvalidPathspec(format!("unclosed magic in '{input}'")))?;
            for word in rest[..close].split(',').map(str::trim) {
                match word {
                    "top" => magic.top = true,
                    "exclude" => magic.exclude = true,
                    "icase" => magic.icase = true,
                    "glob" => magic.glob = true,
                    "literal" => magic.literal = true,
                    "" => {}
                    other => {
                        return Err(IndexError::InvalidPathspec(format!("unknown magic '{other}'")));
                    }
                }
            }
            &rest[close + 1..]
        } else if let Some(rest) = input.strip_prefix(":!").or_else(|| input.strip_prefix(":^")) {
            magic.exclude = true;
            rest
        } else if let Some(rest) = input.strip_prefix(":/") {
            magic.top = true;
            rest
        } else {
            input
        };
        if magic.glob && magic.literal {
            return Err(IndexError::InvalidPathspec(format!("'{input}': glob and literal conflict")));
        }

        let mut pattern = BString::default();
        if !magic.top && !prefix.is_empty() {
            pattern.extend_from_slice(prefix.trim_end_with(|c| c == '/'));
            pattern.push(b'/');
        }
        pattern.extend_from_slice(body.trim_start_matches("./").as_bytes());

        let glob = (!magic.literal && has_glob_chars(&pattern)).then(|| {
            let mut flags = GlobFlags::empty();
            if magic.glob {
                flags |= GlobFlags::PATHNAME;
            }
            if magic.icase {
                flags |= GlobFlags::CASEFOLD;
            }
            GlobPattern::new(pattern.as_bstr(), flags)
        });

        Ok(Self {
            raw: input.to_owned(),
            pattern,
            magic,
            glob,
        })
    }

    /// Whole-path glob match, or the pattern naming the path or one of
    /// its leading directories.
    pub fn matches(&self, path: &BStr) -> bool {
        if self.pattern.is_empty() {
            return true;
        }
        if let Some(glob) = &self.glob {
            if glob.matches(path) {
                return true;
            }
        }
        let pat = self.pattern.trim_end_with(|c| c == '/');
        let head = match path.get(..pat.len()) {
            Some(head) => head,
            None => return false,
        };
        let same = if self.magic.icase {
            head.eq_ignore_ascii_case(pat)
        } else {
            head == pat
        };
        same && (path.len() == pat.len() || path[pat.len()] == b'/')
    }
}

/// A set of include and exclude patterns.
#[derive(Debug, Clone, Default)]
pub struct Pathspec {
    pub patterns: Vec<PathspecPattern>,
}

impl Pathspec {
    pub fn parse<S: AsRef<str>>(patterns: &[S]) -> Result<Self, IndexError> {
        Self::parse_in(patterns, BStr::new(""))
    }

    pub fn parse_in<S: AsRef<str>>(patterns: &[S], prefix: &BStr) -> Result<Self, IndexError> {
        let patterns = patterns
            .iter()
            .map(|p| PathspecPattern::parse_in(p.as_ref(), prefix))
            .collect::<Result<_, _>>()?;
        Ok(Self { patterns })
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn includes(&self) -> impl Iterator<Item = &PathspecPattern> {
        self.patterns.iter().filter(|p| !p.magic.exclude)
    }

    fn excluded(&self, path: &BStr) -> bool {
        self.patterns.iter().any(|p| p.magic.exclude && p.matches(path))
    }

    /// No include patterns means everything is included.
    pub fn matches(&self, path: &BStr) -> bool {
        if self.excluded(path) {
            return false;
        }
        let mut includes = self.includes().peekable();
        includes.peek().is_none() || includes.any(|p| p.matches(path))
    }

    /// The first include pattern that selects `path`. `None` when the
    /// path is excluded, unmatched, or there are no include patterns.
    pub fn matching_pattern(&self, path: &BStr) -> Option<&PathspecPattern> {
        if self.excluded(path) {
            return None;
        }
        self.includes().find(|p| p.matches(path))
    }
}

/// Glob patterns naming paths to leave alone. Patterns without a `/`
/// match the file name anywhere; others match the whole path.
#[derive(Debug, Clone, Default)]
pub struct IgnoreRules(Vec<(bool, GlobPattern)>);

impl IgnoreRules {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Self {
        Self(
            patterns
                .iter()
                .map(|p| {
                    let p = p.as_ref().trim_start_matches('/');
                    let anchored = p.contains('/');
                    let flags = if anchored { GlobFlags::PATHNAME } else { GlobFlags::empty() };
                    (anchored, GlobPattern::new(BStr::new(p), flags))
                })
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_ignored(&self, path: &BStr) -> bool {
        let name = match path.rfind_byte(b'/') {
            Some(i) => &path.as_bytes()[i + 1..],
            None => path.as_bytes(),
        };
        self.0.iter().any(|(anchored, glob)| {
            if *anchored {
                glob.matches(path)
            } else {
                glob.matches(name.as_bstr())
            }
        })
    }
}
