//! Rename and copy detection over a finished delta list.
//!
//! Runs in order: rewrites are broken into delete/add pairs, identical ids
//! pair up at 100%, remaining candidates are scored through a
//! [`SimilarityMetric`] and assigned greedily from the best score down, and
//! broken halves nobody claimed are joined back into modifications.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use bstr::BString;

use crate::similarity::{HashSignatureMetric, Signature, SimilarityMetric};
use crate::{DeltaStatus, DiffDelta, DiffError, DiffFile, DiffFileFlags};

#[derive(Clone)]
pub struct FindOptions {
    pub renames: bool,
    pub copies: bool,
    /// Consider unmodified files as copy sources. Only useful when the
    /// diff was run with `include_unmodified`.
    pub copies_from_unmodified: bool,
    /// Split modifications scoring under `break_rewrite_threshold` against
    /// themselves so each half can pair with something else.
    pub break_rewrites: bool,
    pub rename_threshold: u8,
    pub copy_threshold: u8,
    pub break_rewrite_threshold: u8,
    /// Above this many sources or targets only exact matches are found.
    pub rename_limit: usize,
    /// Defaults to [`HashSignatureMetric`].
    pub metric: Option<Arc<dyn SimilarityMetric>>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            renames: true,
            copies: false,
            copies_from_unmodified: false,
            break_rewrites: false,
            rename_threshold: 50,
            copy_threshold: 50,
            break_rewrite_threshold: 60,
            rename_limit: 1000,
            metric: None,
        }
    }
}

impl fmt::Debug for FindOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FindOptions")
            .field("renames", &self.renames)
            .field("copies", &self.copies)
            .field("copies_from_unmodified", &self.copies_from_unmodified)
            .field("break_rewrites", &self.break_rewrites)
            .field("rename_threshold", &self.rename_threshold)
            .field("copy_threshold", &self.copy_threshold)
            .field("break_rewrite_threshold", &self.break_rewrite_threshold)
            .field("rename_limit", &self.rename_limit)
            .field("metric", &self.metric.as_ref().map(|_| ".."))
            .finish()
    }
}

/// Produces signatures for files on either side of a delta list.
pub(crate) trait SignatureSource {
    fn signature(&self, metric: &dyn SimilarityMetric, file: &DiffFile, old_side: bool) -> Result<Signature, DiffError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pairing {
    Rename,
    Copy,
}

fn has_id(file: &DiffFile) -> bool {
    file.flags.contains(DiffFileFlags::VALID_ID) && !file.id.is_null()
}

fn has_content(file: &DiffFile) -> bool {
    file.exists() && !file.mode.is_some_and(|m| m.is_gitlink())
}

/// Halves of one broken rewrite never pair with each other.
fn distinct(deltas: &[DiffDelta], source: usize, target: usize) -> bool {
    deltas[source].old_file.path != deltas[target].new_file.path
}

fn split(delta: DiffDelta) -> (DiffDelta, DiffDelta) {
    let old_null = delta.old_file.id.algorithm().null_oid();
    let new_null = delta.new_file.id.algorithm().null_oid();
    let deleted = DiffDelta {
        status: DeltaStatus::Deleted,
        new_file: DiffFile::absent(delta.old_file.path.clone(), old_null),
        old_file: delta.old_file,
        similarity: 0,
    };
    let added = DiffDelta {
        status: DeltaStatus::Added,
        old_file: DiffFile::absent(delta.new_file.path.clone(), new_null),
        new_file: delta.new_file,
        similarity: 0,
    };
    (deleted, added)
}

struct Signatures<'s> {
    source: &'s dyn SignatureSource,
    metric: &'s dyn SimilarityMetric,
    old: HashMap<usize, Signature>,
    new: HashMap<usize, Signature>,
}

impl Signatures<'_> {
    fn score(&mut self, deltas: &[DiffDelta], source: usize, target: usize) -> Result<u8, DiffError> {
        if !self.old.contains_key(&source) {
            let sig = self.source.signature(self.metric, &deltas[source].old_file, true)?;
            self.old.insert(source, sig);
        }
        if !self.new.contains_key(&target) {
            let sig = self.source.signature(self.metric, &deltas[target].new_file, false)?;
            self.new.insert(target, sig);
        }
        Ok(match (self.old.get(&source), self.new.get(&target)) {
            (Some(a), Some(b)) => self.metric.similarity(a, b),
            _ => 0,
        })
    }
}

pub(crate) fn find_similar(
    deltas: Vec<DiffDelta>,
    options: &FindOptions,
    source: &dyn SignatureSource,
) -> Result<Vec<DiffDelta>, DiffError> {
    let fallback = HashSignatureMetric::default();
    let metric: &dyn SimilarityMetric = match options.metric.as_deref() {
        Some(metric) => metric,
        None => &fallback,
    };

    let mut broken: BTreeSet<BString> = BTreeSet::new();
    let mut deltas = if options.break_rewrites {
        let mut out = Vec::with_capacity(deltas.len());
        for delta in deltas {
            if delta.status == DeltaStatus::Modified && has_content(&delta.old_file) && has_content(&delta.new_file) {
                let a = source.signature(metric, &delta.old_file, true)?;
                let b = source.signature(metric, &delta.new_file, false)?;
                let score = metric.similarity(&a, &b);
                if score < options.break_rewrite_threshold {
                    tracing::debug!(path = %delta.new_file.path, score, "breaking rewrite");
                    broken.insert(delta.new_file.path.clone());
                    let (deleted, added) = split(delta);
                    out.push(deleted);
                    out.push(added);
                    continue;
                }
            }
            out.push(delta);
        }
        out
    } else {
        deltas
    };

    if options.renames || options.copies {
        let pairs = pair_up(&deltas, options, source, metric)?;
        let mut consumed = vec![false; deltas.len()];
        for &(target, src, score, kind) in &pairs {
            let old_file = deltas[src].old_file.clone();
            tracing::debug!(
                from = %old_file.path,
                to = %deltas[target].new_file.path,
                score,
                ?kind,
                "paired"
            );
            let delta = &mut deltas[target];
            delta.old_file = old_file;
            delta.similarity = score;
            delta.status = match kind {
                Pairing::Rename => DeltaStatus::Renamed,
                Pairing::Copy => DeltaStatus::Copied,
            };
            if kind == Pairing::Rename {
                consumed[src] = true;
            }
        }
        let mut keep = consumed.iter().map(|c| !c);
        deltas.retain(|_| keep.next().unwrap_or(true));
    }

    if !broken.is_empty() {
        deltas = rejoin(deltas, &broken);
    }
    deltas.sort_by(|a, b| a.path().cmp(b.path()));
    Ok(deltas)
}

fn accept(
    deltas: &[DiffDelta],
    options: &FindOptions,
    src: usize,
    score: u8,
    renamed_from: &mut [bool],
) -> Option<Pairing> {
    let deleted = deltas[src].status == DeltaStatus::Deleted;
    if deleted && options.renames && !renamed_from[src] && score >= options.rename_threshold {
        renamed_from[src] = true;
        Some(Pairing::Rename)
    } else if options.copies && score >= options.copy_threshold {
        Some(Pairing::Copy)
    } else {
        None
    }
}

/// `(target, source, score, kind)` for every accepted pairing.
fn pair_up(
    deltas: &[DiffDelta],
    options: &FindOptions,
    source: &dyn SignatureSource,
    metric: &dyn SimilarityMetric,
) -> Result<Vec<(usize, usize, u8, Pairing)>, DiffError> {
    let is_source = |d: &DiffDelta| match d.status {
        DeltaStatus::Deleted => true,
        DeltaStatus::Modified => options.copies,
        DeltaStatus::Unmodified => options.copies && options.copies_from_unmodified,
        _ => false,
    };
    let sources: Vec<usize> = (0..deltas.len())
        .filter(|&i| is_source(&deltas[i]) && has_content(&deltas[i].old_file))
        .collect();
    let targets: Vec<usize> = (0..deltas.len())
        .filter(|&i| deltas[i].status == DeltaStatus::Added && has_content(&deltas[i].new_file))
        .collect();
    if sources.is_empty() || targets.is_empty() {
        return Ok(Vec::new());
    }

    let mut renamed_from = vec![false; deltas.len()];
    let mut matched = vec![false; deltas.len()];
    let mut pairs = Vec::new();

    // Identical ids first; an unclaimed deletion beats a copy source.
    for &t in &targets {
        if !has_id(&deltas[t].new_file) {
            continue;
        }
        let id = deltas[t].new_file.id;
        let same: Vec<usize> = sources
            .iter()
            .copied()
            .filter(|&s| distinct(deltas, s, t) && has_id(&deltas[s].old_file) && deltas[s].old_file.id == id)
            .collect();
        let choice = same
            .iter()
            .copied()
            .find(|&s| deltas[s].status == DeltaStatus::Deleted && !renamed_from[s])
            .or_else(|| same.first().copied());
        if let Some(s) = choice {
            if let Some(kind) = accept(deltas, options, s, 100, &mut renamed_from) {
                matched[t] = true;
                pairs.push((t, s, 100, kind));
            }
        }
    }

    let open_targets: Vec<usize> = targets.iter().copied().filter(|&t| !matched[t]).collect();
    if open_targets.is_empty() {
        return Ok(pairs);
    }
    if open_targets.len() > options.rename_limit || sources.len() > options.rename_limit {
        tracing::debug!(
            targets = open_targets.len(),
            sources = sources.len(),
            limit = options.rename_limit,
            "too many candidates, skipping inexact detection"
        );
        return Ok(pairs);
    }

    let floor = match (options.renames, options.copies) {
        (true, true) => options.rename_threshold.min(options.copy_threshold),
        (true, false) => options.rename_threshold,
        _ => options.copy_threshold,
    };
    let mut sigs = Signatures {
        source,
        metric,
        old: HashMap::new(),
        new: HashMap::new(),
    };
    let mut scored = Vec::new();
    for &t in &open_targets {
        for &s in sources.iter().filter(|&&s| distinct(deltas, s, t)) {
            let score = sigs.score(deltas, s, t)?;
            if score >= floor {
                scored.push((score, t, s));
            }
        }
    }
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    for (score, t, s) in scored {
        if matched[t] {
            continue;
        }
        if let Some(kind) = accept(deltas, options, s, score, &mut renamed_from) {
            matched[t] = true;
            pairs.push((t, s, score, kind));
        }
    }
    Ok(pairs)
}

/// Merge unclaimed halves of broken rewrites back into modifications.
fn rejoin(deltas: Vec<DiffDelta>, broken: &BTreeSet<BString>) -> Vec<DiffDelta> {
    let mut halves: HashMap<BString, DiffFile> = HashMap::new();
    let mut rest = Vec::with_capacity(deltas.len());
    for delta in deltas {
        if delta.status == DeltaStatus::Deleted && broken.contains(&delta.old_file.path) {
            halves.insert(delta.old_file.path.clone(), delta.old_file);
        } else {
            rest.push(delta);
        }
    }
    for delta in &mut rest {
        if delta.status == DeltaStatus::Added && broken.contains(&delta.new_file.path) {
            if let Some(old_file) = halves.remove(&delta.new_file.path) {
                delta.old_file = old_file;
                delta.status = DeltaStatus::Modified;
            }
        }
    }
    rest.extend(halves.into_values().map(|old_file| DiffDelta {
        status: DeltaStatus::Deleted,
        new_file: DiffFile::absent(old_file.path.clone(), old_file.id.algorithm().null_oid()),
        old_file,
        similarity: 0,
    }));
    rest
}

#[cfg(test)]
mod tests {
    use super::*;
    use gitcore_hash::hasher::Hasher;
    use gitcore_hash::{HashAlgorithm, ObjectId};
    use gitcore_object::FileMode;

    /// Content keyed by object id.
    struct Blobs(HashMap<ObjectId, Vec<u8>>);

    impl SignatureSource for Blobs {
        fn signature(&self, metric: &dyn SimilarityMetric, file: &DiffFile, _old: bool) -> Result<Signature, DiffError> {
            let data = self.0.get(&file.id).cloned().unwrap_or_default();
            Ok(metric.buffer_signature(file, &data))
        }
    }

    fn blob(blobs: &mut Blobs, data: &str) -> ObjectId {
        let id = Hasher::hash_object(HashAlgorithm::Sha1, "blob", data.as_bytes()).unwrap();
        blobs.0.insert(id, data.as_bytes().to_vec());
        id
    }

    fn file(path: &str, id: ObjectId) -> DiffFile {
        DiffFile::present(path.into(), id, FileMode::Regular, true)
    }

    fn delta(status: DeltaStatus, old: Option<(&str, ObjectId)>, new: Option<(&str, ObjectId)>) -> DiffDelta {
        let path = old.or(new).map(|(p, _)| p).unwrap_or_default();
        DiffDelta {
            status,
            old_file: old.map_or_else(|| DiffFile::absent(path.into(), ObjectId::NULL_SHA1), |(p, id)| file(p, id)),
            new_file: new.map_or_else(|| DiffFile::absent(path.into(), ObjectId::NULL_SHA1), |(p, id)| file(p, id)),
            similarity: 0,
        }
    }

    const BODY: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine\nten\n";

    #[test]
    fn exact_rename() {
        let mut blobs = Blobs(HashMap::new());
        let id = blob(&mut blobs, BODY);
        let deltas = vec![
            delta(DeltaStatus::Added, None, Some(("new.txt", id))),
            delta(DeltaStatus::Deleted, Some(("old.txt", id)), None),
        ];
        let found = find_similar(deltas, &FindOptions::default(), &blobs).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, DeltaStatus::Renamed);
        assert_eq!(found[0].similarity, 100);
        assert_eq!(found[0].old_file.path, "old.txt");
        assert_eq!(found[0].new_file.path, "new.txt");
    }

    #[test]
    fn inexact_rename_respects_threshold() {
        let mut blobs = Blobs(HashMap::new());
        let old = blob(&mut blobs, BODY);
        let new = blob(&mut blobs, &BODY.replace("ten", "TEN"));
        let deltas = vec![
            delta(DeltaStatus::Deleted, Some(("a", old)), None),
            delta(DeltaStatus::Added, None, Some(("b", new))),
        ];
        let found = find_similar(deltas.clone(), &FindOptions::default(), &blobs).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, DeltaStatus::Renamed);
        assert_eq!(found[0].similarity, 90);

        let strict = FindOptions {
            rename_threshold: 95,
            ..FindOptions::default()
        };
        let found = find_similar(deltas, &strict, &blobs).unwrap();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn copy_from_modified_source() {
        let mut blobs = Blobs(HashMap::new());
        let base = blob(&mut blobs, BODY);
        let edited = blob(&mut blobs, &format!("{BODY}eleven\n"));
        let deltas = vec![
            delta(DeltaStatus::Modified, Some(("src", base)), Some(("src", edited))),
            delta(DeltaStatus::Added, None, Some(("twin", base))),
        ];
        let options = FindOptions {
            copies: true,
            ..FindOptions::default()
        };
        let found = find_similar(deltas, &options, &blobs).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].status, DeltaStatus::Modified);
        assert_eq!(found[1].status, DeltaStatus::Copied);
        assert_eq!(found[1].old_file.path, "src");
    }

    #[test]
    fn rename_limit_keeps_exact_matches_only() {
        let mut blobs = Blobs(HashMap::new());
        let old = blob(&mut blobs, BODY);
        let new = blob(&mut blobs, &BODY.replace("ten", "TEN"));
        let deltas = vec![
            delta(DeltaStatus::Deleted, Some(("a", old)), None),
            delta(DeltaStatus::Added, None, Some(("b", new))),
        ];
        let options = FindOptions {
            rename_limit: 0,
            ..FindOptions::default()
        };
        assert_eq!(find_similar(deltas, &options, &blobs).unwrap().len(), 2);
    }

    #[test]
    fn broken_rewrite_pairs_with_other_file() {
        let mut blobs = Blobs(HashMap::new());
        let original = blob(&mut blobs, BODY);
        let unrelated = blob(&mut blobs, "completely\ndifferent\ncontent\n");
        // "a" was moved to "b" and "a" refilled with something else.
        let deltas = vec![
            delta(DeltaStatus::Modified, Some(("a", original)), Some(("a", unrelated))),
            delta(DeltaStatus::Added, None, Some(("b", original))),
        ];
        let options = FindOptions {
            break_rewrites: true,
            ..FindOptions::default()
        };
        let found = find_similar(deltas.clone(), &options, &blobs).unwrap();
        let summary: Vec<_> = found.iter().map(|d| (d.status, d.path().to_string())).collect();
        assert_eq!(summary, [(DeltaStatus::Added, "a".to_owned()), (DeltaStatus::Renamed, "b".to_owned())]);

        // Without breaking, the modification stays and "b" has no source.
        let plain = find_similar(deltas, &FindOptions::default(), &blobs).unwrap();
        assert_eq!(plain[0].status, DeltaStatus::Modified);
        assert_eq!(plain[1].status, DeltaStatus::Added);
    }

    #[test]
    fn unclaimed_broken_halves_rejoin() {
        let mut blobs = Blobs(HashMap::new());
        let before = blob(&mut blobs, BODY);
        let after = blob(&mut blobs, "nothing\nin\ncommon\n");
        let deltas = vec![delta(DeltaStatus::Modified, Some(("f", before)), Some(("f", after)))];
        let options = FindOptions {
            break_rewrites: true,
            ..FindOptions::default()
        };
        let found = find_similar(deltas, &options, &blobs).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].status, DeltaStatus::Modified);
        assert_eq!(found[0].old_file.id, before);
    }
}
