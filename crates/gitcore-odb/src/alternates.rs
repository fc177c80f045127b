//! `objects/info/alternates`: other object directories searched read-only.
//!
//! One path per line, relative paths resolved against the objects
//! directory that names them. An alternate may have alternates of its own.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gitcore_loose::LooseStore;

use crate::backend::{OdbBackend, ReadOnly};
use crate::packs::PackDirBackend;
use crate::{OdbError, OdbOptions, MAX_ALTERNATE_DEPTH};

/// Paths listed in `<objects_dir>/info/alternates`, in file order.
pub(crate) fn parse_alternates(objects_dir: &Path) -> Result<Vec<PathBuf>, OdbError> {
    let file = objects_dir.join("info").join("alternates");
    let content = match fs::read(&file) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    Ok(String::from_utf8_lossy(&content)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| {
            let path = Path::new(l);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                objects_dir.join(path)
            }
        })
        .collect())
}

/// Read-only backends for every alternate reachable from `objects_dir`.
/// Each alternate's own alternates follow it directly.
pub(crate) fn load_alternates(
    objects_dir: &Path,
    options: &OdbOptions,
) -> Result<Vec<Arc<dyn OdbBackend>>, OdbError> {
    let mut visited = HashSet::new();
    visited.insert(canonical(objects_dir));
    let mut out = Vec::new();
    collect(objects_dir, options, 0, &mut visited, &mut out)?;
    Ok(out)
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn collect(
    objects_dir: &Path,
    options: &OdbOptions,
    depth: usize,
    visited: &mut HashSet<PathBuf>,
    out: &mut Vec<Arc<dyn OdbBackend>>,
) -> Result<(), OdbError> {
    let listed = parse_alternates(objects_dir)?;
    if listed.is_empty() {
        return Ok(());
    }
    if depth >= MAX_ALTERNATE_DEPTH {
        tracing::warn!(dir = %objects_dir.display(), max = MAX_ALTERNATE_DEPTH, "alternates nested too deeply, ignoring");
        return Ok(());
    }

    for alt in listed {
        if !alt.is_dir() {
            tracing::warn!(path = %alt.display(), "alternate object directory does not exist");
            continue;
        }
        if !visited.insert(canonical(&alt)) {
            tracing::warn!(path = %alt.display(), "alternate already on the search path, skipping");
            continue;
        }
        tracing::debug!(path = %alt.display(), depth, "adding alternate");

        let loose = LooseStore::open(&alt, options.hash_algorithm);
        out.push(Arc::new(ReadOnly(loose)));
        let packs = PackDirBackend::open(alt.join("pack"), options.hash_algorithm, options.max_delta_depth)?;
        out.push(Arc::new(ReadOnly(packs)));

        collect(&alt, options, depth + 1, visited, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_resolves_relative() {
        let dir = tempfile::tempdir().unwrap();
        let objects = dir.path().join("objects");
        fs::create_dir_all(objects.join("info")).unwrap();
        fs::write(
            objects.join("info/alternates"),
            "# shared\n\n../../other/objects\n/abs/objects\n",
        )
        .unwrap();

        let paths = parse_alternates(&objects).unwrap();
        assert_eq!(
            paths,
            vec![objects.join("../../other/objects"), PathBuf::from("/abs/objects")]
        );
    }

    #[test]
    fn missing_file_means_no_alternates() {
        let dir = tempfile::tempdir().unwrap();
        assert!(parse_alternates(dir.path()).unwrap().is_empty());
    }
}
