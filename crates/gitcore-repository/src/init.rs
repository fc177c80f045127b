use std::fs;
use std::path::{Path, PathBuf};

use gitcore_hash::HashAlgorithm;

use crate::{InitOptions, RepoError};

/// Layout of a repository on disk.
#[derive(Debug)]
pub(crate) struct Layout {
    pub git_dir: PathBuf,
    pub work_tree: Option<PathBuf>,
}

/// Create the `.git` skeleton under `path` (or at `path` itself when bare).
///
/// Re-running on an existing repository leaves it untouched.
pub(crate) fn init_repository(path: &Path, options: &InitOptions) -> Result<Layout, RepoError> {
    let path = if path.is_relative() {
        std::env::current_dir()?.join(path)
    } else {
        path.to_path_buf()
    };
    let (git_dir, work_tree) = if options.bare {
        (path.clone(), None)
    } else {
        (path.join(".git"), Some(path))
    };

    if git_dir.join("HEAD").is_file() {
        tracing::debug!(git_dir = %git_dir.display(), "repository already initialized");
        return Ok(Layout { git_dir, work_tree });
    }

    fs::create_dir_all(git_dir.join("objects").join("info"))?;
    fs::create_dir_all(git_dir.join("objects").join("pack"))?;
    fs::create_dir_all(git_dir.join("refs").join("heads"))?;
    fs::create_dir_all(git_dir.join("refs").join("tags"))?;

    let branch = options.default_branch.as_deref().unwrap_or("main");
    crate::refs::validate_ref_name(&format!("refs/heads/{branch}"))?;
    fs::write(git_dir.join("HEAD"), format!("ref: refs/heads/{branch}\n"))?;

    let mut config = String::from("[core]\n");
    let format_version = if options.hash_algorithm == HashAlgorithm::Sha1 { 0 } else { 1 };
    config.push_str(&format!("\trepositoryformatversion = {format_version}\n"));
    config.push_str(&format!("\tbare = {}\n", options.bare));
    if format_version == 1 {
        config.push_str(&format!("[extensions]\n\tobjectformat = {}\n", options.hash_algorithm.name()));
    }
    fs::write(git_dir.join("config"), config)?;

    tracing::debug!(git_dir = %git_dir.display(), branch, algo = %options.hash_algorithm, "initialized repository");
    Ok(Layout { git_dir, work_tree })
}

/// Hash algorithm recorded by `init_repository`. Only the
/// `objectformat` line is looked at.
pub(crate) fn recorded_hash_algorithm(git_dir: &Path) -> HashAlgorithm {
    let Ok(config) = fs::read_to_string(git_dir.join("config")) else {
        return HashAlgorithm::Sha1;
    };
    config
        .lines()
        .filter_map(|line| line.trim().split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("objectformat"))
        .and_then(|(_, value)| HashAlgorithm::from_name(value.trim()))
        .unwrap_or(HashAlgorithm::Sha1)
}

/// Locate the git directory for `path`: either `path` itself or its `.git`.
pub(crate) fn open_layout(path: &Path) -> Result<Layout, RepoError> {
    let path = fs::canonicalize(path).map_err(|_| RepoError::NotFound(path.to_path_buf()))?;
    if is_git_dir(&path) {
        let work_tree = match path.file_name() {
            Some(name) if name == ".git" => path.parent().map(Path::to_path_buf),
            _ => None,
        };
        return Ok(Layout { git_dir: path, work_tree });
    }
    let dot_git = path.join(".git");
    if dot_git.is_dir() {
        if !is_git_dir(&dot_git) {
            return Err(RepoError::InvalidGitDir {
                path: dot_git,
                reason: "missing HEAD, objects/ or refs/".into(),
            });
        }
        return Ok(Layout {
            git_dir: dot_git,
            work_tree: Some(path),
        });
    }
    Err(RepoError::NotFound(path))
}

fn is_git_dir(path: &Path) -> bool {
    path.join("HEAD").is_file() && path.join("objects").is_dir() && path.join("refs").is_dir()
}
