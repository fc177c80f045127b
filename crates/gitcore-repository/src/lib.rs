//! Repository layer: the on-disk layout, references, commits and the
//! repository-level merge lifecycle on top of the object database, index
//! and merge engine.

mod error;
mod init;
pub mod library;
mod merge;
pub mod refs;

pub use error::RepoError;
pub use library::{Library, LibrarySettings};
pub use merge::{MergeAnalysis, MergePreference, MergeState, MergeSummary};
pub use refs::{RefStore, Reference};

use std::path::{Path, PathBuf};

use bstr::BString;
use gitcore_hash::{HashAlgorithm, ObjectId};
use gitcore_index::Index;
use gitcore_object::{Commit, ObjectType};
use gitcore_odb::ObjectDatabase;
use gitcore_utils::date::Signature;

/// Options for repository initialization.
#[derive(Debug, Clone)]
pub struct InitOptions {
    pub bare: bool,
    /// Branch `HEAD` points at; `main` when unset.
    pub default_branch: Option<String>,
    pub hash_algorithm: HashAlgorithm,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            bare: false,
            default_branch: None,
            hash_algorithm: HashAlgorithm::Sha1,
        }
    }
}

/// What `HEAD` currently names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Head {
    /// On a branch; `oid` is `None` while the branch is unborn.
    Branch { name: String, oid: Option<ObjectId> },
    Detached(ObjectId),
}

impl Head {
    pub fn oid(&self) -> Option<ObjectId> {
        match self {
            Self::Branch { oid, .. } => *oid,
            Self::Detached(oid) => Some(*oid),
        }
    }
}

pub struct Repository {
    git_dir: PathBuf,
    work_tree: Option<PathBuf>,
    odb: ObjectDatabase,
    refs: RefStore,
    hash_algo: HashAlgorithm,
    merge_preference: MergePreference,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("git_dir", &self.git_dir)
            .field("work_tree", &self.work_tree)
            .field("hash_algo", &self.hash_algo)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Open an existing repository; `path` is either the git directory or
    /// the work-tree root.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let layout = init::open_layout(path.as_ref())?;
        Self::from_layout(layout)
    }

    /// Initialize a repository with a work tree at `path`.
    pub fn init(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        Self::init_opts(path, &InitOptions::default())
    }

    pub fn init_bare(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let options = InitOptions {
            bare: true,
            ..InitOptions::default()
        };
        Self::init_opts(path, &options)
    }

    pub fn init_opts(path: impl AsRef<Path>, options: &InitOptions) -> Result<Self, RepoError> {
        let layout = init::init_repository(path.as_ref(), options)?;
        Self::from_layout(layout)
    }

    fn from_layout(layout: init::Layout) -> Result<Self, RepoError> {
        let init::Layout { git_dir, work_tree } = layout;
        let hash_algo = init::recorded_hash_algorithm(&git_dir);
        let options = Library::settings().odb_options(hash_algo);
        let odb = ObjectDatabase::open_with(git_dir.join("objects"), options)?;
        let refs = RefStore::new(&git_dir);
        tracing::debug!(git_dir = %git_dir.display(), bare = work_tree.is_none(), "opened repository");
        Ok(Self {
            git_dir,
            work_tree,
            odb,
            refs,
            hash_algo,
            merge_preference: MergePreference::None,
        })
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    /// `None` for bare repositories.
    pub fn work_tree(&self) -> Option<&Path> {
        self.work_tree.as_deref()
    }

    pub fn is_bare(&self) -> bool {
        self.work_tree.is_none()
    }

    pub fn odb(&self) -> &ObjectDatabase {
        &self.odb
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    pub fn hash_algo(&self) -> HashAlgorithm {
        self.hash_algo
    }

    pub fn index_path(&self) -> PathBuf {
        self.git_dir.join("index")
    }

    /// Load the index file, or an empty index bound to its path.
    pub fn index(&self) -> Result<Index, RepoError> {
        Ok(Index::open(self.index_path(), self.hash_algo)?)
    }

    pub fn head(&self) -> Result<Head, RepoError> {
        match self.refs.read(refs::HEAD)? {
            Some(Reference::Symbolic { target, .. }) => {
                let oid = self.refs.resolve(&target)?;
                Ok(Head::Branch { name: target, oid })
            }
            Some(Reference::Direct { target, .. }) => Ok(Head::Detached(target)),
            None => Err(RepoError::RefNotFound(refs::HEAD.into())),
        }
    }

    pub fn head_oid(&self) -> Result<Option<ObjectId>, RepoError> {
        Ok(self.head()?.oid())
    }

    pub fn is_unborn(&self) -> Result<bool, RepoError> {
        Ok(self.head_oid()?.is_none())
    }

    /// Move whatever `HEAD` names (its branch, or `HEAD` itself when
    /// detached) to `oid`.
    pub fn set_head_target(&self, oid: &ObjectId) -> Result<(), RepoError> {
        match self.head()? {
            Head::Branch { name, .. } => self.refs.update(&name, oid),
            Head::Detached(_) => self.refs.update(refs::HEAD, oid),
        }
    }

    pub fn set_head_detached(&self, oid: &ObjectId) -> Result<(), RepoError> {
        self.refs.update(refs::HEAD, oid)
    }

    /// Write a commit object; references are left alone.
    pub fn commit_tree(
        &self,
        tree: &ObjectId,
        parents: &[ObjectId],
        message: &str,
        signature: &Signature,
    ) -> Result<ObjectId, RepoError> {
        let mut message = BString::from(message);
        if !message.ends_with(b"\n") {
            message.push(b'\n');
        }
        let commit = Commit {
            tree: *tree,
            parents: parents.to_vec(),
            author: signature.clone(),
            committer: signature.clone(),
            encoding: None,
            gpgsig: None,
            extra_headers: Vec::new(),
            message,
        };
        let oid = self.odb.write(ObjectType::Commit, &commit.serialize_content())?;
        tracing::debug!(%oid, %tree, parents = parents.len(), "wrote commit");
        Ok(oid)
    }

    /// Commits reachable from `local` but not `upstream`, and the reverse.
    pub fn graph_ahead_behind(&self, local: &ObjectId, upstream: &ObjectId) -> Result<(usize, usize), RepoError> {
        Ok(gitcore_revwalk::ahead_behind(&self.odb, local, upstream)?)
    }

    pub fn merge_base(&self, a: &ObjectId, b: &ObjectId) -> Result<Option<ObjectId>, RepoError> {
        Ok(gitcore_revwalk::merge_base(&self.odb, a, b)?)
    }

    pub fn merge_bases(&self, a: &ObjectId, b: &ObjectId) -> Result<Vec<ObjectId>, RepoError> {
        Ok(gitcore_revwalk::merge_bases(&self.odb, a, b)?)
    }

    pub fn merge_preference(&self) -> MergePreference {
        self.merge_preference
    }

    pub fn set_merge_preference(&mut self, preference: MergePreference) {
        self.merge_preference = preference;
    }

    fn require_work_tree(&self) -> Result<&Path, RepoError> {
        self.work_tree.as_deref().ok_or(RepoError::BareNoWorkTree)
    }
}
