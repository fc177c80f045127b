use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::error::{LockError, UtilError};
use crate::Result;

const LOCK_SUFFIX: &str = ".lock";

/// Advisory lock guarding a file replacement.
///
/// `acquire` creates `<path>.lock` exclusively; new contents are written to
/// the lock file and `commit` fsyncs it and renames it over the target.
/// Readers of the target keep seeing the previous contents until the rename.
/// Dropping an uncommitted lock removes the lock file and leaves the target
/// untouched.
#[derive(Debug)]
pub struct LockFile {
    target: PathBuf,
    lock_path: PathBuf,
    file: Option<File>,
    finished: bool,
}

impl LockFile {
    /// Take the lock for `path`, failing with `AlreadyLocked` if another
    /// writer holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let target = path.as_ref().to_path_buf();
        let mut lock_name = target.clone().into_os_string();
        lock_name.push(LOCK_SUFFIX);
        let lock_path = PathBuf::from(lock_name);

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
            .map_err(|source| {
                if source.kind() == io::ErrorKind::AlreadyExists {
                    LockError::AlreadyLocked {
                        path: lock_path.clone(),
                    }
                } else {
                    LockError::Create {
                        path: lock_path.clone(),
                        source,
                    }
                }
            })?;

        tracing::trace!(path = %lock_path.display(), "lock acquired");
        Ok(Self {
            target,
            lock_path,
            file: Some(file),
            finished: false,
        })
    }

    /// Like [`acquire`](Self::acquire) but returns `Ok(None)` when the lock is held.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        match Self::acquire(path) {
            Ok(lock) => Ok(Some(lock)),
            Err(UtilError::Lock(LockError::AlreadyLocked { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Replace `path` with `contents` under a lock.
    pub fn write_atomic(path: impl AsRef<Path>, contents: &[u8]) -> Result<()> {
        let mut lock = Self::acquire(path)?;
        lock.write_all(contents)?;
        lock.commit()
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Flush, fsync, and rename the lock file over the target.
    pub fn commit(mut self) -> Result<()> {
        let commit_err = |path: &Path, source| LockError::Commit {
            path: path.to_path_buf(),
            source,
        };

        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| commit_err(&self.lock_path, e))?;
            file.sync_all().map_err(|e| commit_err(&self.lock_path, e))?;
        }
        fs::rename(&self.lock_path, &self.target).map_err(|e| commit_err(&self.lock_path, e))?;

        self.finished = true;
        tracing::trace!(path = %self.target.display(), "lock committed");
        Ok(())
    }

    /// Discard the new contents and release the lock.
    pub fn rollback(mut self) -> Result<()> {
        self.file.take();
        self.finished = true;
        match fs::remove_file(&self.lock_path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn file(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("lock file already closed"))
    }
}

impl Write for LockFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file()?.flush()
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if !self.finished {
            self.file.take();
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
