//! Cross-process advisory locking.
//!
//! Every mutating lifecycle operation serializes on a per-identity flock,
//! so concurrent invocations of the supervisor against the same process
//! never race, even from different OS processes. Locks are held for the
//! duration of exactly one operation and released on every exit path.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use rustix::fs::{FlockOperation, flock};

use crate::config::Identity;
use crate::error::{Error, Result};
use crate::ids;

/// A filesystem-backed advisory lock handle.
///
/// Acquisition blocks until the exclusive flock is granted. Unlocking a
/// handle that is not currently held panics: it signals a lifecycle
/// invariant violation that would otherwise surface later as a deadlock.
#[derive(Debug)]
pub struct LockFile {
    file: File,
    path: PathBuf,
    held: bool,
}

impl LockFile {
    /// Open or create the lock file without truncation. The parent
    /// directory must already exist.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| Error::Lock {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            file,
            path,
            held: false,
        })
    }

    /// Block until an exclusive advisory lock on the file is obtained.
    ///
    /// The flock syscall blocks the calling thread, so it runs on the
    /// blocking pool. Duplicated descriptors share the open file
    /// description, so locking the clone locks this handle.
    pub async fn lock(&mut self) -> Result<()> {
        let file = self.file.try_clone().map_err(|source| Error::Lock {
            path: self.path.clone(),
            source,
        })?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            flock(&file, FlockOperation::LockExclusive).map_err(|errno| Error::Lock {
                path,
                source: errno.into(),
            })
        })
        .await
        .map_err(|join| Error::Lock {
            path: self.path.clone(),
            source: std::io::Error::other(join),
        })??;
        self.held = true;
        Ok(())
    }

    /// Release the lock.
    ///
    /// # Panics
    ///
    /// Panics if this handle does not currently hold the lock.
    pub fn unlock(&mut self) -> Result<()> {
        assert!(
            self.held,
            "unlock of lock file {} that is not held",
            self.path.display()
        );
        flock(&self.file, FlockOperation::Unlock).map_err(|errno| Error::Lock {
            path: self.path.clone(),
            source: errno.into(),
        })?;
        self.held = false;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A keyed namespace of lock files under a fixed directory.
///
/// Distinct keys never collide because file names are derived with the
/// identifier codec; identical keys always map to the same file and thus
/// serialize across OS processes.
#[derive(Debug, Clone)]
pub struct LockDir {
    dir: PathBuf,
}

impl LockDir {
    /// The directory must pre-exist and be shared host-wide.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The lock handle for a process identity.
    pub fn lock_for(&self, identity: &Identity) -> Result<LockFile> {
        self.keyed(&ids::for_identity(identity))
    }

    /// The lock handle for a shared volume path.
    pub fn lock_for_path(&self, path: &Path) -> Result<LockFile> {
        self.keyed(&ids::encode(&path.to_string_lossy()))
    }

    fn keyed(&self, key: &str) -> Result<LockFile> {
        LockFile::create(self.dir.join(format!("{key}.lock")))
    }
}
