//! Advisory lock coordination.
//!
//! Each ring buffer has a companion `<name>.lock` file. Creation and rotation
//! take it exclusively; loads may take it shared so they never map a buffer
//! in the middle of a rotation. Ordinary enqueue and dequeue never touch it.
//!
//! The lock file is never deleted: unlinking it would race with a process
//! already waiting on the old inode.

use crate::error::{Result, RingBufError};
use crate::paths::lock_path;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Many holders; excludes exclusive holders.
    Shared,
    /// Single holder.
    Exclusive,
}

/// A held advisory lock, released on drop.
///
/// A guard may also be empty when the lock file was allowed to be missing,
/// in which case there was nothing to coordinate with.
#[derive(Debug)]
pub struct LockGuard {
    file: Option<File>,
    path: PathBuf,
    mode: LockMode,
}

impl LockGuard {
    /// Take the lock of the ring buffer at `rb_path`, blocking until granted.
    ///
    /// With `must_preexist`, a missing lock file is not an error: archived
    /// buffers are immutable and have no lock file, so an empty guard is
    /// returned. Otherwise the lock file is created if needed.
    pub fn acquire(rb_path: &Path, mode: LockMode, must_preexist: bool) -> Result<Self> {
        let path = lock_path(rb_path);

        let mut options = OpenOptions::new();
        options.read(true);
        if !must_preexist {
            options.write(true).create(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let file = match options.open(&path) {
            Ok(file) => file,
            Err(e) if must_preexist && e.kind() == io::ErrorKind::NotFound => {
                tracing::trace!(path = %path.display(), "No lock file, nothing to coordinate with");
                return Ok(Self {
                    file: None,
                    path,
                    mode,
                });
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Cannot open lock file");
                return Err(RingBufError::Lock {
                    path,
                    cause: format!("cannot open: {}", e),
                });
            }
        };

        loop {
            let locked = match mode {
                LockMode::Shared => FileExt::lock_shared(&file),
                LockMode::Exclusive => FileExt::lock_exclusive(&file),
            };
            match locked {
                Ok(()) => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Cannot lock");
                    return Err(RingBufError::Lock {
                        path,
                        cause: e.to_string(),
                    });
                }
            }
        }

        tracing::trace!(path = %path.display(), ?mode, "Lock acquired");
        Ok(Self {
            file: Some(file),
            path,
            mode,
        })
    }

    /// Whether a lock is actually held (false for an empty guard).
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// The lock mode requested.
    pub fn mode(&self) -> LockMode {
        self.mode
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock, reporting failure.
    ///
    /// Dropping the guard releases it too, but can only log errors.
    pub fn release(mut self) -> Result<()> {
        self.unlock()
    }

    fn unlock(&mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => {
                FileExt::unlock(&file).map_err(|e| RingBufError::Lock {
                    path: self.path.clone(),
                    cause: format!("cannot unlock: {}", e),
                })?;
                tracing::trace!(path = %self.path.display(), "Lock released");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Closing the descriptor drops the flock anyway.
        if let Err(e) = self.unlock() {
            tracing::error!(error = %e, "Lock release failed");
        }
    }
}
