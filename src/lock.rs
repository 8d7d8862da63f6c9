//! Single-instance locking for a backup root
//!
//! One exclusive, non-blocking `flock` on a lock file inside the root
//! guards the whole run: validation has already happened by the time the
//! lock is taken, and the lock stays held through transfer, rotation, and
//! publish. The kernel releases it when the process exits, normal or not,
//! so a crashed run never wedges the root.

use crate::error::{Result, SnapError};
use nix::fcntl::{flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::types::LOCK_FILE_NAME;

/// An exclusive lock over one backup root, held until dropped
#[derive(Debug)]
pub struct RootLock {
    root: PathBuf,
    // Held open for the lifetime of the lock; closing the descriptor
    // releases the flock.
    _file: File,
}

impl RootLock {
    /// Acquire the root's lock without blocking
    ///
    /// # Errors
    ///
    /// [`SnapError::Lock`] when another run already holds the lock; the
    /// caller is expected to exit rather than queue or retry.
    pub fn acquire(root: &Path) -> Result<RootLock> {
        let lock_path = root.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&lock_path)?;

        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => {}
            Err(nix::errno::Errno::EWOULDBLOCK) => {
                return Err(SnapError::Lock {
                    root: root.to_path_buf(),
                });
            }
            Err(errno) => {
                return Err(std::io::Error::from_raw_os_error(errno as i32).into());
            }
        }

        debug!(root = %root.display(), "acquired backup root lock");
        Ok(RootLock {
            root: root.to_path_buf(),
            _file: file,
        })
    }

    /// Root this lock guards
    pub fn root(&self) -> &Path {
        &self.root
    }
}
