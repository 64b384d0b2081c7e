//! Cross-process advisory lock guarding the ledger file.

use crate::utils::errors::LedgerError;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// An exclusive `flock(2)` on the ledger's lock file.
///
/// Acquisition blocks until every other holder has released the lock. The
/// lock is released when the guard is dropped.
pub struct LedgerLock {
    _lock: Flock<File>,
    path: PathBuf,
}

impl LedgerLock {
    pub fn acquire(path: &Path) -> Result<Self, LedgerError> {
        let lock_error = |reason: String| LedgerError::Lock {
            path: path.to_path_buf(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| lock_error(e.to_string()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| lock_error(e.to_string()))?;

        debug!("Locking {}, this blocks while another run holds it", path.display());
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| lock_error(errno.to_string()))?;
        debug!("Locked {}", path.display());

        Ok(Self {
            _lock: lock,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LedgerLock {
    fn drop(&mut self) {
        debug!("Releasing {}", self.path.display());
    }
}
