//! Single-writer lock for the umbrella index
//!
//! Advisory lock via fd-lock on a sidecar `.lock` file. Every index
//! read-modify-write runs inside [`IndexLock::exclusive`].

use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::StoreError;

/// Index lock wrapper
pub struct IndexLock {
    path: PathBuf,
    lock: RwLock<File>,
}

impl IndexLock {
    /// Open (or create) the lock file next to `index_path`
    pub fn open(index_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = index_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let path = index_path.with_extension("lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::Lock(format!("Failed to open lock file {}: {e}", path.display())))?;

        Ok(Self {
            path,
            lock: RwLock::new(file),
        })
    }

    /// Run `f` while holding the exclusive lock
    ///
    /// Blocks until the lock is available; released when `f` returns.
    pub fn exclusive<T>(
        &mut self,
        f: impl FnOnce() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _guard = self
            .lock
            .write()
            .map_err(|e| StoreError::Lock(format!("Failed to acquire lock: {e}")))?;
        debug!(path = %self.path.display(), "Index lock acquired");
        f()
    }
}
