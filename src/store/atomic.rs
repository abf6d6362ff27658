//! Diff-guarded atomic file writes
//!
//! Files are replaced through a temp file in the same directory, fsynced and
//! renamed over the target, then the directory is fsynced so the rename
//! survives a crash. [`write_if_changed`] skips all of that when the bytes on
//! disk already match.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::Path;
use tracing::debug;

use super::StoreError;

/// Serialize as pretty JSON with a trailing newline
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Hex SHA-256 of the given bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Replace `path` with `bytes` atomically
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent_dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent_dir).map_err(|e| StoreError::io(parent_dir, e))?;

    let mut temp_file =
        tempfile::NamedTempFile::new_in(parent_dir).map_err(|e| StoreError::io(parent_dir, e))?;
    temp_file.write_all(bytes).map_err(|e| StoreError::io(path, e))?;

    // Data must be on disk before the rename makes it visible
    temp_file.flush().map_err(|e| StoreError::io(path, e))?;
    temp_file
        .as_file()
        .sync_all()
        .map_err(|e| StoreError::io(path, e))?;

    temp_file
        .persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;

    if let Ok(dir) = std::fs::File::open(parent_dir) {
        let _ = dir.sync_all();
    }

    debug!(path = %path.display(), bytes = bytes.len(), "File written atomically");
    Ok(())
}

/// Write `bytes` to `path` unless the file already holds exactly these bytes
///
/// Returns whether a write happened.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> Result<bool, StoreError> {
    match std::fs::read(path) {
        Ok(current) if current == bytes => {
            debug!(path = %path.display(), "Content unchanged, skipping write");
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(StoreError::io(path, e)),
    }

    write_atomic(path, bytes)?;
    Ok(true)
}
