//! Atomic file writes.
//!
//! Protocol: write to `path.tmp.<uuid>` in the same directory, `fsync`,
//! re-read and verify a SHA-256 checksum, rename over the target, `fsync`
//! the directory. The rename is the commit point; a checksum mismatch
//! aborts before it and removes the temp file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use glc_core::DataError;

fn io_err(what: &str, path: &Path, e: std::io::Error) -> DataError {
    DataError::TransientSource(format!("{what} {}: {e}", path.display()))
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "out".to_string());
    path.with_file_name(format!("{file_name}.tmp.{}", Uuid::new_v4()))
}

/// Write `bytes` to `path` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), DataError> {
    let tmp = temp_path(path);
    let result = write_via_temp(path, &tmp, bytes);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_via_temp(path: &Path, tmp: &Path, bytes: &[u8]) -> Result<(), DataError> {
    let expected = Sha256::digest(bytes);

    let mut file = fs::File::create(tmp).map_err(|e| io_err("create", tmp, e))?;
    file.write_all(bytes).map_err(|e| io_err("write", tmp, e))?;
    file.sync_all().map_err(|e| io_err("fsync", tmp, e))?;
    drop(file);

    // Verify what actually reached the disk before committing.
    let on_disk = fs::read(tmp).map_err(|e| io_err("read back", tmp, e))?;
    let actual = Sha256::digest(&on_disk);
    if actual != expected {
        return Err(DataError::MalformedInput(format!(
            "checksum mismatch writing {}: expected {}, got {}",
            path.display(),
            hex::encode(expected),
            hex::encode(actual),
        )));
    }

    fs::rename(tmp, path).map_err(|e| io_err("rename", tmp, e))?;

    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            // Persist the rename itself.
            if let Ok(d) = fs::File::open(dir) {
                let _ = d.sync_all();
            }
        }
    }

    debug!(path = %path.display(), bytes = bytes.len(), "atomic write committed");
    Ok(())
}
