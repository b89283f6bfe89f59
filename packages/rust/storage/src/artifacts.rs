//! Transcript artifact files under `transcripts/`.
//!
//! Artifacts are written to a hidden `.{name}.tmp` sibling, flushed to disk
//! and renamed into place, so a reader never observes a partial file.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use hearings_shared::{HarvestError, Result};

/// Hex-encoded SHA-256 of `bytes`.
pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write `content` to `dir/name` atomically. Returns the content hash.
pub(crate) fn write_atomic(dir: &Path, name: &str, content: &[u8]) -> Result<String> {
    let target = dir.join(name);
    let temp = temp_path(dir, name);

    {
        let mut file = File::create(&temp).map_err(|e| HarvestError::io(&temp, e))?;
        file.write_all(content).map_err(|e| HarvestError::io(&temp, e))?;
        file.sync_all().map_err(|e| HarvestError::io(&temp, e))?;
    }

    std::fs::rename(&temp, &target).map_err(|e| HarvestError::io(&target, e))?;
    sync_dir(dir)?;

    debug!(file = %name, size = content.len(), "wrote artifact");
    Ok(sha256_hex(content))
}

fn temp_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!(".{name}.tmp"))
}

/// Persist the rename itself.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .map_err(|e| HarvestError::io(dir, e))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Delete temp files left behind by an interrupted write. Returns how many
/// were removed.
pub(crate) fn sweep_temp_files(dir: &Path) -> Result<usize> {
    let entries = std::fs::read_dir(dir).map_err(|e| HarvestError::io(dir, e))?;
    let mut removed = 0;

    for entry in entries {
        let entry = entry.map_err(|e| HarvestError::io(dir, e))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') && name.ends_with(".tmp") {
            let path = entry.path();
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    warn!(path = %path.display(), "removed stale temp file");
                    removed += 1;
                }
                Err(e) => return Err(HarvestError::io(&path, e)),
            }
        }
    }

    Ok(removed)
}

/// Size of the artifact at `path`, or `None` if it does not exist.
pub(crate) fn artifact_len(path: &Path) -> Result<Option<u64>> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(HarvestError::io(path, e)),
    }
}

/// `*.txt` files in `dir`, sorted by name.
pub(crate) fn list_artifacts(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| HarvestError::io(dir, e))?;
    let mut paths = Vec::new();

    for entry in entries {
        let path = entry.map_err(|e| HarvestError::io(dir, e))?.path();
        if path.extension().is_some_and(|ext| ext == "txt") && path.is_file() {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hearings-artifacts-test-{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let dir = temp_dir();
        let hash = write_atomic(&dir, "1.txt", b"hello").unwrap();

        assert_eq!(std::fs::read_to_string(dir.join("1.txt")).unwrap(), "hello");
        assert!(!temp_path(&dir, "1.txt").exists());
        assert_eq!(hash, sha256_hex(b"hello"));
        assert_eq!(hash.len(), 64);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn overwrite_replaces_content() {
        let dir = temp_dir();
        write_atomic(&dir, "2.txt", b"first draft").unwrap();
        write_atomic(&dir, "2.txt", b"final").unwrap();
        assert_eq!(std::fs::read_to_string(dir.join("2.txt")).unwrap(), "final");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn sweep_removes_only_temp_files() {
        let dir = temp_dir();
        std::fs::write(dir.join(".3.txt.tmp"), "partial").unwrap();
        std::fs::write(dir.join("3.txt"), "whole").unwrap();

        assert_eq!(sweep_temp_files(&dir).unwrap(), 1);
        assert!(dir.join("3.txt").exists());
        assert_eq!(list_artifacts(&dir).unwrap(), vec![dir.join("3.txt")]);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_artifact_has_no_length() {
        let dir = temp_dir();
        assert_eq!(artifact_len(&dir.join("404.txt")).unwrap(), None);
        std::fs::write(dir.join("5.txt"), "").unwrap();
        assert_eq!(artifact_len(&dir.join("5.txt")).unwrap(), Some(0));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
