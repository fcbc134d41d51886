//! Lockfile disk access.
//!
//! Reads are best-effort; the only exclusive-write window is the atomic
//! rename inside [`atomic_write`]. No lock is held across user-visible
//! operations.

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Read a lockfile, returning `None` when it does not exist.
pub fn read_lockfile(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read lockfile at {}", path.display()))?;
    Ok(Some(raw))
}

/// Write `content` to `path` atomically: temp file, fsync, rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    let temp_path = path.with_extension("lock.tmp");
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("Failed to create temp file {}", temp_path.display()))?;
        file.write_all(content)
            .with_context(|| format!("Failed to write temp file {}", temp_path.display()))?;
        file.sync_all().context("Failed to sync lockfile to disk")?;
    }
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_lockfile_reads_as_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_lockfile(&dir.path().join("gems.lock")).unwrap().is_none());
    }

    #[test]
    fn atomic_write_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gems.lock");
        atomic_write(&path, b"GEM\n").unwrap();
        assert_eq!(read_lockfile(&path).unwrap().unwrap(), "GEM\n");
        atomic_write(&path, b"PATH\n").unwrap();
        assert_eq!(read_lockfile(&path).unwrap().unwrap(), "PATH\n");
    }
}
