//! Atomic file replacement (write temp file, then rename over the target)

use crate::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Path of the temporary sibling used while writing `target`
pub fn temp_path_for(target: &Path) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    target.with_file_name(name)
}

/// Write `contents` to `target` so readers never observe a partial file.
///
/// Parent directories are created if missing. The temp file is removed if the
/// rename fails.
pub fn write_atomic(target: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let temp = temp_path_for(target);
    {
        let mut file = fs::File::create(&temp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&temp, target) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("annotations.json");

        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
        assert!(!temp_path_for(&target).exists());
    }

    #[test]
    fn test_write_atomic_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("nested/deeper/annotations.json");

        write_atomic(&target, b"{}").unwrap();

        assert!(target.exists());
    }
}
