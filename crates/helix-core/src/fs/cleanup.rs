//! Recovery from interrupted writes.
//!
//! A crash between staging and commit can leave `*.~hx-st` (never committed)
//! and `*.~hx-bk` (previous version moved aside) files behind. Staging files are
//! deleted. A backup is restored when its live file is missing and deleted
//! otherwise.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use super::file::{BACKUP_SUFFIX, STAGING_SUFFIX};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub staging_removed: Vec<PathBuf>,
    pub backups_restored: Vec<PathBuf>,
    pub backups_removed: Vec<PathBuf>,
}

impl CleanupReport {
    pub fn is_empty(&self) -> bool {
        self.staging_removed.is_empty() && self.backups_restored.is_empty() && self.backups_removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.staging_removed.len() + self.backups_restored.len() + self.backups_removed.len()
    }
}

/// Clean up interrupted writes anywhere below `root`.
pub fn cleanup_tree(root: &Path) -> io::Result<CleanupReport> {
    let mut report = CleanupReport::default();
    if !root.exists() {
        return Ok(report);
    }

    let mut backups = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.ends_with(STAGING_SUFFIX) && !entry.file_type().is_dir() {
            fs::remove_file(entry.path())?;
            report.staging_removed.push(entry.path().to_path_buf());
        } else if name.ends_with(BACKUP_SUFFIX) {
            backups.push(entry.path().to_path_buf());
        }
    }

    // Backups may be directories; handle them after the walk.
    for backup in backups {
        let Some(live) = backup
            .to_str()
            .and_then(|s| s.strip_suffix(BACKUP_SUFFIX))
            .map(PathBuf::from)
        else {
            continue;
        };
        if fs::symlink_metadata(&live).is_ok() {
            let removed = if backup.is_dir() {
                fs::remove_dir(&backup)
            } else {
                fs::remove_file(&backup)
            };
            match removed {
                Ok(()) => report.backups_removed.push(backup),
                Err(e) => warn!(path = %backup.display(), error = %e, "Failed to remove stale backup"),
            }
        } else {
            fs::rename(&backup, &live)?;
            report.backups_restored.push(live);
        }
    }

    if !report.is_empty() {
        info!(root = %root.display(), cleaned = report.total(), "Cleaned up interrupted writes");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removes_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/a.hx.~hx-st"), b"partial").unwrap();
        fs::write(dir.path().join("keep.hx"), b"data").unwrap();

        let report = cleanup_tree(dir.path()).unwrap();
        assert_eq!(report.staging_removed.len(), 1);
        assert!(!dir.path().join("sub/a.hx.~hx-st").exists());
        assert!(dir.path().join("keep.hx").exists());
    }

    #[test]
    fn test_restores_orphaned_backup() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("doc.txt.~hx-bk"), b"previous").unwrap();

        let report = cleanup_tree(dir.path()).unwrap();
        assert_eq!(report.backups_restored, vec![dir.path().join("doc.txt")]);
        assert_eq!(fs::read(dir.path().join("doc.txt")).unwrap(), b"previous");
    }

    #[test]
    fn test_drops_backup_when_live_exists() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("doc.txt"), b"current").unwrap();
        fs::write(dir.path().join("doc.txt.~hx-bk"), b"previous").unwrap();

        let report = cleanup_tree(dir.path()).unwrap();
        assert_eq!(report.backups_removed.len(), 1);
        assert_eq!(fs::read(dir.path().join("doc.txt")).unwrap(), b"current");
    }

    #[test]
    fn test_missing_root_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cleanup_tree(&dir.path().join("absent")).unwrap().is_empty());
    }
}
