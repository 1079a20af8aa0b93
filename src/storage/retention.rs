use crate::capture::parse_timestamp;
use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tokio::fs;
use tracing::{debug, info, warn};

/// Outcome of one retention pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrimReport {
    /// Top-level entries looked at
    pub scanned: usize,
    pub removed: Vec<PathBuf>,
    /// Files, symlinks, unrecognized names and directories inside the horizon
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
}

/// Age-based trimming of capture event directories.
///
/// Only direct child directories of the capture root whose names parse as an
/// event timestamp are ever removed. Everything else is left alone.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    horizon: Duration,
}

impl RetentionPolicy {
    pub fn new(horizon: Duration) -> Self {
        Self { horizon }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    pub fn is_event_directory_name(&self, name: &str) -> bool {
        parse_timestamp(name).is_some()
    }

    /// Expired event directories, oldest first, without deleting anything
    pub async fn plan(&self, root: &Path, now: SystemTime) -> Result<Vec<PathBuf>> {
        Ok(self.scan(root, now).await?.0)
    }

    /// Delete every expired event directory under `root`
    pub async fn trim(&self, root: &Path, now: SystemTime) -> Result<TrimReport> {
        let started = Instant::now();
        let (expired, mut report) = self.scan(root, now).await?;

        for path in expired {
            match self.remove(root, &path).await {
                Ok(()) => {
                    info!("Removed expired capture {}", path.display());
                    report.removed.push(path);
                }
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    report.failed += 1;
                }
            }
        }

        report.duration = started.elapsed();
        Ok(report)
    }

    async fn scan(&self, root: &Path, now: SystemTime) -> Result<(Vec<PathBuf>, TrimReport)> {
        let mut report = TrimReport::default();
        let cutoff = DateTime::<Utc>::from(now.checked_sub(self.horizon).unwrap_or(SystemTime::UNIX_EPOCH));

        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Capture root {} does not exist yet", root.display());
                return Ok((Vec::new(), report));
            }
            Err(e) => {
                return Err(StorageError::DirectoryScan {
                    path: root.display().to_string(),
                    source: e,
                }
                .into())
            }
        };

        let mut expired = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(StorageError::DirectoryScan {
                        path: root.display().to_string(),
                        source: e,
                    }
                    .into())
                }
            };
            report.scanned += 1;

            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir() && !t.is_symlink())
                .unwrap_or(false);
            let name = entry.file_name().to_string_lossy().into_owned();
            let parsed = parse_timestamp(&name);

            match parsed {
                Some(created) if is_dir && created < cutoff => expired.push((created, entry.path())),
                Some(_) if is_dir => report.skipped += 1,
                _ => {
                    debug!("Retention ignoring {}", entry.path().display());
                    report.skipped += 1;
                }
            }
        }

        expired.sort();
        Ok((expired.into_iter().map(|(_, path)| path).collect(), report))
    }

    /// Re-check a candidate right before deleting it
    async fn remove(&self, root: &Path, path: &Path) -> Result<()> {
        let unsafe_deletion = |reason: &str| StorageError::UnsafeDeletion {
            path: path.display().to_string(),
            reason: reason.to_string(),
        };

        if path.parent() != Some(root) {
            return Err(unsafe_deletion("not directly under the capture root").into());
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| unsafe_deletion("name is not valid UTF-8"))?;
        if !self.is_event_directory_name(name) {
            return Err(unsafe_deletion("name is not an event timestamp").into());
        }

        let metadata = fs::symlink_metadata(path)
            .await
            .map_err(|e| StorageError::Deletion {
                path: path.display().to_string(),
                source: e,
            })?;
        if !metadata.is_dir() {
            return Err(unsafe_deletion("not a directory").into());
        }

        fs::remove_dir_all(path)
            .await
            .map_err(|e| StorageError::Deletion {
                path: path.display().to_string(),
                source: e,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::format_timestamp;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    fn policy() -> RetentionPolicy {
        RetentionPolicy::new(7 * DAY)
    }

    fn event_dir(root: &Path, at: SystemTime) -> PathBuf {
        let path = root.join(format_timestamp(at));
        std::fs::create_dir_all(path.join("images")).unwrap();
        std::fs::write(path.join("images").join("frame.jpg"), b"jpg").unwrap();
        path
    }

    #[test]
    fn test_event_directory_names() {
        let policy = policy();
        assert!(policy.is_event_directory_name("20240101_120000_000"));
        assert!(!policy.is_event_directory_name("20240101_120000"));
        assert!(!policy.is_event_directory_name("lost+found"));
        assert!(!policy.is_event_directory_name("20241301_120000_000"));
    }

    #[tokio::test]
    async fn test_fresh_directory_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let fresh = event_dir(dir.path(), now);

        let report = policy().trim(dir.path(), now).await.unwrap();

        assert!(report.removed.is_empty());
        assert_eq!(report.scanned, 1);
        assert_eq!(report.skipped, 1);
        assert!(fresh.exists());
    }

    #[tokio::test]
    async fn test_expired_directory_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let old = event_dir(dir.path(), now - 8 * DAY);
        let recent = event_dir(dir.path(), now - 6 * DAY);

        let report = policy().trim(dir.path(), now).await.unwrap();

        assert_eq!(report.removed, vec![old.clone()]);
        assert_eq!(report.failed, 0);
        assert!(!old.exists());
        assert!(recent.exists());
    }

    #[tokio::test]
    async fn test_unrecognized_entries_are_never_touched() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let long_ago = now - 365 * DAY;

        let notes = dir.path().join("notes");
        std::fs::create_dir(&notes).unwrap();
        // A file with an event-style name
        let file = dir.path().join(format_timestamp(long_ago));
        std::fs::write(&file, b"not a directory").unwrap();

        #[cfg(unix)]
        let link = {
            let target = event_dir(&dir.path().join("elsewhere"), long_ago);
            let link = dir
                .path()
                .join(format_timestamp(long_ago + DAY));
            std::os::unix::fs::symlink(&target, &link).unwrap();
            link
        };

        let report = policy().trim(dir.path(), now).await.unwrap();

        assert!(report.removed.is_empty());
        assert!(notes.is_dir());
        assert!(file.is_file());
        #[cfg(unix)]
        assert!(link.exists());
    }

    #[tokio::test]
    async fn test_plan_is_a_dry_run() {
        let dir = tempfile::tempdir().unwrap();
        let now = SystemTime::now();
        let older = event_dir(dir.path(), now - 20 * DAY);
        let old = event_dir(dir.path(), now - 10 * DAY);

        let planned = policy().plan(dir.path(), now).await.unwrap();

        assert_eq!(planned, vec![older.clone(), old.clone()]);
        assert!(older.exists());
        assert!(old.exists());
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let report = policy()
            .trim(&dir.path().join("missing"), SystemTime::now())
            .await
            .unwrap();
        assert_eq!(report.scanned, 0);
    }

    #[tokio::test]
    async fn test_remove_rejects_nested_paths() {
        let dir = tempfile::tempdir().unwrap();
        let nested = event_dir(&dir.path().join("sub"), SystemTime::now() - 30 * DAY);

        let err = policy().remove(dir.path(), &nested).await.unwrap_err();
        assert!(matches!(
            err,
            crate::error::DoorcamError::Storage(StorageError::UnsafeDeletion { .. })
        ));
        assert!(nested.exists());
    }
}
