use crate::error::{CaptureError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, warn};

/// Event directory names and frame file stems, always in UTC so names sort
/// in capture order across DST changes
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

pub const IMAGES_DIR: &str = "images";
pub const PROCESSED_DIR: &str = "processed";
pub const METADATA_FILE: &str = "metadata.json";

/// Resolve the overlay timezone, falling back to UTC on parse errors
pub fn resolve_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Invalid timestamp timezone '{}', falling back to UTC", tz_name);
            chrono_tz::UTC
        }
    }
}

pub fn format_timestamp(timestamp: SystemTime) -> String {
    DateTime::<Utc>::from(timestamp)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Parse a name produced by [`format_timestamp`]. Anything else is `None`.
pub fn parse_timestamp(name: &str) -> Option<DateTime<Utc>> {
    // The fixed format is exactly 19 characters: 8 date, 6 time, 3 millis, 2 separators
    if name.len() != 19 {
        return None;
    }
    NaiveDateTime::parse_from_str(name, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// One motion-triggered recording session on disk.
///
/// ```text
/// <root>/<id>/images/<frame timestamp>.jpg
/// <root>/<id>/processed/
/// <root>/<id>/<id>.mp4
/// <root>/<id>/metadata.json
/// ```
#[derive(Debug, Clone)]
pub struct CaptureEvent {
    pub id: String,
    pub dir: PathBuf,
    pub images_dir: PathBuf,
    pub started_at: SystemTime,
    /// Event type that opened the recording
    pub trigger: String,
}

impl CaptureEvent {
    pub fn new(root: &Path, started_at: SystemTime, trigger: &str) -> Self {
        let id = format_timestamp(started_at);
        let dir = root.join(&id);
        let images_dir = dir.join(IMAGES_DIR);

        Self {
            id,
            dir,
            images_dir,
            started_at,
            trigger: trigger.to_string(),
        }
    }

    /// Create the event and image directories
    pub async fn create_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|e| CaptureError::DirectoryCreation {
                path: self.images_dir.display().to_string(),
                source: e,
            })?;
        debug!("Created capture directory {}", self.dir.display());
        Ok(())
    }

    pub fn processed_dir(&self) -> PathBuf {
        self.dir.join(PROCESSED_DIR)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn video_path(&self) -> PathBuf {
        self.dir.join(format!("{}.mp4", self.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);

        let name = format_timestamp(ts);
        assert_eq!(name, "20231114_221320_123");

        let parsed = parse_timestamp(&name).unwrap();
        assert_eq!(parsed.timestamp_millis(), 1_700_000_000_123);
    }

    #[test]
    fn test_names_sort_in_capture_order_across_fall_back() {
        // 2024-11-03 05:59:59.900Z is 01:59:59.900 EDT, 200ms later is 01:00:00.100 EST
        let before = SystemTime::UNIX_EPOCH + Duration::from_millis(1_730_613_599_900);
        let after = before + Duration::from_millis(200);

        let earlier = format_timestamp(before);
        let later = format_timestamp(after);
        assert_eq!(earlier, "20241103_055959_900");
        assert_eq!(later, "20241103_060000_100");
        assert!(earlier < later);

        assert_eq!(
            parse_timestamp(&earlier).unwrap(),
            DateTime::<Utc>::from(before)
        );
        assert_eq!(parse_timestamp(&later).unwrap(), DateTime::<Utc>::from(after));
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert!(parse_timestamp("wal").is_none());
        assert!(parse_timestamp("20240101_120000").is_none());
        assert!(parse_timestamp("20241301_120000_000").is_none());
        assert!(parse_timestamp("20240101_120000_000.jpg").is_none());
        assert!(parse_timestamp("20240101_120000_000").is_some());
    }

    #[test]
    fn test_event_layout() {
        let ts = SystemTime::UNIX_EPOCH + Duration::from_secs(86_400);
        let event = CaptureEvent::new(Path::new("/captures"), ts, "motion_detected");

        assert_eq!(event.id, "19700102_000000_000");
        assert_eq!(event.dir, Path::new("/captures/19700102_000000_000"));
        assert_eq!(event.images_dir, event.dir.join("images"));
        assert_eq!(event.video_path(), event.dir.join("19700102_000000_000.mp4"));
        assert_eq!(event.metadata_path(), event.dir.join("metadata.json"));
    }

    #[test]
    fn test_invalid_timezone_falls_back_to_utc() {
        assert_eq!(resolve_timezone("Not/AZone"), chrono_tz::UTC);
    }
}
