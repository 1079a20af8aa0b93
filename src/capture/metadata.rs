use crate::error::{CaptureError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Counters for the event recorder
#[derive(Debug, Clone, Default, Serialize)]
pub struct CaptureStats {
    pub recording: bool,
    pub current_event: Option<String>,
    pub events_started: u64,
    pub events_completed: u64,
    pub events_abandoned: u64,
    pub frames_written: u64,
    pub write_errors: u64,
}

/// Written next to the images as `metadata.json` when an event is sealed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub event_id: String,
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub sealed_at: DateTime<Utc>,
    /// Triggers received while recording, the opening one included
    pub trigger_count: u32,
    pub preroll_frame_count: usize,
    pub total_frame_count: usize,
    pub write_errors: usize,
    pub first_frame: Option<String>,
    pub last_frame: Option<String>,
    pub camera_fps: u32,
    pub preroll_seconds: u32,
    pub postroll_seconds: u32,
}

pub(crate) async fn save_metadata(metadata: &CaptureMetadata, path: &Path) -> Result<()> {
    let metadata_json =
        serde_json::to_string_pretty(metadata).map_err(|e| CaptureError::MetadataWrite {
            details: format!("Failed to serialize metadata: {}", e),
        })?;

    fs::write(path, metadata_json)
        .await
        .map_err(|e| CaptureError::MetadataWrite {
            details: format!("Failed to write {}: {}", path.display(), e),
        })?;

    debug!("Saved metadata to {}", path.display());
    Ok(())
}
