use super::encode::{EncodeFrame, FfmpegEncoder, VideoEncoder};
use super::overlay::{annotate_file, Annotator};
use super::queue::{JobHandler, PostProcessJob, PostProcessOutcome};
use crate::capture::{parse_timestamp, resolve_timezone, IMAGES_DIR, PROCESSED_DIR};
use crate::config::CaptureConfig;
use crate::error::{DoorcamError, PostProcessError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Annotates, encodes and tidies one sealed capture event
pub struct PostProcessor {
    config: CaptureConfig,
    camera_fps: u32,
    annotator: Arc<Annotator>,
    encoder: Box<dyn VideoEncoder>,
}

impl PostProcessor {
    /// Post-processor using the configured external encoder
    pub fn new(config: CaptureConfig, camera_fps: u32) -> Self {
        let encoder = FfmpegEncoder::new(
            config.encoder_path.clone(),
            Duration::from_secs(config.encoder_timeout_seconds),
        );
        Self::with_encoder(config, camera_fps, Box::new(encoder))
    }

    pub fn with_encoder(
        config: CaptureConfig,
        camera_fps: u32,
        encoder: Box<dyn VideoEncoder>,
    ) -> Self {
        let timezone = resolve_timezone(&config.timestamp_timezone);
        let annotator = Arc::new(Annotator::from_config(&config, timezone));
        Self {
            config,
            camera_fps,
            annotator,
            encoder,
        }
    }

    async fn list_images(&self, images_dir: &Path) -> Result<Vec<EncodeFrame>> {
        let mut entries = tokio::fs::read_dir(images_dir).await.map_err(|_| {
            PostProcessError::NoImages {
                path: images_dir.display().to_string(),
            }
        })?;

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(".jpg") {
                names.push(name);
            }
        }
        names.sort();

        Ok(names
            .into_iter()
            .map(|name| EncodeFrame {
                captured_at: capture_time(&name),
                path: images_dir.join(name),
            })
            .collect())
    }

    /// Write annotated copies into `processed/`; frames that fail keep their raw image
    async fn annotate(
        &self,
        frames: Vec<EncodeFrame>,
        processed_dir: PathBuf,
    ) -> Result<(Vec<EncodeFrame>, usize)> {
        tokio::fs::create_dir_all(&processed_dir).await?;
        let annotator = Arc::clone(&self.annotator);

        tokio::task::spawn_blocking(move || {
            let mut annotated = 0;
            let output: Vec<EncodeFrame> = frames
                .into_iter()
                .map(|frame| {
                    let Some(name) = frame.path.file_name() else {
                        return frame;
                    };
                    let target = processed_dir.join(name);
                    match annotate_file(&annotator, &frame.path, &target, frame.captured_at) {
                        Ok(()) => {
                            annotated += 1;
                            EncodeFrame {
                                path: target,
                                captured_at: frame.captured_at,
                            }
                        }
                        Err(e) => {
                            warn!("Using unannotated frame: {}", e);
                            frame
                        }
                    }
                })
                .collect();
            (output, annotated)
        })
        .await
        .map_err(|e| DoorcamError::component("post_processor", e.to_string()))
    }
}

#[async_trait]
impl JobHandler for PostProcessor {
    async fn process(&self, job: &PostProcessJob) -> Result<PostProcessOutcome> {
        let images_dir = job.event_dir.join(IMAGES_DIR);
        let processed_dir = job.event_dir.join(PROCESSED_DIR);

        let mut frames = self.list_images(&images_dir).await?;
        if frames.is_empty() {
            return Err(PostProcessError::NoImages {
                path: images_dir.display().to_string(),
            }
            .into());
        }
        debug!("Capture {} has {} images", job.event_id, frames.len());

        let mut outcome = PostProcessOutcome::default();

        if self.annotator.is_active() {
            let (annotated_frames, annotated) = self.annotate(frames, processed_dir.clone()).await?;
            frames = annotated_frames;
            outcome.annotated = annotated;
            info!(
                "Annotated {} of {} images for capture {}",
                annotated,
                frames.len(),
                job.event_id
            );
        }

        if !self.config.video_encoding {
            return Ok(outcome);
        }

        let video_path = job.event_dir.join(format!("{}.mp4", job.event_id));
        self.encoder
            .encode(&frames, &video_path, self.camera_fps)
            .await?;
        info!("Video for capture {} written to {}", job.event_id, video_path.display());
        outcome.video = Some(video_path);

        if !self.config.keep_images {
            remove_dir_if_present(&images_dir).await?;
            remove_dir_if_present(&processed_dir).await?;
            outcome.images_removed = true;
            debug!("Removed intermediate images for capture {}", job.event_id);
        }

        Ok(outcome)
    }
}

fn capture_time(file_name: &str) -> Option<DateTime<Utc>> {
    file_name.get(..19).and_then(parse_timestamp)
}

async fn remove_dir_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_time_from_file_names() {
        let plain = capture_time("20240102_030405_678.jpg").unwrap();
        let suffixed = capture_time("20240102_030405_678_41.jpg").unwrap();
        assert_eq!(plain, suffixed);
        assert_eq!(plain.timestamp_subsec_millis(), 678);

        assert!(capture_time("short.jpg").is_none());
        assert!(capture_time("notatimestamp_at_all.jpg").is_none());
    }
}
