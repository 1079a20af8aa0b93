use super::event::{format_timestamp, CaptureEvent};
use super::metadata::{save_metadata, CaptureMetadata};
use crate::error::{CaptureError, Result};
use crate::events::{DoorcamEvent, EventBus};
use crate::frame::Frame;
use crate::postprocess::{PostProcessJob, PostProcessQueue};

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

pub(crate) enum WriteJob {
    Frame {
        event: Arc<CaptureEvent>,
        frame: Frame,
    },
    /// Runs after every frame queued before it for the same event
    Seal {
        event: Arc<CaptureEvent>,
        summary: SealSummary,
    },
}

pub(crate) struct SealSummary {
    pub preroll_frames: usize,
    pub trigger_count: u32,
}

/// Settings the writer needs when sealing
#[derive(Clone)]
pub(crate) struct WriterSettings {
    pub save_metadata: bool,
    pub camera_fps: u32,
    pub preroll_seconds: u32,
    pub postroll_seconds: u32,
}

#[derive(Default)]
pub(crate) struct WriterCounters {
    pub frames_written: AtomicU64,
    pub write_errors: AtomicU64,
}

#[derive(Default)]
struct EventProgress {
    names: HashSet<String>,
    written: usize,
    errors: usize,
    first: Option<String>,
    last: Option<String>,
}

/// Drains write jobs in order, off the frame delivery path
pub(crate) struct FrameWriter {
    receiver: mpsc::UnboundedReceiver<WriteJob>,
    settings: WriterSettings,
    event_bus: EventBus,
    queue: Option<PostProcessQueue>,
    counters: Arc<WriterCounters>,
    progress: HashMap<String, EventProgress>,
}

impl FrameWriter {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<WriteJob>,
        settings: WriterSettings,
        event_bus: EventBus,
        queue: Option<PostProcessQueue>,
        counters: Arc<WriterCounters>,
    ) -> Self {
        Self {
            receiver,
            settings,
            event_bus,
            queue,
            counters,
            progress: HashMap::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        debug!("Frame writer started");

        while let Some(job) = self.receiver.recv().await {
            match job {
                WriteJob::Frame { event, frame } => self.write_frame(&event, &frame).await,
                WriteJob::Seal { event, summary } => self.seal(&event, summary).await,
            }
        }

        if !self.progress.is_empty() {
            warn!(
                "Frame writer stopped with {} unsealed event(s)",
                self.progress.len()
            );
        }
        debug!("Frame writer stopped");
    }

    async fn write_frame(&mut self, event: &CaptureEvent, frame: &Frame) {
        let progress = self.progress.entry(event.id.clone()).or_default();

        let mut name = format_timestamp(frame.timestamp);
        if progress.names.contains(&name) {
            name = format!("{}_{}", name, frame.seq);
        }

        let path = event.images_dir.join(format!("{}.jpg", name));
        match write_then_rename(&path, &frame.data).await {
            Ok(()) => {
                trace!("Wrote frame {} to {}", frame.seq, path.display());
                progress.written += 1;
                progress.first.get_or_insert_with(|| name.clone());
                progress.last = Some(name.clone());
                progress.names.insert(name);
                self.counters.frames_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                warn!("Skipping frame {} for capture {}: {}", frame.seq, event.id, e);
                progress.errors += 1;
                self.counters.write_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn seal(&mut self, event: &CaptureEvent, summary: SealSummary) {
        let progress = self.progress.remove(&event.id).unwrap_or_default();
        info!(
            "Capture {} sealed: {} frames written ({} preroll, {} errors, {} triggers)",
            event.id, progress.written, summary.preroll_frames, progress.errors, summary.trigger_count
        );

        if self.settings.save_metadata {
            let metadata = CaptureMetadata {
                event_id: event.id.clone(),
                trigger: event.trigger.clone(),
                started_at: DateTime::<Utc>::from(event.started_at),
                sealed_at: DateTime::<Utc>::from(SystemTime::now()),
                trigger_count: summary.trigger_count,
                preroll_frame_count: summary.preroll_frames,
                total_frame_count: progress.written,
                write_errors: progress.errors,
                first_frame: progress.first.clone(),
                last_frame: progress.last.clone(),
                camera_fps: self.settings.camera_fps,
                preroll_seconds: self.settings.preroll_seconds,
                postroll_seconds: self.settings.postroll_seconds,
            };

            if let Err(e) = save_metadata(&metadata, &event.metadata_path()).await {
                warn!("Failed to save metadata for capture {}: {}", event.id, e);
            }
        }

        self.event_bus.publish(DoorcamEvent::CaptureCompleted {
            event_id: event.id.clone(),
            file_count: progress.written,
        });

        if progress.written == 0 {
            warn!("Capture {} has no frames; not queued for post-processing", event.id);
            return;
        }

        if let Some(queue) = &self.queue {
            let job = PostProcessJob {
                event_id: event.id.clone(),
                event_dir: event.dir.clone(),
                frame_count: progress.written,
            };
            if let Err(e) = queue.enqueue(job) {
                error!("Failed to queue post-processing for {}: {}", event.id, e);
            }
        }
    }
}

/// Write to `<path>.part`, then rename into place
async fn write_then_rename(path: &Path, data: &[u8]) -> Result<()> {
    let mut part_name = path.as_os_str().to_owned();
    part_name.push(".part");
    let part = Path::new(&part_name);

    let result = async {
        let mut file = fs::File::create(part).await?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);
        fs::rename(part, path).await
    }
    .await;

    if let Err(e) = result {
        let _ = fs::remove_file(part).await;
        return Err(CaptureError::FrameSave {
            path: path.display().to_string(),
            source: e,
        }
        .into());
    }
    Ok(())
}
