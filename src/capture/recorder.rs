use super::event::CaptureEvent;
use super::metadata::CaptureStats;
use super::preroll::PrerollBuffer;
use super::window::{RecordingWindow, WindowTransition};
use super::writer::{FrameWriter, SealSummary, WriteJob, WriterCounters, WriterSettings};
use crate::camera::{calculate_preroll_capacity, FrameSource, FrameSubscription};
use crate::config::{CaptureConfig, EventConfig};
use crate::error::{CaptureError, DoorcamError, EventBusError, Result};
use crate::events::{DoorcamEvent, EventBus, EventFilter, EventReceiver};
use crate::frame::Frame;
use crate::postprocess::PostProcessQueue;

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Motion-triggered recorder.
///
/// Idle, it keeps the preroll buffer warm. A trigger opens a capture event,
/// queues the preroll frames and then every live frame for writing. Further
/// triggers push the postroll deadline out; once it passes the event is
/// sealed and handed to post-processing.
pub struct EventRecorder {
    config: CaptureConfig,
    event_config: EventConfig,
    camera_fps: u32,
    frame_source: Arc<FrameSource>,
    event_bus: EventBus,
    queue: Option<PostProcessQueue>,
    stats: Arc<Mutex<CaptureStats>>,
    counters: Arc<WriterCounters>,
    cancel: CancellationToken,
    tasks: Option<(JoinHandle<()>, JoinHandle<()>)>,
}

impl EventRecorder {
    pub fn new(
        config: CaptureConfig,
        event_config: EventConfig,
        camera_fps: u32,
        frame_source: Arc<FrameSource>,
        event_bus: EventBus,
        queue: Option<PostProcessQueue>,
    ) -> Self {
        Self {
            config,
            event_config,
            camera_fps,
            frame_source,
            event_bus,
            queue,
            stats: Arc::new(Mutex::new(CaptureStats::default())),
            counters: Arc::new(WriterCounters::default()),
            cancel: CancellationToken::new(),
            tasks: None,
        }
    }

    /// Create the capture root and start the recorder and writer tasks
    pub async fn start(&mut self) -> Result<()> {
        if self.tasks.is_some() {
            warn!("Event recorder is already running");
            return Ok(());
        }

        let root = PathBuf::from(&self.config.path);
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| CaptureError::DirectoryCreation {
                path: root.display().to_string(),
                source: e,
            })?;

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let writer = FrameWriter::new(
            writer_rx,
            WriterSettings {
                save_metadata: self.config.save_metadata,
                camera_fps: self.camera_fps,
                preroll_seconds: self.event_config.preroll_seconds,
                postroll_seconds: self.event_config.postroll_seconds,
            },
            self.event_bus.clone(),
            self.queue.clone(),
            Arc::clone(&self.counters),
        );

        let preroll = PrerollBuffer::new(
            self.event_config.preroll(),
            calculate_preroll_capacity(self.camera_fps, self.event_config.preroll_seconds),
        );

        self.cancel = CancellationToken::new();
        let recorder = RecorderLoop {
            root,
            preroll,
            window: RecordingWindow::new(self.event_config.postroll()),
            active: None,
            writer: writer_tx,
            event_bus: self.event_bus.clone(),
            stats: Arc::clone(&self.stats),
        };

        let frames = self.frame_source.subscribe("event_recorder");
        let triggers = self
            .event_bus
            .subscribe_filtered(EventFilter::Triggers, "event_recorder");

        info!(
            "Starting event recorder in {} (preroll {}s, postroll {}s)",
            self.config.path, self.event_config.preroll_seconds, self.event_config.postroll_seconds
        );

        let writer_task = tokio::spawn(writer.run());
        let recorder_task = tokio::spawn(recorder.run(frames, triggers, self.cancel.clone()));
        self.tasks = Some((recorder_task, writer_task));
        Ok(())
    }

    /// Seal any open event, then wait for the writer to flush it
    pub async fn stop(&mut self) -> Result<()> {
        let Some((recorder_task, writer_task)) = self.tasks.take() else {
            return Ok(());
        };

        info!("Stopping event recorder");
        self.cancel.cancel();
        recorder_task
            .await
            .map_err(|e| DoorcamError::component("event_recorder", e.to_string()))?;
        writer_task
            .await
            .map_err(|e| DoorcamError::component("frame_writer", e.to_string()))?;
        info!("Event recorder stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.tasks.is_some()
    }

    pub fn stats(&self) -> CaptureStats {
        let mut stats = self.stats.lock().clone();
        stats.frames_written = self.counters.frames_written.load(Ordering::Relaxed);
        stats.write_errors = self.counters.write_errors.load(Ordering::Relaxed);
        stats
    }
}

struct ActiveEvent {
    event: Arc<CaptureEvent>,
    /// Highest sequence number queued for writing
    last_seq: Option<u64>,
    preroll_frames: usize,
    trigger_count: u32,
    /// Directory creation failed; frames are not written
    abandoned: bool,
}

struct RecorderLoop {
    root: PathBuf,
    preroll: PrerollBuffer,
    window: RecordingWindow,
    active: Option<ActiveEvent>,
    writer: mpsc::UnboundedSender<WriteJob>,
    event_bus: EventBus,
    stats: Arc<Mutex<CaptureStats>>,
}

impl RecorderLoop {
    async fn run(
        mut self,
        mut frames: FrameSubscription,
        mut triggers: EventReceiver,
        cancel: CancellationToken,
    ) {
        debug!("Event recorder loop started");

        loop {
            let deadline = self.window.deadline();

            tokio::select! {
                _ = cancel.cancelled() => {
                    if self.active.is_some() {
                        info!("Sealing open capture on shutdown");
                        self.window = RecordingWindow::new(self.window.postroll());
                        self.seal();
                    }
                    break;
                }
                frame = frames.recv() => match frame {
                    Some(frame) => self.on_frame(frame),
                    None => {
                        warn!("Frame source closed; event recorder stopping");
                        self.seal();
                        break;
                    }
                },
                event = triggers.recv() => match event {
                    Ok(event) => self.on_trigger(&event).await,
                    Err(EventBusError::Lagged { skipped }) => {
                        warn!("Event recorder missed {} events", skipped);
                    }
                    Err(e) => {
                        warn!("Event bus unavailable for recorder: {}", e);
                        self.seal();
                        break;
                    }
                },
                _ = sleep_until_deadline(deadline) => self.expire_if_due(Instant::now()),
            }
        }

        debug!("Event recorder loop stopped");
    }

    fn on_frame(&mut self, frame: Frame) {
        self.expire_if_due(Instant::now());

        let target = match self.active.as_mut() {
            Some(active)
                if !active.abandoned && active.last_seq.map_or(true, |seq| frame.seq > seq) =>
            {
                active.last_seq = Some(frame.seq);
                Some(Arc::clone(&active.event))
            }
            _ => None,
        };
        if let Some(event) = target {
            self.queue_frame_for(&event, &frame);
        }

        self.preroll.push(frame);
    }

    async fn on_trigger(&mut self, trigger: &DoorcamEvent) {
        let now = Instant::now();
        self.expire_if_due(now);

        match self.window.trigger(now) {
            WindowTransition::Started { .. } => self.open_event(trigger, now).await,
            WindowTransition::Extended { deadline } => {
                if let Some(active) = self.active.as_mut() {
                    active.trigger_count += 1;
                    debug!(
                        "Capture {} extended by {} ({:?} remaining)",
                        active.event.id,
                        trigger.event_type(),
                        deadline.saturating_duration_since(now)
                    );
                }
            }
            WindowTransition::Expired { .. } => {}
        }
    }

    async fn open_event(&mut self, trigger: &DoorcamEvent, now: Instant) {
        let event = Arc::new(CaptureEvent::new(
            &self.root,
            trigger.timestamp(),
            trigger.event_type(),
        ));

        {
            let mut stats = self.stats.lock();
            stats.events_started += 1;
            stats.recording = true;
            stats.current_event = Some(event.id.clone());
        }

        if let Err(e) = event.create_directories().await {
            error!("Capture {} cannot be recorded: {}", event.id, e);
            self.event_bus.publish(DoorcamEvent::SystemError {
                component: "event_recorder".to_string(),
                error: e.to_string(),
            });
            self.active = Some(ActiveEvent {
                event,
                last_seq: None,
                preroll_frames: 0,
                trigger_count: 1,
                abandoned: true,
            });
            return;
        }

        let snapshot = self.preroll.snapshot_at(now);
        let preroll_frames = snapshot.len();
        let last_seq = snapshot.last().map(|f| f.seq);
        for frame in &snapshot {
            self.queue_frame_for(&event, frame);
        }

        info!(
            "Capture {} started by {} with {} preroll frames",
            event.id,
            trigger.event_type(),
            preroll_frames
        );
        self.event_bus.publish(DoorcamEvent::CaptureStarted {
            event_id: event.id.clone(),
            preroll_frames,
        });

        self.active = Some(ActiveEvent {
            event,
            last_seq,
            preroll_frames,
            trigger_count: 1,
            abandoned: false,
        });
    }

    fn expire_if_due(&mut self, now: Instant) {
        if let Some(WindowTransition::Expired { started_at, deadline }) = self.window.poll(now) {
            debug!(
                "Postroll elapsed after {:?} of recording",
                deadline.saturating_duration_since(started_at)
            );
            self.seal();
        }
    }

    /// Hand the open event to the writer for sealing
    fn seal(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };

        {
            let mut stats = self.stats.lock();
            stats.recording = false;
            stats.current_event = None;
            if active.abandoned {
                stats.events_abandoned += 1;
            } else {
                stats.events_completed += 1;
            }
        }

        if active.abandoned {
            warn!("Capture {} abandoned; nothing to seal", active.event.id);
            return;
        }

        info!("Postroll complete for capture {}", active.event.id);
        let job = WriteJob::Seal {
            event: active.event,
            summary: SealSummary {
                preroll_frames: active.preroll_frames,
                trigger_count: active.trigger_count,
            },
        };
        if self.writer.send(job).is_err() {
            error!("Frame writer is gone; capture cannot be sealed");
        }
    }

    fn queue_frame_for(&self, event: &Arc<CaptureEvent>, frame: &Frame) {
        let job = WriteJob::Frame {
            event: Arc::clone(event),
            frame: frame.clone(),
        };
        if self.writer.send(job).is_err() {
            error!("Frame writer is gone; dropping frame {}", frame.seq);
        }
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
