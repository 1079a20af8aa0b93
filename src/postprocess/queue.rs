use crate::error::{PostProcessError, Result};
use crate::events::{DoorcamEvent, EventBus};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// A sealed capture event waiting for post-processing
#[derive(Debug, Clone)]
pub struct PostProcessJob {
    pub event_id: String,
    pub event_dir: PathBuf,
    pub frame_count: usize,
}

/// What a finished job produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PostProcessOutcome {
    pub annotated: usize,
    pub video: Option<PathBuf>,
    pub images_removed: bool,
}

/// Work done for each dequeued event
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn process(&self, job: &PostProcessJob) -> Result<PostProcessOutcome>;
}

#[derive(Default)]
struct QueueCounters {
    pending: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// FIFO hand-off from the recorder to a single post-processing worker.
///
/// Enqueueing never waits. Jobs run one at a time in enqueue order, and a
/// failed job does not stop the jobs behind it.
#[derive(Clone)]
pub struct PostProcessQueue {
    sender: mpsc::UnboundedSender<PostProcessJob>,
    counters: Arc<QueueCounters>,
}

impl PostProcessQueue {
    /// Spawn the worker. It exits once every queue handle is dropped and the
    /// remaining jobs are done.
    pub fn start<H: JobHandler>(handler: Arc<H>, event_bus: Option<EventBus>) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let counters = Arc::new(QueueCounters::default());

        let worker = tokio::spawn(post_process_worker(
            receiver,
            handler,
            event_bus,
            Arc::clone(&counters),
        ));

        (Self { sender, counters }, worker)
    }

    pub fn enqueue(&self, job: PostProcessJob) -> Result<()> {
        let event_id = job.event_id.clone();
        self.counters.pending.fetch_add(1, Ordering::SeqCst);

        if self.sender.send(job).is_err() {
            self.counters.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(PostProcessError::QueueClosed.into());
        }

        info!(
            "Queued post-processing for {} ({} pending)",
            event_id,
            self.pending()
        );
        Ok(())
    }

    /// Jobs queued or in progress
    pub fn pending(&self) -> usize {
        self.counters.pending.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.counters.completed.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.counters.failed.load(Ordering::SeqCst)
    }
}

async fn post_process_worker<H: JobHandler>(
    mut receiver: mpsc::UnboundedReceiver<PostProcessJob>,
    handler: Arc<H>,
    event_bus: Option<EventBus>,
    counters: Arc<QueueCounters>,
) {
    info!("Post-processing worker started");

    while let Some(job) = receiver.recv().await {
        info!(
            "Post-processing capture {} ({} frames)",
            job.event_id, job.frame_count
        );

        match handler.process(&job).await {
            Ok(outcome) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
                info!("Post-processing completed for capture {}", job.event_id);
                if let Some(bus) = &event_bus {
                    bus.publish(DoorcamEvent::PostProcessCompleted {
                        event_id: job.event_id.clone(),
                        video: outcome.video,
                    });
                }
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                error!("Post-processing failed for capture {}: {}", job.event_id, e);
                if let Some(bus) = &event_bus {
                    bus.publish(DoorcamEvent::SystemError {
                        component: "post_processor".to_string(),
                        error: format!("{}: {}", job.event_id, e),
                    });
                }
            }
        }

        counters.pending.fetch_sub(1, Ordering::SeqCst);
    }

    info!("Post-processing worker stopped");
}
