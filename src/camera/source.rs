use super::device::{CameraDevice, RawFrame};
use crate::error::{DoorcamError, Result};
use crate::events::{DoorcamEvent, EventBus};
use crate::frame::Frame;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(5);
/// Consecutive failures before the outage is reported and the device reopened
const FAILURE_REPORT_THRESHOLD: u32 = 5;

/// Single camera producer fanned out to any number of subscribers.
///
/// The latest frame is published through a watch channel, so readers always
/// see a complete frame. Each subscriber owns a bounded queue; a subscriber
/// that falls behind loses frames, the producer never waits for it.
pub struct FrameSource {
    shared: Arc<SourceShared>,
    worker: Mutex<Option<std::thread::JoinHandle<()>>>,
}

struct SourceShared {
    current: watch::Sender<Option<Frame>>,
    subscribers: RwLock<Arc<Vec<SubscriberSlot>>>,
    next_subscriber_id: AtomicU64,
    next_seq: AtomicU64,
    running: AtomicBool,
    connected: AtomicBool,
    subscriber_capacity: usize,
    min_frame_gap: Duration,
    event_bus: Option<EventBus>,
    counters: SourceCounters,
}

#[derive(Clone)]
struct SubscriberSlot {
    id: u64,
    name: String,
    sender: mpsc::Sender<Frame>,
}

#[derive(Default)]
struct SourceCounters {
    frames_produced: AtomicU64,
    frames_dropped: AtomicU64,
    frames_rate_limited: AtomicU64,
    read_errors: AtomicU64,
}

/// Snapshot of FrameSource counters
#[derive(Debug, Clone, Serialize)]
pub struct FrameSourceStats {
    pub frames_produced: u64,
    pub frames_dropped: u64,
    pub frames_rate_limited: u64,
    pub read_errors: u64,
    pub subscribers: usize,
    pub last_seq: Option<u64>,
    pub connected: bool,
    pub running: bool,
}

/// A registration with FrameSource. Dropping it unsubscribes.
pub struct FrameSubscription {
    id: u64,
    receiver: mpsc::Receiver<Frame>,
    source: Weak<SourceShared>,
}

impl FrameSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next frame; `None` once the source is gone
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        if let Some(shared) = self.source.upgrade() {
            shared.remove_subscriber(self.id);
        }
    }
}

impl FrameSource {
    /// `max_fps` bounds how fast frames are published; devices that run faster
    /// have the excess dropped.
    pub fn new(max_fps: u32, subscriber_capacity: usize, event_bus: Option<EventBus>) -> Self {
        let (current, _) = watch::channel(None);
        let frame_interval = Duration::from_secs_f64(1.0 / max_fps.max(1) as f64);

        Self {
            shared: Arc::new(SourceShared {
                current,
                subscribers: RwLock::new(Arc::new(Vec::new())),
                next_subscriber_id: AtomicU64::new(1),
                next_seq: AtomicU64::new(0),
                running: AtomicBool::new(false),
                connected: AtomicBool::new(false),
                subscriber_capacity: subscriber_capacity.max(1),
                min_frame_gap: frame_interval / 2,
                event_bus,
                counters: SourceCounters::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Open the device and start producing frames on a dedicated worker thread
    pub fn start(&self, device: Box<dyn CameraDevice>) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            warn!("Frame source is already running");
            return Ok(());
        }

        info!("Starting frame source on {}", device.describe());
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let handle = std::thread::Builder::new()
            .name("frame-source".to_string())
            .spawn(move || run_capture_loop(shared, device))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                DoorcamError::component("frame_source", format!("Failed to spawn worker: {}", e))
            })?;

        *worker = Some(handle);
        Ok(())
    }

    /// Most recent frame, or `None` before the first capture
    pub fn current_frame(&self) -> Option<Frame> {
        self.shared.current.borrow().clone()
    }

    /// Watch the current-frame pointer; `changed()` resolves on each new frame
    pub fn watch(&self) -> watch::Receiver<Option<Frame>> {
        self.shared.current.subscribe()
    }

    /// Register a consumer. Only frames captured after this call are delivered.
    pub fn subscribe(&self, name: &str) -> FrameSubscription {
        let id = self
            .shared
            .next_subscriber_id
            .fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.shared.subscriber_capacity);

        {
            let mut registry = self.shared.subscribers.write();
            let mut next = Vec::with_capacity(registry.len() + 1);
            next.extend(registry.iter().cloned());
            next.push(SubscriberSlot {
                id,
                name: name.to_string(),
                sender,
            });
            *registry = Arc::new(next);
        }

        debug!("Subscriber '{}' registered with id {}", name, id);
        FrameSubscription {
            id,
            receiver,
            source: Arc::downgrade(&self.shared),
        }
    }

    /// Deregister a consumer; returns false if it was not registered
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.shared.remove_subscriber(id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }

    /// Stamp and publish one frame: snapshot the registry, swap the current
    /// pointer, then fan out to the snapshot.
    ///
    /// The capture worker calls this for every accepted device read; it is
    /// public so other producers can drive the bus.
    pub fn publish(&self, data: Vec<u8>, width: u32, height: u32) -> Frame {
        self.shared.publish(data, width, height)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> FrameSourceStats {
        let counters = &self.shared.counters;
        FrameSourceStats {
            frames_produced: counters.frames_produced.load(Ordering::Relaxed),
            frames_dropped: counters.frames_dropped.load(Ordering::Relaxed),
            frames_rate_limited: counters.frames_rate_limited.load(Ordering::Relaxed),
            read_errors: counters.read_errors.load(Ordering::Relaxed),
            subscribers: self.subscriber_count(),
            last_seq: self.shared.current.borrow().as_ref().map(|f| f.seq),
            connected: self.shared.connected.load(Ordering::Relaxed),
            running: self.is_running(),
        }
    }

    /// Stop the worker and release the device
    pub async fn close(&self) -> Result<()> {
        self.shared.running.store(false, Ordering::SeqCst);

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            info!("Stopping frame source");
            tokio::task::spawn_blocking(move || handle.join())
                .await
                .map_err(|e| DoorcamError::component("frame_source", e.to_string()))?
                .map_err(|_| DoorcamError::component("frame_source", "capture worker panicked"))?;
        }
        Ok(())
    }
}

impl SourceShared {
    fn publish(&self, data: Vec<u8>, width: u32, height: u32) -> Frame {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let frame = Frame::new(seq, data, width, height);

        // Taken before the swap so a consumer that can already see this frame
        // as current never receives it
        let subscribers = Arc::clone(&*self.subscribers.read());
        self.current.send_replace(Some(frame.clone()));
        self.counters.frames_produced.fetch_add(1, Ordering::Relaxed);
        self.deliver(&frame, &subscribers);

        trace!("Published frame {} ({} bytes)", seq, frame.len());
        frame
    }

    /// Registry changes swap in a new Vec, so `subscribers` stays stable
    fn deliver(&self, frame: &Frame, subscribers: &[SubscriberSlot]) {
        let mut closed = Vec::new();

        for slot in subscribers {
            match slot.sender.try_send(frame.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    trace!("Subscriber '{}' is behind; dropped frame {}", slot.name, frame.seq);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(slot.id),
            }
        }

        for id in closed {
            self.remove_subscriber(id);
        }
    }

    fn remove_subscriber(&self, id: u64) -> bool {
        let mut registry = self.subscribers.write();
        if !registry.iter().any(|slot| slot.id == id) {
            return false;
        }
        let next: Vec<SubscriberSlot> = registry.iter().filter(|s| s.id != id).cloned().collect();
        *registry = Arc::new(next);
        debug!("Subscriber {} removed", id);
        true
    }

    fn report_outage(&self, error: &DoorcamError) {
        self.connected.store(false, Ordering::Relaxed);
        if let Some(bus) = &self.event_bus {
            bus.publish(DoorcamEvent::CameraStatusChanged {
                connected: false,
                timestamp: SystemTime::now(),
            });
            bus.publish(DoorcamEvent::SystemError {
                component: "camera".to_string(),
                error: error.to_string(),
            });
        }
    }

    fn report_connected(&self) {
        let was_connected = self.connected.swap(true, Ordering::Relaxed);
        if !was_connected {
            if let Some(bus) = &self.event_bus {
                bus.publish(DoorcamEvent::CameraStatusChanged {
                    connected: true,
                    timestamp: SystemTime::now(),
                });
            }
        }
    }
}

fn run_capture_loop(shared: Arc<SourceShared>, mut device: Box<dyn CameraDevice>) {
    let mut device_open = false;
    let mut consecutive_failures: u32 = 0;
    let mut backoff = INITIAL_BACKOFF;
    let mut outage_reported = false;
    let mut last_publish: Option<Instant> = None;

    info!("Capture worker started for {}", device.describe());

    while shared.running.load(Ordering::SeqCst) {
        let step = if device_open {
            device.read_frame()
        } else {
            device.open().and_then(|_| {
                device_open = true;
                info!("Camera device {} opened", device.describe());
                device.read_frame()
            })
        };

        match step {
            Ok(RawFrame {
                data,
                width,
                height,
            }) => {
                if consecutive_failures > 0 {
                    info!(
                        "Camera recovered after {} failed reads",
                        consecutive_failures
                    );
                }
                consecutive_failures = 0;
                backoff = INITIAL_BACKOFF;
                outage_reported = false;
                shared.report_connected();

                let now = Instant::now();
                if let Some(last) = last_publish {
                    if now.duration_since(last) < shared.min_frame_gap {
                        shared
                            .counters
                            .frames_rate_limited
                            .fetch_add(1, Ordering::Relaxed);
                        continue;
                    }
                }
                last_publish = Some(now);
                shared.publish(data, width, height);
            }
            Err(e) => {
                consecutive_failures += 1;
                shared.counters.read_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Camera read failed ({} in a row), retrying in {:?}: {}",
                    consecutive_failures, backoff, e
                );

                if consecutive_failures >= FAILURE_REPORT_THRESHOLD {
                    if !outage_reported {
                        error!(
                            "Camera unavailable after {} attempts; continuing to retry",
                            consecutive_failures
                        );
                        shared.report_outage(&e);
                        outage_reported = true;
                    }
                    if device_open {
                        device.close();
                        device_open = false;
                    }
                }

                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    if device_open {
        device.close();
    }
    info!("Capture worker stopped");
}
