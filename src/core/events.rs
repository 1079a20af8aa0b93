use crate::error::EventBusError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur in the doorcam pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DoorcamEvent {
    /// Motion was detected in the camera feed
    MotionDetected {
        contour_area: f64,
        timestamp: SystemTime,
    },
    /// Touch input was detected on the display
    TouchDetected { timestamp: SystemTime },
    /// A trigger from a non-sensor source, such as the keyboard
    ManualTrigger {
        source: String,
        timestamp: SystemTime,
    },
    /// Recording has started for a capture event
    CaptureStarted {
        event_id: String,
        preroll_frames: usize,
    },
    /// A capture event was sealed and handed to post-processing
    CaptureCompleted { event_id: String, file_count: usize },
    /// Post-processing of a capture event finished
    PostProcessCompleted {
        event_id: String,
        video: Option<PathBuf>,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// Camera connection status changed
    CameraStatusChanged {
        connected: bool,
        timestamp: SystemTime,
    },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl DoorcamEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            DoorcamEvent::MotionDetected { timestamp, .. } => *timestamp,
            DoorcamEvent::TouchDetected { timestamp } => *timestamp,
            DoorcamEvent::ManualTrigger { timestamp, .. } => *timestamp,
            DoorcamEvent::CameraStatusChanged { timestamp, .. } => *timestamp,
            DoorcamEvent::ShutdownRequested { timestamp, .. } => *timestamp,
            _ => SystemTime::now(),
        }
    }

    /// Events that open or extend a recording and wake the display
    pub fn is_trigger(&self) -> bool {
        matches!(
            self,
            DoorcamEvent::MotionDetected { .. }
                | DoorcamEvent::TouchDetected { .. }
                | DoorcamEvent::ManualTrigger { .. }
        )
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            DoorcamEvent::MotionDetected { contour_area, .. } => {
                format!("Motion detected with area: {:.2}", contour_area)
            }
            DoorcamEvent::TouchDetected { .. } => "Touch detected".to_string(),
            DoorcamEvent::ManualTrigger { source, .. } => {
                format!("Manual trigger from {}", source)
            }
            DoorcamEvent::CaptureStarted {
                event_id,
                preroll_frames,
            } => format!(
                "Capture started: {} ({} preroll frames)",
                event_id, preroll_frames
            ),
            DoorcamEvent::CaptureCompleted {
                event_id,
                file_count,
            } => format!("Capture completed: {} ({} files)", event_id, file_count),
            DoorcamEvent::PostProcessCompleted { event_id, video } => match video {
                Some(path) => format!("Post-processed {} -> {}", event_id, path.display()),
                None => format!("Post-processed {}", event_id),
            },
            DoorcamEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            DoorcamEvent::CameraStatusChanged { connected, .. } => format!(
                "Camera {}",
                if *connected {
                    "connected"
                } else {
                    "disconnected"
                }
            ),
            DoorcamEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            DoorcamEvent::MotionDetected { .. } => "motion_detected",
            DoorcamEvent::TouchDetected { .. } => "touch_detected",
            DoorcamEvent::ManualTrigger { .. } => "manual_trigger",
            DoorcamEvent::CaptureStarted { .. } => "capture_started",
            DoorcamEvent::CaptureCompleted { .. } => "capture_completed",
            DoorcamEvent::PostProcessCompleted { .. } => "postprocess_completed",
            DoorcamEvent::SystemError { .. } => "system_error",
            DoorcamEvent::CameraStatusChanged { .. } => "camera_status_changed",
            DoorcamEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }
}

/// Broadcast bus carrying activity signals and lifecycle notifications
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DoorcamEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DoorcamEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter; the name shows up in lag warnings
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event without blocking. Returns the number of receivers reached;
    /// zero receivers is not an error.
    pub fn publish(&self, event: DoorcamEvent) -> usize {
        match &event {
            DoorcamEvent::MotionDetected { contour_area, .. } => {
                debug!("Motion detected with area: {:.2}", contour_area);
            }
            DoorcamEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            DoorcamEvent::CameraStatusChanged { connected, .. } => {
                if *connected {
                    info!("Camera connected");
                } else {
                    warn!("Camera disconnected");
                }
            }
            DoorcamEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    /// Motion, touch and manual triggers
    Triggers,
    EventTypes(Vec<&'static str>),
    Custom(fn(&DoorcamEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &DoorcamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Triggers => event.is_trigger(),
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<DoorcamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<DoorcamEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next matching event.
    ///
    /// Lag is reported as an error but the receiver stays usable: the next call
    /// resumes from the oldest retained event.
    pub async fn recv(&mut self) -> Result<DoorcamEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<DoorcamEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn motion(area: f64) -> DoorcamEvent {
        DoorcamEvent::MotionDetected {
            contour_area: area,
            timestamp: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(motion(10.0)), 0);
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let bus = EventBus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        assert_eq!(bus.publish(motion(6000.0)), 2);

        assert_eq!(a.recv().await.unwrap().event_type(), "motion_detected");
        assert_eq!(b.recv().await.unwrap().event_type(), "motion_detected");
    }

    #[tokio::test]
    async fn test_trigger_filter() {
        let bus = EventBus::new(16);
        let mut triggers = bus.subscribe_filtered(EventFilter::Triggers, "test");

        bus.publish(DoorcamEvent::CaptureStarted {
            event_id: "x".to_string(),
            preroll_frames: 0,
        });
        bus.publish(DoorcamEvent::TouchDetected {
            timestamp: SystemTime::now(),
        });
        bus.publish(DoorcamEvent::ManualTrigger {
            source: "keyboard".to_string(),
            timestamp: SystemTime::now(),
        });

        assert_eq!(triggers.recv().await.unwrap().event_type(), "touch_detected");
        assert_eq!(triggers.recv().await.unwrap().event_type(), "manual_trigger");
        assert!(triggers.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lagged_receiver_recovers() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe_filtered(EventFilter::All, "slow");

        for i in 0..5 {
            bus.publish(motion(i as f64));
        }

        assert!(matches!(
            rx.recv().await,
            Err(EventBusError::Lagged { skipped: 3 })
        ));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_event_descriptions() {
        assert!(motion(1234.5).description().contains("1234.50"));
        assert!(motion(1.0).is_trigger());
        assert!(!DoorcamEvent::SystemError {
            component: "camera".to_string(),
            error: "x".to_string()
        }
        .is_trigger());
    }
}
