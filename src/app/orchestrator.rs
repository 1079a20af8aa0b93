use super::keyboard::KeyboardInputHandler;
use super::types::ComponentState;
use crate::analyzer::MotionAnalyzerOrchestrator;
use crate::camera::{create_device, CameraDevice, FrameSource, FrameSourceBuilder};
use crate::capture::EventRecorder;
use crate::config::DoorcamConfig;
use crate::display::DisplayController;
use crate::error::Result;
use crate::events::EventBus;
use crate::postprocess::PostProcessor;
use crate::storage::{RetentionPolicy, RetentionWorker};
#[cfg(feature = "streaming")]
use crate::streaming::StreamServer;
#[cfg(all(feature = "touch", target_os = "linux"))]
use crate::touch::TouchInputHandler;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

/// Main application coordinator that manages all system components
pub struct DoorcamOrchestrator {
    pub(super) config: DoorcamConfig,
    pub(super) event_bus: EventBus,
    pub(super) frame_source: Arc<FrameSource>,
    /// Handed to the frame source on start
    pub(super) device: Option<Box<dyn CameraDevice>>,

    // Components
    pub(super) analyzer: Option<MotionAnalyzerOrchestrator>,
    pub(super) post_processor: Option<Arc<PostProcessor>>,
    pub(super) post_worker: Option<JoinHandle<()>>,
    pub(super) recorder: Option<EventRecorder>,
    pub(super) retention: Option<RetentionWorker>,
    #[cfg(feature = "streaming")]
    pub(super) stream_server: Option<Arc<StreamServer>>,
    #[cfg(feature = "streaming")]
    pub(super) stream_task: Option<JoinHandle<Result<()>>>,
    pub(super) display: Option<DisplayController>,
    #[cfg(all(feature = "touch", target_os = "linux"))]
    pub(super) touch: Option<TouchInputHandler>,
    pub(super) keyboard: Option<KeyboardInputHandler>,

    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) stop_timeout: Duration,
}

impl DoorcamOrchestrator {
    /// Wire the components enabled in `config` around the configured camera
    pub fn new(config: DoorcamConfig) -> Result<Self> {
        let device = create_device(&config.camera)?;
        Self::with_device(config, device)
    }

    pub fn with_device(config: DoorcamConfig, device: Box<dyn CameraDevice>) -> Result<Self> {
        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let frame_source = Arc::new(
            FrameSourceBuilder::new()
                .config(config.camera.clone())
                .event_bus(event_bus.clone())
                .subscriber_capacity(config.system.subscriber_capacity)
                .build()?,
        );

        let analyzer = Some(MotionAnalyzerOrchestrator::new(
            config.analyzer.clone(),
            Arc::clone(&frame_source),
            event_bus.clone(),
        ));

        let post_processor = config
            .capture
            .enabled
            .then(|| Arc::new(PostProcessor::new(config.capture.clone(), config.camera.max_fps)));

        let retention = (config.capture.enabled && config.system.trim_old).then(|| {
            let policy = RetentionPolicy::new(config.system.retention_horizon());
            RetentionWorker::new(
                policy,
                &config.capture.path,
                Duration::from_secs(config.system.trim_interval_seconds),
            )
        });

        #[cfg(feature = "streaming")]
        let stream_server = config
            .stream
            .enabled
            .then(|| Arc::new(StreamServer::new(config.stream.clone(), Arc::clone(&frame_source))));

        let display = config.display.enabled.then(|| {
            DisplayController::new(
                config.display.clone(),
                Arc::clone(&frame_source),
                event_bus.clone(),
            )
        });

        #[cfg(all(feature = "touch", target_os = "linux"))]
        let touch = config
            .display
            .enabled
            .then(|| TouchInputHandler::new(&config.display, event_bus.clone()));

        let capture_enabled = post_processor.is_some();
        let retention_enabled = retention.is_some();
        let display_enabled = display.is_some();
        info!(
            "Components: capture={} retention={} display={}",
            capture_enabled, retention_enabled, display_enabled
        );

        Ok(Self {
            config,
            event_bus,
            frame_source,
            device: Some(device),
            analyzer,
            post_processor,
            post_worker: None,
            recorder: None,
            retention,
            #[cfg(feature = "streaming")]
            stream_server,
            #[cfg(feature = "streaming")]
            stream_task: None,
            display,
            #[cfg(all(feature = "touch", target_os = "linux"))]
            touch,
            keyboard: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            stop_timeout: Duration::from_secs(10),
        })
    }

    /// Enable the terminal trigger (SPACE records, `q` quits)
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard = enabled.then(|| KeyboardInputHandler::new(self.event_bus.clone()));
    }

    /// Upper bound for each component's stop during shutdown
    pub fn set_stop_timeout(&mut self, timeout: Duration) {
        self.stop_timeout = timeout;
    }

    pub fn config(&self) -> &DoorcamConfig {
        &self.config
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn frame_source(&self) -> Arc<FrameSource> {
        Arc::clone(&self.frame_source)
    }

    #[cfg(feature = "streaming")]
    pub fn stream_server(&self) -> Option<Arc<StreamServer>> {
        self.stream_server.clone()
    }
}
