use crate::analyzer::motion::{MotionDetector, MotionResult};
use crate::camera::FrameSource;
use crate::config::AnalyzerConfig;
use crate::error::{DoorcamError, Result};
use crate::events::{DoorcamEvent, EventBus};

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Metrics about motion analysis state
#[derive(Debug, Clone, Default, Serialize)]
pub struct MotionAnalysisMetrics {
    pub background_initialized: bool,
    /// Frames handed to the detector, seeding frames included
    pub frames_analyzed: u64,
    pub activations: u64,
    pub failures: u64,
    pub last_area: Option<f64>,
}

/// Paced analysis loop between the frame source and the event bus.
///
/// Every tick it looks at the current frame only. A slow analysis makes the
/// loop skip ticks instead of queueing frames.
pub struct MotionAnalyzerOrchestrator {
    config: AnalyzerConfig,
    detector: Arc<Mutex<MotionDetector>>,
    frame_source: Arc<FrameSource>,
    event_bus: EventBus,
    metrics: Arc<Mutex<MotionAnalysisMetrics>>,
    cancel: CancellationToken,
    analysis_task: Option<JoinHandle<()>>,
}

impl MotionAnalyzerOrchestrator {
    pub fn new(config: AnalyzerConfig, frame_source: Arc<FrameSource>, event_bus: EventBus) -> Self {
        info!("Creating motion analyzer orchestrator");

        Self {
            detector: Arc::new(Mutex::new(MotionDetector::new(config.clone()))),
            config,
            frame_source,
            event_bus,
            metrics: Arc::new(Mutex::new(MotionAnalysisMetrics::default())),
            cancel: CancellationToken::new(),
            analysis_task: None,
        }
    }

    /// Start the analysis loop
    pub fn start(&mut self) -> Result<()> {
        if self.analysis_task.is_some() {
            warn!("Motion analyzer orchestrator is already running");
            return Ok(());
        }

        info!(
            "Starting motion analysis at up to {} fps",
            self.config.max_fps
        );

        self.cancel = CancellationToken::new();
        let analysis = AnalysisLoop {
            period: self.config.analysis_interval(),
            detector: Arc::clone(&self.detector),
            frame_source: Arc::clone(&self.frame_source),
            event_bus: self.event_bus.clone(),
            metrics: Arc::clone(&self.metrics),
            cancel: self.cancel.clone(),
        };

        self.analysis_task = Some(tokio::spawn(analysis.run()));
        Ok(())
    }

    /// Stop the analysis loop and wait for it to exit
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.analysis_task.take() else {
            warn!("Motion analyzer orchestrator is not running");
            return Ok(());
        };

        info!("Stopping motion analyzer orchestrator");
        self.cancel.cancel();
        if let Err(e) = task.await {
            error!("Error stopping motion analysis task: {}", e);
        }
        info!("Motion analyzer orchestrator stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.analysis_task.is_some()
    }

    pub fn metrics(&self) -> MotionAnalysisMetrics {
        let mut metrics = self.metrics.lock().clone();
        metrics.background_initialized = self.detector.lock().background_initialized();
        metrics
    }
}

struct AnalysisLoop {
    period: std::time::Duration,
    detector: Arc<Mutex<MotionDetector>>,
    frame_source: Arc<FrameSource>,
    event_bus: EventBus,
    metrics: Arc<Mutex<MotionAnalysisMetrics>>,
    cancel: CancellationToken,
}

impl AnalysisLoop {
    async fn run(self) {
        info!("Motion analysis task started");

        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_seq: Option<u64> = None;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(frame) = self.frame_source.current_frame() else {
                continue;
            };
            if last_seq == Some(frame.seq) {
                continue;
            }
            last_seq = Some(frame.seq);

            let detector = Arc::clone(&self.detector);
            let analysed = frame.clone();
            let outcome =
                tokio::task::spawn_blocking(move || detector.lock().analyze(&analysed)).await;

            match outcome {
                Ok(Ok(result)) => self.record(frame.seq, frame.timestamp, result),
                Ok(Err(e)) => {
                    self.metrics.lock().failures += 1;
                    warn!("Skipping frame {}: {}", frame.seq, e);
                }
                Err(e) => {
                    self.metrics.lock().failures += 1;
                    error!("Motion analysis task failed: {}", e);
                    self.event_bus.publish(DoorcamEvent::SystemError {
                        component: "motion_analyzer".to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!("Motion analysis task ended");
    }

    fn record(&self, seq: u64, timestamp: std::time::SystemTime, result: Option<MotionResult>) {
        let mut metrics = self.metrics.lock();
        metrics.frames_analyzed += 1;

        let Some(result) = result else {
            return;
        };
        metrics.last_area = Some(result.max_area);

        if result.activity {
            metrics.activations += 1;
            drop(metrics);
            info!(
                "Motion detected in frame {}: area = {:.0} pixels",
                seq, result.max_area
            );
            self.event_bus.publish(DoorcamEvent::MotionDetected {
                contour_area: result.max_area,
                timestamp,
            });
        } else {
            debug!("No motion in frame {} (largest area {:.0})", seq, result.max_area);
        }
    }
}

/// Builder for MotionAnalyzerOrchestrator
pub struct MotionAnalyzerOrchestratorBuilder {
    config: Option<AnalyzerConfig>,
    frame_source: Option<Arc<FrameSource>>,
    event_bus: Option<EventBus>,
}

impl MotionAnalyzerOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            frame_source: None,
            event_bus: None,
        }
    }

    pub fn config(mut self, config: AnalyzerConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn frame_source(mut self, frame_source: Arc<FrameSource>) -> Self {
        self.frame_source = Some(frame_source);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<MotionAnalyzerOrchestrator> {
        let config = self.config.ok_or_else(|| {
            DoorcamError::component("motion_analyzer_orchestrator_builder", "Config is required")
        })?;

        let frame_source = self.frame_source.ok_or_else(|| {
            DoorcamError::component(
                "motion_analyzer_orchestrator_builder",
                "Frame source is required",
            )
        })?;

        let event_bus = self.event_bus.ok_or_else(|| {
            DoorcamError::component(
                "motion_analyzer_orchestrator_builder",
                "Event bus is required",
            )
        })?;

        Ok(MotionAnalyzerOrchestrator::new(config, frame_source, event_bus))
    }
}

impl Default for MotionAnalyzerOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
