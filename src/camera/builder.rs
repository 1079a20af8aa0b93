use super::source::FrameSource;
use crate::config::CameraConfig;
use crate::error::{DoorcamError, Result};
use crate::events::EventBus;

/// Builder for the frame source
pub struct FrameSourceBuilder {
    config: Option<CameraConfig>,
    event_bus: Option<EventBus>,
    subscriber_capacity: usize,
}

impl FrameSourceBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            event_bus: None,
            subscriber_capacity: 64,
        }
    }

    pub fn config(mut self, config: CameraConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Bus used to report camera outages and recoveries
    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn subscriber_capacity(mut self, capacity: usize) -> Self {
        self.subscriber_capacity = capacity;
        self
    }

    pub fn build(self) -> Result<FrameSource> {
        let config = self
            .config
            .ok_or_else(|| DoorcamError::component("frame_source_builder", "Camera configuration is required"))?;

        Ok(FrameSource::new(
            config.max_fps,
            self.subscriber_capacity,
            self.event_bus,
        ))
    }
}

impl Default for FrameSourceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Upper bound on frames held for preroll, with headroom for bursty delivery
pub fn calculate_preroll_capacity(camera_fps: u32, preroll_seconds: u32) -> usize {
    (camera_fps as u64 * preroll_seconds as u64 * 2).max(1) as usize
}
