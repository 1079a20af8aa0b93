use super::device::{CameraDevice, RawFrame};
use crate::config::CameraConfig;
use crate::error::{CameraError, Result};
use gstreamer::prelude::*;
use gstreamer::Pipeline;
use gstreamer_app::AppSink;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// V4L2 camera read through a GStreamer MJPEG pipeline
pub struct GstCamera {
    config: CameraConfig,
    pipeline: Option<Pipeline>,
    appsink: Option<AppSink>,
}

impl GstCamera {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            config,
            pipeline: None,
            appsink: None,
        }
    }

    /// Build GStreamer pipeline string for MJPEG capture
    fn build_pipeline_string(&self) -> String {
        let (width, height) = self.config.resolution;
        format!(
            "v4l2src device={} io-mode=mmap do-timestamp=true ! \
             image/jpeg,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=2 leaky=downstream ! \
             appsink name=sink sync=false max-buffers=2 drop=true qos=false enable-last-sample=false emit-signals=false",
            self.config.device, width, height, self.config.max_fps
        )
    }

    fn dimensions_from_sample(&self, sample: &gstreamer::Sample) -> (u32, u32) {
        sample
            .caps()
            .and_then(|caps| caps.structure(0))
            .and_then(|s| {
                let w = s.get::<i32>("width").ok()?;
                let h = s.get::<i32>("height").ok()?;
                Some((w as u32, h as u32))
            })
            .unwrap_or(self.config.resolution)
    }
}

impl CameraDevice for GstCamera {
    fn describe(&self) -> String {
        format!(
            "{} {}x{}@{}",
            self.config.device, self.config.resolution.0, self.config.resolution.1, self.config.max_fps
        )
    }

    fn open(&mut self) -> Result<()> {
        gstreamer::init().map_err(|e| CameraError::Configuration {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        let pipeline_desc = self.build_pipeline_string();
        info!("Creating GStreamer pipeline: {}", pipeline_desc);

        let pipeline = gstreamer::parse::launch(&pipeline_desc)
            .map_err(|e| CameraError::Configuration {
                details: format!("Failed to create pipeline: {}", e),
            })?
            .downcast::<Pipeline>()
            .map_err(|_| CameraError::Configuration {
                details: "Failed to downcast to Pipeline".to_string(),
            })?;

        let appsink = pipeline
            .by_name("sink")
            .and_then(|element| element.downcast::<AppSink>().ok())
            .ok_or_else(|| CameraError::Configuration {
                details: "Pipeline has no appsink named 'sink'".to_string(),
            })?;

        pipeline
            .set_state(gstreamer::State::Playing)
            .map_err(|e| CameraError::DeviceOpen {
                device: self.config.device.clone(),
                details: e.to_string(),
            })?;

        info!("GStreamer pipeline started for {}", self.config.device);
        self.pipeline = Some(pipeline);
        self.appsink = Some(appsink);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        let appsink = self.appsink.as_ref().ok_or(CameraError::Disconnected)?;
        let timeout = Duration::from_millis(self.config.read_timeout_ms);

        let sample = match appsink
            .try_pull_sample(gstreamer::ClockTime::from_mseconds(self.config.read_timeout_ms))
        {
            Some(sample) => sample,
            None if appsink.is_eos() => return Err(CameraError::Disconnected.into()),
            None => return Err(CameraError::FrameTimeout { timeout }.into()),
        };

        let buffer = sample.buffer().ok_or_else(|| CameraError::CaptureStream {
            details: "No buffer in sample".to_string(),
        })?;
        let map = buffer
            .map_readable()
            .map_err(|e| CameraError::CaptureStream {
                details: format!("Failed to map buffer: {}", e),
            })?;

        let (width, height) = self.dimensions_from_sample(&sample);
        trace!("Pulled MJPEG sample {}x{} ({} bytes)", width, height, map.len());

        Ok(RawFrame {
            data: map.as_slice().to_vec(),
            width,
            height,
        })
    }

    fn close(&mut self) {
        self.appsink = None;
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.set_state(gstreamer::State::Null) {
                warn!("Failed to stop GStreamer pipeline: {}", e);
            } else {
                debug!("GStreamer pipeline stopped");
            }
        }
    }
}

impl Drop for GstCamera {
    fn drop(&mut self) {
        self.close();
    }
}
