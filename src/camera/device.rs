use crate::config::{CameraConfig, CameraSource};
use crate::error::{CameraError, Result};
use crate::frame::encode_jpeg;
use image::{DynamicImage, GrayImage, Luma};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Encoded bytes handed over by a device, before FrameSource stamps them
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Blocking camera device driven by the FrameSource worker thread.
///
/// `read_frame` may block up to the device's own frame period or read timeout.
pub trait CameraDevice: Send + 'static {
    fn describe(&self) -> String;
    fn open(&mut self) -> Result<()>;
    fn read_frame(&mut self) -> Result<RawFrame>;
    fn close(&mut self);
}

/// Build the device named by the camera configuration
pub fn create_device(config: &CameraConfig) -> Result<Box<dyn CameraDevice>> {
    match config.source {
        CameraSource::Synthetic => Ok(Box::new(SyntheticCamera::new(config))),
        CameraSource::Camera => {
            #[cfg(all(feature = "camera", target_os = "linux"))]
            {
                Ok(Box::new(super::interface::GstCamera::new(config.clone())))
            }
            #[cfg(not(all(feature = "camera", target_os = "linux")))]
            {
                Err(CameraError::NotAvailable.into())
            }
        }
    }
}

/// Test-pattern camera that renders JPEG frames at the configured rate.
///
/// The scene is a static gray field; every `visitor_period` a bright block
/// crosses it for a couple of seconds so the motion path can be exercised
/// without hardware.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    interval: Duration,
    visitor_period: u64,
    visitor_frames: u64,
    frame_index: u64,
    next_due: Option<Instant>,
    background: Option<Vec<u8>>,
    opened: bool,
}

impl SyntheticCamera {
    pub fn new(config: &CameraConfig) -> Self {
        let fps = config.max_fps.max(1) as u64;
        Self {
            width: config.resolution.0,
            height: config.resolution.1,
            interval: config.frame_interval(),
            visitor_period: fps * 60,
            visitor_frames: fps * 2,
            frame_index: 0,
            next_due: None,
            background: None,
            opened: false,
        }
    }

    /// Change how often, and for how many frames, the bright block appears
    pub fn with_visitor_timing(mut self, period_frames: u64, visible_frames: u64) -> Self {
        self.visitor_period = period_frames.max(1);
        self.visitor_frames = visible_frames.min(self.visitor_period);
        self
    }

    fn render(&mut self) -> Result<Vec<u8>> {
        let phase = self.frame_index % self.visitor_period;
        if phase >= self.visitor_frames {
            if let Some(bg) = &self.background {
                return Ok(bg.clone());
            }
            let bg = encode_jpeg(
                &DynamicImage::ImageLuma8(GrayImage::from_pixel(
                    self.width,
                    self.height,
                    Luma([60u8]),
                )),
                80,
            )?;
            self.background = Some(bg.clone());
            return Ok(bg);
        }

        let mut img = GrayImage::from_pixel(self.width, self.height, Luma([60u8]));
        let block_w = (self.width / 4).max(1);
        let block_h = (self.height / 2).max(1);
        let travel = self.width.saturating_sub(block_w) as u64;
        let x0 = (travel * phase / self.visitor_frames.max(1)) as u32;
        let y0 = (self.height - block_h) / 2;
        for y in y0..y0 + block_h {
            for x in x0..(x0 + block_w).min(self.width) {
                img.put_pixel(x, y, Luma([235u8]));
            }
        }
        encode_jpeg(&DynamicImage::ImageLuma8(img), 80)
    }
}

impl CameraDevice for SyntheticCamera {
    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }

    fn open(&mut self) -> Result<()> {
        info!(
            "Opening synthetic camera {}x{} @ {:?}/frame",
            self.width, self.height, self.interval
        );
        self.opened = true;
        self.next_due = Some(Instant::now());
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RawFrame> {
        if !self.opened {
            return Err(CameraError::Disconnected.into());
        }

        let due = self.next_due.unwrap_or_else(Instant::now);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
        // Pace from the schedule, not from when we woke, but never build a backlog
        self.next_due = Some((due + self.interval).max(Instant::now()));

        let data = self.render()?;
        self.frame_index += 1;
        Ok(RawFrame {
            data,
            width: self.width,
            height: self.height,
        })
    }

    fn close(&mut self) {
        debug!("Closing synthetic camera");
        self.opened = false;
        self.next_due = None;
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::VecDeque;

    /// Replays a fixed list of reads, then reports a disconnect
    pub struct ScriptedCamera {
        pub reads: VecDeque<Result<RawFrame>>,
        pub open_failures: u32,
        pub pace: Duration,
    }

    impl ScriptedCamera {
        pub fn new(reads: Vec<Result<RawFrame>>) -> Self {
            Self {
                reads: reads.into(),
                open_failures: 0,
                pace: Duration::from_millis(1),
            }
        }
    }

    impl CameraDevice for ScriptedCamera {
        fn describe(&self) -> String {
            "scripted".to_string()
        }

        fn open(&mut self) -> Result<()> {
            if self.open_failures > 0 {
                self.open_failures -= 1;
                return Err(CameraError::DeviceOpen {
                    device: "scripted".to_string(),
                    details: "not yet".to_string(),
                }
                .into());
            }
            Ok(())
        }

        fn read_frame(&mut self) -> Result<RawFrame> {
            std::thread::sleep(self.pace);
            self.reads
                .pop_front()
                .unwrap_or_else(|| Err(CameraError::Disconnected.into()))
        }

        fn close(&mut self) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DoorcamConfig;
    use crate::frame::decode_jpeg;

    fn small_config() -> CameraConfig {
        let mut config = DoorcamConfig::default().camera;
        config.source = CameraSource::Synthetic;
        config.resolution = (64, 48);
        config.max_fps = 100;
        config
    }

    #[test]
    fn test_synthetic_frames_decode() {
        let mut camera = SyntheticCamera::new(&small_config());
        camera.open().unwrap();
        let raw = camera.read_frame().unwrap();
        assert_eq!((raw.width, raw.height), (64, 48));
        let img = decode_jpeg(&raw.data).unwrap();
        assert_eq!((img.width(), img.height()), (64, 48));
    }

    #[test]
    fn test_synthetic_requires_open() {
        let mut camera = SyntheticCamera::new(&small_config());
        assert!(camera.read_frame().is_err());
    }

    #[test]
    fn test_synthetic_visitor_changes_frames() {
        let mut camera = SyntheticCamera::new(&small_config()).with_visitor_timing(10, 3);
        camera.open().unwrap();

        let frames: Vec<Vec<u8>> = (0..10).map(|_| camera.read_frame().unwrap().data).collect();
        // Background frames are cached and identical
        assert_eq!(frames[3], frames[9]);
        assert_ne!(frames[0], frames[3]);
    }

    #[test]
    fn test_create_device_synthetic() {
        let device = create_device(&small_config()).unwrap();
        assert!(device.describe().starts_with("synthetic"));
    }

    #[cfg(not(all(feature = "camera", target_os = "linux")))]
    #[test]
    fn test_create_device_without_camera_feature() {
        let mut config = small_config();
        config.source = CameraSource::Camera;
        assert!(matches!(
            create_device(&config),
            Err(crate::error::DoorcamError::Camera(CameraError::NotAvailable))
        ));
    }
}
