use crate::config::Rotation;
use crate::error::{DoorcamError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

/// One encoded camera frame.
///
/// Cloning is cheap: the JPEG bytes sit behind an `Arc` and are never mutated
/// after the camera worker publishes the frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Strictly increasing per FrameSource
    pub seq: u64,
    /// Monotonic capture time, used for preroll and postroll windows
    pub captured_at: Instant,
    /// Wall-clock capture time, used for file names and overlays
    pub timestamp: SystemTime,
    /// Encoded JPEG bytes
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Stamp a freshly read frame with the current clocks
    pub fn new(seq: u64, data: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            timestamp: SystemTime::now(),
            data: Arc::new(data),
            width,
            height,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Time since capture on the monotonic clock
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    /// Decode the JPEG payload
    pub fn decode(&self) -> Result<DynamicImage> {
        decode_jpeg(&self.data)
    }
}

/// Decode JPEG bytes into an image
pub fn decode_jpeg(data: &[u8]) -> Result<DynamicImage> {
    image::load_from_memory_with_format(data, ImageFormat::Jpeg).map_err(|e| {
        DoorcamError::component("frame", format!("Failed to decode JPEG: {}", e))
    })
}

/// Encode an image as JPEG at the given quality
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
        let result = match image {
            DynamicImage::ImageLuma8(gray) => {
                encoder.encode(gray.as_raw(), gray.width(), gray.height(), ColorType::L8)
            }
            other => {
                let rgb = other.to_rgb8();
                encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
            }
        };
        result.map_err(|e| {
            DoorcamError::component("frame", format!("Failed to encode JPEG: {}", e))
        })?;
    }
    Ok(buf)
}

/// Rotate an image clockwise
pub fn apply_rotation(image: DynamicImage, rotation: Rotation) -> DynamicImage {
    match rotation {
        Rotation::Rotate90 => image.rotate90(),
        Rotation::Rotate180 => image.rotate180(),
        Rotation::Rotate270 => image.rotate270(),
    }
}
