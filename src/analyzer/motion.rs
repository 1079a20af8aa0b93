use crate::config::AnalyzerConfig;
use crate::error::{AnalyzerError, Result};
use crate::frame::Frame;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, ImageFormat, Luma};
use imageproc::{
    contrast::threshold,
    distance_transform::Norm,
    filter::gaussian_blur_f32,
    morphology::dilate,
    region_labelling::{connected_components, Connectivity},
};
use std::collections::HashMap;
use tracing::{debug, info, trace};

/// Outcome of analysing one frame against the background
#[derive(Debug, Clone, PartialEq)]
pub struct MotionResult {
    /// True when any region exceeds `contour_min_area`
    pub activity: bool,
    /// Largest region area in camera pixels
    pub max_area: f64,
    /// Number of changed regions found
    pub regions: usize,
}

/// Running-average background subtraction over downscaled grayscale frames.
///
/// Each call to [`MotionDetector::analyze`] stands alone: the detector keeps
/// the background estimate but no activation state. Debouncing and window
/// extension belong to the callers.
pub struct MotionDetector {
    config: AnalyzerConfig,
    background: Option<Background>,
    frames_analyzed: u64,
}

struct Background {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

impl Background {
    fn seed(image: &GrayImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            values: image.pixels().map(|p| p[0] as f32).collect(),
        }
    }

    /// Blend `image` in with weight `alpha`, then return |image - background|
    fn accumulate_and_diff(&mut self, image: &GrayImage, alpha: f32) -> GrayImage {
        let mut delta = GrayImage::new(self.width, self.height);
        for ((avg, pixel), out) in self
            .values
            .iter_mut()
            .zip(image.pixels())
            .zip(delta.pixels_mut())
        {
            let value = pixel[0] as f32;
            *avg = *avg * (1.0 - alpha) + value * alpha;
            let reference = avg.round().clamp(0.0, 255.0);
            out[0] = (value - reference).abs() as u8;
        }
        delta
    }
}

impl MotionDetector {
    pub fn new(config: AnalyzerConfig) -> Self {
        info!(
            "Motion detector configured: threshold={}, min_area={:.0}, scale=1/{}, alpha={}",
            config.delta_threshold,
            config.contour_min_area,
            config.decode_scale,
            config.background_alpha
        );

        Self {
            config,
            background: None,
            frames_analyzed: 0,
        }
    }

    /// Analyse one frame.
    ///
    /// Returns `Ok(None)` when the frame only seeded the background (the first
    /// frame, or the first after a resolution change). A decode failure leaves
    /// the background untouched.
    pub fn analyze(&mut self, frame: &Frame) -> Result<Option<MotionResult>> {
        let gray = self.prepare(&frame.data)?;

        let seeded_size = self.background.as_ref().map(|bg| (bg.width, bg.height));
        match seeded_size {
            Some(size) if size == gray.dimensions() => {}
            Some((width, height)) => {
                info!(
                    "Frame size changed ({}x{} -> {}x{}), reseeding background",
                    width,
                    height,
                    gray.width(),
                    gray.height()
                );
                self.background = Some(Background::seed(&gray));
                return Ok(None);
            }
            None => {
                debug!("Seeding background model with frame {}", frame.seq);
                self.background = Some(Background::seed(&gray));
                return Ok(None);
            }
        }

        let background = match self.background.as_mut() {
            Some(bg) => bg,
            None => return Ok(None),
        };
        let delta = background.accumulate_and_diff(&gray, self.config.background_alpha);
        let mask = threshold(&delta, self.config.delta_threshold);
        let mask = dilate(&dilate(&mask, Norm::LInf, 1), Norm::LInf, 1);

        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));
        let (regions, largest) = largest_region(&labels);

        let scale = self.config.decode_scale.max(1) as f64;
        let max_area = largest as f64 * scale * scale;
        let activity = max_area > self.config.contour_min_area;
        self.frames_analyzed += 1;

        trace!(
            "Frame {}: {} regions, largest {:.0} px (activity: {})",
            frame.seq,
            regions,
            max_area,
            activity
        );

        Ok(Some(MotionResult {
            activity,
            max_area,
            regions,
        }))
    }

    /// Decode to grayscale, shrink by `decode_scale`, blur
    fn prepare(&self, jpeg: &[u8]) -> Result<GrayImage> {
        let decoded = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
            .map_err(|e| AnalyzerError::Decode {
                details: e.to_string(),
            })?
            .to_luma8();

        let scale = self.config.decode_scale.max(1);
        let gray = if scale > 1 {
            let width = (decoded.width() / scale).max(1);
            let height = (decoded.height() / scale).max(1);
            imageops::resize(&decoded, width, height, FilterType::Triangle)
        } else {
            decoded
        };

        if self.config.blur_sigma > 0.0 {
            Ok(gaussian_blur_f32(&gray, self.config.blur_sigma))
        } else {
            Ok(gray)
        }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    pub fn background_initialized(&self) -> bool {
        self.background.is_some()
    }

    /// Frames compared against an existing background
    pub fn frames_analyzed(&self) -> u64 {
        self.frames_analyzed
    }

    /// Drop the background; the next frame seeds a fresh one
    pub fn reset(&mut self) {
        self.background = None;
    }
}

/// Region count and pixel count of the largest labelled region
fn largest_region(labels: &ImageBuffer<Luma<u32>, Vec<u32>>) -> (usize, u32) {
    let mut sizes: HashMap<u32, u32> = HashMap::new();
    for pixel in labels.pixels() {
        if pixel[0] > 0 {
            *sizes.entry(pixel[0]).or_insert(0) += 1;
        }
    }
    (sizes.len(), sizes.values().copied().max().unwrap_or(0))
}
