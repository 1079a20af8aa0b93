use crate::config::{CaptureConfig, Rotation};
use crate::error::{PostProcessError, Result};
use crate::frame::{apply_rotation, decode_jpeg, encode_jpeg};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use rusttype::{Font, Scale};
use std::path::Path;
use tracing::{debug, warn};

const OVERLAY_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %Z";
const OUTPUT_QUALITY: u8 = 90;

struct TimestampOverlay {
    font: Font<'static>,
    size: f32,
}

/// Per-image rotation and timestamp stamping
pub struct Annotator {
    rotation: Option<Rotation>,
    overlay: Option<TimestampOverlay>,
    timezone: Tz,
}

impl Annotator {
    /// Load the overlay font if one is wanted. A font that cannot be loaded
    /// leaves rotation as the only annotation.
    pub fn from_config(config: &CaptureConfig, timezone: Tz) -> Self {
        let overlay = if config.timestamp_overlay {
            match load_font(&config.timestamp_font_path) {
                Ok(font) => Some(TimestampOverlay {
                    font,
                    size: config.timestamp_font_size,
                }),
                Err(e) => {
                    warn!("Timestamp overlay disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        Self {
            rotation: config.rotation,
            overlay,
            timezone,
        }
    }

    /// True when annotation would change the images
    pub fn is_active(&self) -> bool {
        self.rotation.is_some() || self.overlay.is_some()
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay.is_some()
    }

    /// Rotate, then stamp the capture time if it is known
    pub fn annotate(&self, jpeg: &[u8], captured_at: Option<DateTime<Utc>>) -> Result<Vec<u8>> {
        let mut image = decode_jpeg(jpeg)?;
        if let Some(rotation) = self.rotation {
            image = apply_rotation(image, rotation);
        }

        let mut rgb = image.to_rgb8();
        if let (Some(overlay), Some(when)) = (&self.overlay, captured_at) {
            let text = when
                .with_timezone(&self.timezone)
                .format(OVERLAY_FORMAT)
                .to_string();
            stamp(&mut rgb, overlay, &text);
        }

        encode_jpeg(&DynamicImage::ImageRgb8(rgb), OUTPUT_QUALITY)
    }
}

fn load_font(path: &str) -> Result<Font<'static>> {
    let data = std::fs::read(path).map_err(|e| PostProcessError::Annotation {
        path: path.to_string(),
        details: format!("failed to read font: {}", e),
    })?;

    Font::try_from_vec(data).ok_or_else(|| {
        PostProcessError::Annotation {
            path: path.to_string(),
            details: "not a usable TrueType font".to_string(),
        }
        .into()
    })
}

/// Draw white text over a darkened box in the bottom-left corner
fn stamp(img: &mut RgbImage, overlay: &TimestampOverlay, text: &str) {
    let scale = Scale::uniform(overlay.size);
    let x: u32 = 10;
    let y: u32 = img.height().saturating_sub((overlay.size * 1.5) as u32);
    let (text_width, text_height) = text_size(scale, &overlay.font, text);

    for dy in 0..(text_height.max(0) as u32 + 10) {
        for dx in 0..(text_width.max(0) as u32 + 10) {
            let px = x.saturating_sub(5) + dx;
            let py = y.saturating_sub(5) + dy;
            if px < img.width() && py < img.height() {
                let Rgb([r, g, b]) = *img.get_pixel(px, py);
                img.put_pixel(px, py, Rgb([r / 3, g / 3, b / 3]));
            }
        }
    }

    draw_text_mut(
        img,
        Rgb([255, 255, 255]),
        x as i32,
        y as i32,
        scale,
        &overlay.font,
        text,
    );
    debug!("Stamped '{}'", text);
}

/// Annotate one file into `target`
pub(crate) fn annotate_file(
    annotator: &Annotator,
    source: &Path,
    target: &Path,
    captured_at: Option<DateTime<Utc>>,
) -> Result<()> {
    let data = std::fs::read(source).map_err(|e| PostProcessError::Annotation {
        path: source.display().to_string(),
        details: e.to_string(),
    })?;

    let annotated = annotator
        .annotate(&data, captured_at)
        .map_err(|e| PostProcessError::Annotation {
            path: source.display().to_string(),
            details: e.to_string(),
        })?;

    std::fs::write(target, annotated).map_err(|e| PostProcessError::Annotation {
        path: target.display().to_string(),
        details: e.to_string(),
    })?;
    Ok(())
}
