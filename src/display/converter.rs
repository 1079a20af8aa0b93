use crate::config::Rotation;
use crate::error::{DisplayError, Result};
use crate::frame::{apply_rotation, decode_jpeg};
use image::imageops::FilterType;

/// Turns camera JPEGs into framebuffer-ready RGB565 bytes
#[derive(Debug, Clone)]
pub struct DisplayConverter {
    width: u32,
    height: u32,
    rotation: Option<Rotation>,
}

impl DisplayConverter {
    pub fn new(resolution: (u32, u32), rotation: Option<Rotation>) -> Self {
        Self {
            width: resolution.0,
            height: resolution.1,
            rotation,
        }
    }

    /// Bytes in one converted frame
    pub fn frame_len(&self) -> usize {
        (self.width * self.height * 2) as usize
    }

    /// Decode, rotate, scale to the panel and pack as RGB565 little-endian
    pub fn convert(&self, jpeg: &[u8]) -> Result<Vec<u8>> {
        let mut image = decode_jpeg(jpeg).map_err(|e| DisplayError::FormatConversion {
            details: e.to_string(),
        })?;

        if let Some(rotation) = self.rotation {
            image = apply_rotation(image, rotation);
        }

        let rgb = if image.width() == self.width && image.height() == self.height {
            image.to_rgb8()
        } else {
            image
                .resize_exact(self.width, self.height, FilterType::Triangle)
                .to_rgb8()
        };

        Self::rgb24_to_rgb565(rgb.as_raw(), self.width, self.height)
    }

    /// Convert packed RGB24 to RGB565 little-endian
    pub fn rgb24_to_rgb565(rgb24_data: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
        let expected_size = (width * height * 3) as usize;
        if rgb24_data.len() != expected_size {
            return Err(DisplayError::FormatConversion {
                details: format!(
                    "Invalid RGB24 data size: expected {}, got {}",
                    expected_size,
                    rgb24_data.len()
                ),
            }
            .into());
        }

        let mut rgb565_data = Vec::with_capacity((width * height * 2) as usize);
        for chunk in rgb24_data.chunks_exact(3) {
            let r = (chunk[0] >> 3) as u16;
            let g = (chunk[1] >> 2) as u16;
            let b = (chunk[2] >> 3) as u16;
            rgb565_data.extend_from_slice(&((r << 11) | (g << 5) | b).to_le_bytes());
        }

        Ok(rgb565_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_support::jpeg_with_box;

    #[test]
    fn test_rgb24_to_rgb565() {
        let rgb24 = vec![
            255, 0, 0, // red
            0, 255, 0, // green
            0, 0, 255, // blue
        ];
        let rgb565 = DisplayConverter::rgb24_to_rgb565(&rgb24, 3, 1).unwrap();
        assert_eq!(rgb565, vec![0x00, 0xF8, 0xE0, 0x07, 0x1F, 0x00]);
    }

    #[test]
    fn test_rgb24_size_mismatch() {
        assert!(DisplayConverter::rgb24_to_rgb565(&[0, 0, 0], 2, 1).is_err());
    }

    #[test]
    fn test_convert_scales_to_panel() {
        let converter = DisplayConverter::new((80, 40), None);
        let out = converter.convert(&jpeg_with_box(64, 48, None)).unwrap();
        assert_eq!(out.len(), converter.frame_len());
    }

    #[test]
    fn test_convert_rotates_before_scaling() {
        // A 90 degree turn of a 64x48 frame fills a 48x64 panel without resampling
        let converter = DisplayConverter::new((48, 64), Some(Rotation::Rotate90));
        let out = converter.convert(&jpeg_with_box(64, 48, None)).unwrap();
        assert_eq!(out.len(), 48 * 64 * 2);
    }

    #[test]
    fn test_convert_rejects_garbage() {
        let converter = DisplayConverter::new((8, 8), None);
        assert!(converter.convert(b"nope").is_err());
    }
}
