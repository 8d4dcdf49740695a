//! Frame type and YUYV color conversion.

use image::{DynamicImage, RgbImage};

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Interleaved RGB data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Average luma (0.0–255.0), usable as a cheap darkness check.
    pub fn avg_luma(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let sum: f32 = self
            .data
            .chunks_exact(3)
            .map(|p| 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32)
            .sum();
        sum / (self.data.len() / 3) as f32
    }

    /// Whether the frame is too dark to be worth extracting from. The
    /// door feed at night is black; skipping those frames saves an
    /// inference pass per tick.
    pub fn is_dark(&self, min_luma: f32) -> bool {
        self.avg_luma() < min_luma
    }

    /// View the frame as an owned `image` buffer for the extractor.
    pub fn to_image(&self) -> Option<DynamicImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone()).map(DynamicImage::ImageRgb8)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to interleaved RGB.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; U and V are
/// shared by the pixel pair. Uses BT.601 full-range conversion.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for &y in &[quad[0], quad[2]] {
            let y = y as f32;
            let r = y + 1.402 * v;
            let g = y - 0.344 * u - 0.714 * v;
            let b = y + 1.772 * u;
            rgb.push(r.clamp(0.0, 255.0) as u8);
            rgb.push(g.clamp(0.0, 255.0) as u8);
            rgb.push(b.clamp(0.0, 255.0) as u8);
        }
    }
    Ok(rgb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_length() {
        // 4x2 image = 8 pixels, 16 YUYV bytes, 24 RGB bytes
        let yuyv = vec![128u8; 16];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.len(), 24);
    }

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        // U = V = 128 means zero chroma: R = G = B = Y
        let yuyv = vec![100, 128, 200, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(&rgb[0..3], &[100, 100, 100]);
        assert_eq!(&rgb[3..6], &[200, 200, 200]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_avg_luma_uniform() {
        let frame = Frame {
            data: vec![128u8; 2 * 2 * 3],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        assert!((frame.avg_luma() - 128.0).abs() < 0.5);
    }

    #[test]
    fn test_is_dark_threshold() {
        let dark = Frame {
            data: vec![5u8; 2 * 2 * 3],
            width: 2,
            height: 2,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        assert!(dark.is_dark(16.0));
        assert!(!dark.is_dark(4.0));
    }

    #[test]
    fn test_to_image_dimensions() {
        let frame = Frame {
            data: vec![0u8; 6 * 4 * 3],
            width: 6,
            height: 4,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        let img = frame.to_image().unwrap();
        assert_eq!(img.width(), 6);
        assert_eq!(img.height(), 4);
    }

    #[test]
    fn test_to_image_rejects_short_buffer() {
        let frame = Frame {
            data: vec![0u8; 5],
            width: 6,
            height: 4,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        };
        assert!(frame.to_image().is_none());
    }
}
