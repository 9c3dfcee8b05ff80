//! Frame type and pixel conversion from YUYV/GREY to RGB.

use image::{imageops, RgbImage};

/// Fraction of dark bytes above which a frame counts as dark.
pub const DARK_FRAME_THRESHOLD: f32 = 0.95;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    /// Whether the frame has non-zero dimensions and a complete buffer.
    pub fn is_ready(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() >= (self.width * self.height * 3) as usize
    }

    /// Copy into an `image` buffer. `None` when the frame is not ready.
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        if !self.is_ready() {
            return None;
        }
        let len = (self.width * self.height * 3) as usize;
        RgbImage::from_raw(self.width, self.height, self.data[..len].to_vec())
    }

    /// Lens covered or room unlit: nearly every byte below the dark level.
    pub fn is_dark(&self) -> bool {
        is_dark_frame(&self.data, DARK_FRAME_THRESHOLD)
    }

    /// Average brightness (0.0–255.0) over all channel bytes.
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }
}

/// Horizontally mirrored copy, matching the selfie view shown to the user.
pub fn mirrored(image: &RgbImage) -> RgbImage {
    imageops::flip_horizontal(image)
}

/// Convert packed YUYV (4:2:2) to packed RGB using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&yuv_to_rgb(y0, u, v));
        rgb.extend_from_slice(&yuv_to_rgb(y1, u, v));
    }
    Ok(rgb)
}

/// Replicate an 8-bit grayscale buffer into packed RGB.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if gray.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: gray.len(),
        });
    }
    Ok(gray[..expected].iter().flat_map(|&g| [g, g, g]).collect())
}

fn yuv_to_rgb(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = y as f32 - 16.0;
    let d = u as f32 - 128.0;
    let e = v as f32 - 128.0;
    let r = 1.164 * c + 1.596 * e;
    let g = 1.164 * c - 0.392 * d - 0.813 * e;
    let b = 1.164 * c + 2.017 * d;
    [clamp_u8(r), clamp_u8(g), clamp_u8(b)]
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

/// Check if a frame is dark.
///
/// Returns true if more than `threshold_pct` of bytes are below 32.
pub fn is_dark_frame(data: &[u8], threshold_pct: f32) -> bool {
    if data.is_empty() {
        return true;
    }
    let dark_count = data.iter().filter(|&&p| p < 32).count();
    (dark_count as f32 / data.len() as f32) > threshold_pct
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame(w: u32, h: u32, data: Vec<u8>) -> Frame {
        Frame {
            data,
            width: w,
            height: h,
            timestamp: std::time::Instant::now(),
            sequence: 0,
        }
    }

    #[test]
    fn test_yuyv_to_rgb_gray_levels() {
        // Neutral chroma: Y=16 is black, Y=235 is white
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200, "red={}", rgb[0]);
        assert!(rgb[1] < 40 && rgb[2] < 40);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128];
        assert!(yuyv_to_rgb(&yuyv, 2, 1).is_err());
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 200, 200, 200]);
        assert!(grey_to_rgb(&[1], 2, 1).is_err());
    }

    #[test]
    fn test_frame_ready_and_convert() {
        let f = frame(2, 1, vec![1, 2, 3, 4, 5, 6]);
        assert!(f.is_ready());
        let img = f.to_rgb_image().unwrap();
        assert_eq!(img.get_pixel(1, 0), &Rgb([4, 5, 6]));
    }

    #[test]
    fn test_frame_not_ready() {
        assert!(!frame(0, 0, vec![]).is_ready());
        assert!(frame(2, 2, vec![0; 5]).to_rgb_image().is_none());
    }

    #[test]
    fn test_mirrored_flips_columns() {
        let img = RgbImage::from_fn(3, 1, |x, _| Rgb([x as u8, 0, 0]));
        let m = mirrored(&img);
        assert_eq!(m.get_pixel(0, 0).0[0], 2);
        assert_eq!(m.get_pixel(2, 0).0[0], 0);
    }

    #[test]
    fn test_dark_frame_all_black() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_normal() {
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));
    }

    #[test]
    fn test_dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn test_frame_is_dark() {
        assert!(frame(2, 2, vec![5; 12]).is_dark());
        assert!(!frame(2, 2, vec![180; 12]).is_dark());
        // a few bright pixels are not enough at 95%
        let mut data = vec![0u8; 300];
        data[..10].fill(200);
        assert!(frame(10, 10, data).is_dark());
    }
}
