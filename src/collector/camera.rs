//! Camera frame sources.
//!
//! A real webcam backend plugs in behind [`FrameSource`]. The crate ships a
//! synthetic test-pattern camera and a still-image camera so the pipeline can
//! run on machines without a capture device.

use crate::collector::types::Frame;
use crate::error::CaptureError;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_filled_circle_mut;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

/// Something that yields one JPEG frame on demand.
///
/// Calls may block; the capture loop runs them on the blocking pool.
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<Frame, CaptureError>;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

/// Camera producing a moving-marker test pattern.
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    quality: u8,
    frames: AtomicU64,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, quality: u8) -> Self {
        Self {
            width,
            height,
            quality,
            frames: AtomicU64::new(0),
        }
    }

    /// Render the pattern for a given frame number.
    fn pattern(&self, frame_no: u64) -> RgbImage {
        let (width, height) = (self.width, self.height);
        let mut img = ImageBuffer::from_pixel(width, height, Rgb([40, 40, 50]));

        let grid_spacing = 80;
        let line_color = Rgb([80, 80, 90]);
        for x in (0..width).step_by(grid_spacing) {
            for y in 0..height {
                img.put_pixel(x, y, line_color);
            }
        }
        for y in (0..height).step_by(grid_spacing) {
            for x in 0..width {
                img.put_pixel(x, y, line_color);
            }
        }

        // Marker sweeps left to right so viewers can see the stream is live
        let radius = (height / 12).max(4) as i32;
        let span = (width as i32 - 2 * radius).max(1) as u64;
        let x = radius + (frame_no * 16 % span) as i32;
        draw_filled_circle_mut(
            &mut img,
            (x, (height / 2) as i32),
            radius,
            Rgb([75, 192, 192]),
        );

        img
    }
}

impl FrameSource for SyntheticCamera {
    fn capture(&self) -> Result<Frame, CaptureError> {
        if self.width == 0 || self.height == 0 {
            return Err(CaptureError::Unavailable(format!(
                "invalid synthetic frame size {}x{}",
                self.width, self.height
            )));
        }
        let frame_no = self.frames.fetch_add(1, Ordering::Relaxed);
        let jpeg = encode_jpeg(&self.pattern(frame_no), self.quality)?;
        Ok(Frame::new(jpeg))
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{}", self.width, self.height)
    }
}

/// Camera that re-reads an image file on every capture.
///
/// Non-JPEG files are re-encoded so the transported frame is always JPEG.
pub struct StillImageCamera {
    path: PathBuf,
    quality: u8,
}

impl StillImageCamera {
    pub fn new(path: impl Into<PathBuf>, quality: u8) -> Self {
        Self {
            path: path.into(),
            quality,
        }
    }
}

impl FrameSource for StillImageCamera {
    fn capture(&self) -> Result<Frame, CaptureError> {
        let bytes = std::fs::read(&self.path).map_err(|source| CaptureError::Read {
            path: self.path.clone(),
            source,
        })?;

        if matches!(image::guess_format(&bytes), Ok(ImageFormat::Jpeg)) {
            return Ok(Frame::new(bytes));
        }

        let img = image::load_from_memory(&bytes)
            .map_err(|e| CaptureError::Encode(format!("{}: {e}", self.path.display())))?;
        let jpeg = encode_jpeg(&img.to_rgb8(), self.quality)?;
        Ok(Frame::new(jpeg))
    }

    fn describe(&self) -> String {
        format!("still image {}", self.path.display())
    }
}

/// Encode an RGB image as JPEG.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100))
        .encode_image(img)
        .map_err(|e| CaptureError::Encode(e.to_string()))?;
    Ok(buf)
}
