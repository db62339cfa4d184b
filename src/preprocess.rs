//! Frame normalization ahead of tracking.
//!
//! The tracking engine expects frames in the colorspace and resolution its
//! settings describe. Two optional steps get them there:
//! 1. Grayscale conversion (BT.601 luma, channel order aware)
//! 2. Uniform rescale by the engine's image scale
//!
//! Both steps are pure; the capture timestamp is carried over untouched.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, Rgb};

use crate::frame::{Frame, PixelFormat};

// Fixed-point BT.601 weights (Q14), the same integer rounding OpenCV uses.
const LUMA_R: u32 = 4_899;
const LUMA_G: u32 = 9_617;
const LUMA_B: u32 = 1_868;
const LUMA_SHIFT: u32 = 14;
const LUMA_ROUND: u32 = 1 << (LUMA_SHIFT - 1);

/// Applies the per-run preprocessing settings to every frame.
#[derive(Clone, Copy, Debug)]
pub struct FramePreprocessor {
    grayscale: bool,
    scale: f32,
}

impl FramePreprocessor {
    /// `scale` is the engine's image scale, queried once after initialization.
    pub fn new(grayscale: bool, scale: f32) -> Self {
        Self { grayscale, scale }
    }

    pub fn grayscale(&self) -> bool {
        self.grayscale
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Normalize a frame. Consumes the input and returns the frame to feed.
    pub fn process(&self, frame: Frame) -> Result<Frame> {
        let frame = if self.grayscale {
            to_grayscale(frame)?
        } else {
            frame
        };

        if self.scale == 1.0 {
            return Ok(frame);
        }

        match scaled_dimensions(frame.width, frame.height, self.scale) {
            Some((width, height)) => resize(frame, width, height),
            None => {
                log::debug!(
                    "FramePreprocessor: scale {} collapses {}x{}; keeping original size",
                    self.scale,
                    frame.width,
                    frame.height
                );
                Ok(frame)
            }
        }
    }
}

/// Target dimensions for a rescale, or `None` when either side rounds to a
/// non-positive value (the frame then keeps its original size).
pub fn scaled_dimensions(width: u32, height: u32, scale: f32) -> Option<(u32, u32)> {
    let w = round_scaled(width, scale)?;
    let h = round_scaled(height, scale)?;
    Some((w, h))
}

fn round_scaled(dim: u32, scale: f32) -> Option<u32> {
    let scaled = (dim as f64 * scale as f64).round();
    if scaled.is_nan() || scaled < 1.0 || scaled > u32::MAX as f64 {
        return None;
    }
    Some(scaled as u32)
}

fn to_grayscale(frame: Frame) -> Result<Frame> {
    let (r_at, b_at) = match frame.format {
        PixelFormat::Gray8 => return Ok(frame),
        PixelFormat::Rgb24 => (0, 2),
        PixelFormat::Bgr24 => (2, 0),
    };

    let gray: Vec<u8> = frame
        .pixels()
        .chunks_exact(3)
        .map(|px| {
            let r = px[r_at] as u32;
            let g = px[1] as u32;
            let b = px[b_at] as u32;
            ((r * LUMA_R + g * LUMA_G + b * LUMA_B + LUMA_ROUND) >> LUMA_SHIFT) as u8
        })
        .collect();

    let timestamp = frame.timestamp;
    Ok(Frame::new(gray, frame.width, frame.height, PixelFormat::Gray8)?.stamped(timestamp))
}

fn resize(frame: Frame, width: u32, height: u32) -> Result<Frame> {
    let (src_w, src_h, format, timestamp) =
        (frame.width, frame.height, frame.format, frame.timestamp);

    // Resampling is channel-order agnostic, so BGR rides through the RGB path.
    let pixels = match format {
        PixelFormat::Gray8 => {
            let img = ImageBuffer::<Luma<u8>, _>::from_raw(src_w, src_h, frame.into_pixels())
                .ok_or_else(|| anyhow!("gray buffer does not match {}x{}", src_w, src_h))?;
            imageops::resize(&img, width, height, FilterType::Triangle).into_raw()
        }
        PixelFormat::Rgb24 | PixelFormat::Bgr24 => {
            let img = ImageBuffer::<Rgb<u8>, _>::from_raw(src_w, src_h, frame.into_pixels())
                .ok_or_else(|| anyhow!("color buffer does not match {}x{}", src_w, src_h))?;
            imageops::resize(&img, width, height, FilterType::Triangle).into_raw()
        }
    };

    Ok(Frame::new(pixels, width, height, format)?.stamped(timestamp))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
