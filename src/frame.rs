//! Frame container shared by the capture, preprocessing and tracking stages.
//!
//! - `Frame`: owned pixel buffer plus dimensions, pixel format and timestamp.
//! - `PixelFormat`: colorspace tag; the channel count derives from it.
//!
//! Frames move forward through the pipeline by value. Capture produces a frame,
//! the preprocessor consumes it and returns a new one, and the tracking session
//! takes ownership when it is fed. No stage keeps a frame after handing it on.

use anyhow::{anyhow, Result};

/// Colorspace tag for packed 8-bit frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// Single-channel intensity.
    Gray8,
    /// Packed R, G, B.
    Rgb24,
    /// Packed B, G, R (what OpenCV-style pipelines deliver).
    Bgr24,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
        }
    }
}

/// A captured frame.
///
/// Not `Clone`: a frame has exactly one owner at a time.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Seconds since the capture loop started. Zero until stamped.
    pub timestamp: f64,
}

impl Frame {
    /// Wrap a packed pixel buffer. The buffer length must match the dimensions.
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = expected_len(width, height, format)?;
        if data.len() != expected {
            return Err(anyhow!(
                "{:?} frame length mismatch: expected {}, got {}",
                format,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            format,
            timestamp: 0.0,
        })
    }

    /// Attach a capture timestamp, consuming the frame.
    pub fn stamped(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn channels(&self) -> usize {
        self.format.channels()
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty() || self.width == 0 || self.height == 0
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

pub(crate) fn expected_len(width: u32, height: u32, format: PixelFormat) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(format.channels()))
        .ok_or_else(|| anyhow!("frame dimensions overflow: {}x{}", width, height))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
