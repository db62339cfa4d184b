//! Frame capture backends.
//!
//! Exactly two capture topologies are supported, chosen by
//! `CaptureConfig::backend` with no fallback between them:
//! - Direct device: a numbered V4L2 node (feature: ingest-v4l2)
//! - Pipeline description: a GStreamer launch string ending in an appsink
//!   (feature: pipeline-gstreamer)
//!
//! Both backends also accept a `stub://` address that produces synthetic
//! frames without hardware.
//!
//! Every source yields owned `Frame`s in a format the preprocessor handles.
//! `read_frame` blocks until a frame arrives, the stream ends, or the read
//! fails. End of stream is `Ok(None)`, not an error.

mod normalize;
pub mod pipeline;
pub mod synthetic;
pub mod v4l2;

use anyhow::{anyhow, Context, Result};

use crate::frame::Frame;

pub use pipeline::PipelineSource;
pub use synthetic::SyntheticSource;
pub use v4l2::V4l2Source;

/// Default pipeline for cameras only reachable through libcamera.
pub const DEFAULT_PIPELINE: &str = "libcamerasrc ! \
     video/x-raw,format=RGB,width=640,height=480,framerate=30/1 ! \
     videoconvert ! video/x-raw,format=BGR ! appsink name=appsink drop=1";

pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Which capture topology to open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptureBackend {
    /// Numbered local camera device through its native capture interface.
    DirectDevice,
    /// Textual processing graph (source, conversion stages, sink).
    PipelineDescription,
}

/// Capture settings resolved from CLI, config file and environment.
#[derive(Clone, Debug)]
pub struct CaptureConfig {
    pub backend: CaptureBackend,
    /// Device node for `DirectDevice` (e.g. "/dev/video0" or "stub://cam").
    pub device: String,
    /// Requested mode. Advisory for `DirectDevice`: the driver may pick the
    /// nearest mode it supports.
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Convert every frame to single-channel intensity before feeding.
    pub grayscale: bool,
    /// Launch string for `PipelineDescription`.
    pub pipeline: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::DirectDevice,
            device: DEFAULT_DEVICE.to_string(),
            width: 640,
            height: 480,
            fps: 30,
            grayscale: false,
            pipeline: DEFAULT_PIPELINE.to_string(),
        }
    }
}

impl CaptureConfig {
    /// Device node path for a device index.
    pub fn device_for_index(index: u32) -> String {
        format!("/dev/video{}", index)
    }

    /// Address of whichever backend is selected.
    pub fn address(&self) -> &str {
        match self.backend {
            CaptureBackend::DirectDevice => &self.device,
            CaptureBackend::PipelineDescription => &self.pipeline,
        }
    }
}

/// Statistics for a capture source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub address: String,
    /// Mode actually delivered, which may differ from the requested one.
    pub width: u32,
    pub height: u32,
}

/// An opened capture source.
pub trait FrameSource {
    /// Block for the next frame. `Ok(None)` means the stream ended.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    fn stats(&self) -> SourceStats;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        (**self).read_frame()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }
}

/// Open the backend selected by `config.backend`.
///
/// Only the selected backend is touched. A failure here is final; the other
/// backend is never tried.
pub fn open(config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
    match config.backend {
        CaptureBackend::DirectDevice => {
            if config.device.trim().is_empty() {
                return Err(anyhow!("no capture device configured"));
            }
            let mut source = V4l2Source::new(config.clone())?;
            source
                .connect()
                .with_context(|| format!("could not open camera {}", config.device))?;
            Ok(Box::new(source))
        }
        CaptureBackend::PipelineDescription => {
            if config.pipeline.trim().is_empty() {
                return Err(anyhow!("no capture pipeline configured"));
            }
            let mut source = PipelineSource::new(config.clone())?;
            source
                .connect()
                .context("could not open capture pipeline")?;
            Ok(Box::new(source))
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
