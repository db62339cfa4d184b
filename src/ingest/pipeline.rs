//! Pipeline-description capture through GStreamer.
//!
//! This module provides `PipelineSource` for the `PipelineDescription` backend,
//! used when a camera is not exposed as a conventional capture device (for
//! example libcamera-only sensors) and has to be reached through a staged
//! conversion graph.
//!
//! The launch string must end in an appsink named `appsink`:
//!
//! ```text
//! libcamerasrc ! video/x-raw,format=RGB ! videoconvert ! video/x-raw,format=BGR ! appsink name=appsink
//! ```
//!
//! Samples in BGR, RGB or GRAY8 are accepted. End of stream on the pipeline
//! ends the capture loop.

use anyhow::Result;
#[cfg(not(feature = "pipeline-gstreamer"))]
use anyhow::bail;
#[cfg(feature = "pipeline-gstreamer")]
use anyhow::{anyhow, Context};
#[cfg(feature = "pipeline-gstreamer")]
use gstreamer::prelude::*;

#[cfg(feature = "pipeline-gstreamer")]
use super::normalize::normalize_strided_frame;
use super::normalize::DeviceFormat;
use super::synthetic::{is_stub_address, StubParams, SyntheticSource};
use super::{CaptureConfig, FrameSource, SourceStats};
use crate::frame::Frame;

/// GStreamer pipeline frame source.
///
/// Uses GStreamer for real pipelines, with a synthetic fallback for `stub://`
/// descriptions.
pub struct PipelineSource {
    backend: PipelineBackend,
}

enum PipelineBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "pipeline-gstreamer")]
    Gstreamer(GstreamerPipelineSource),
}

impl PipelineSource {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        if is_stub_address(&config.pipeline) {
            // appsink in the default pipeline delivers BGR
            let params = StubParams::parse(
                &config.pipeline,
                config.width,
                config.height,
                DeviceFormat::Bgr24,
            )?;
            Ok(Self {
                backend: PipelineBackend::Synthetic(SyntheticSource::new(
                    &config.pipeline,
                    params,
                )),
            })
        } else {
            #[cfg(feature = "pipeline-gstreamer")]
            {
                Ok(Self {
                    backend: PipelineBackend::Gstreamer(GstreamerPipelineSource::new(config)?),
                })
            }
            #[cfg(not(feature = "pipeline-gstreamer"))]
            {
                bail!("capture pipelines require the pipeline-gstreamer feature")
            }
        }
    }

    /// Start the pipeline.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            PipelineBackend::Synthetic(source) => source.connect(),
            #[cfg(feature = "pipeline-gstreamer")]
            PipelineBackend::Gstreamer(source) => source.connect(),
        }
    }
}

impl FrameSource for PipelineSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            PipelineBackend::Synthetic(source) => source.read_frame(),
            #[cfg(feature = "pipeline-gstreamer")]
            PipelineBackend::Gstreamer(source) => source.read_frame(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            PipelineBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "pipeline-gstreamer")]
            PipelineBackend::Gstreamer(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production pipeline source using GStreamer
// ----------------------------------------------------------------------------

#[cfg(feature = "pipeline-gstreamer")]
const APPSINK_NAME: &str = "appsink";

#[cfg(feature = "pipeline-gstreamer")]
struct GstreamerPipelineSource {
    config: CaptureConfig,
    pipeline: gstreamer::Pipeline,
    appsink: gstreamer_app::AppSink,
    frame_count: u64,
    last_width: u32,
    last_height: u32,
}

#[cfg(feature = "pipeline-gstreamer")]
impl GstreamerPipelineSource {
    /// Parse the launch string and locate its appsink.
    fn new(config: CaptureConfig) -> Result<Self> {
        gstreamer::init().context("initialize gstreamer")?;

        let pipeline = gstreamer::parse::launch(&config.pipeline)
            .context("build capture pipeline")?
            .downcast::<gstreamer::Pipeline>()
            .map_err(|_| anyhow!("capture pipeline is not a Pipeline"))?;

        let appsink = pipeline
            .by_name(APPSINK_NAME)
            .with_context(|| {
                format!(
                    "capture pipeline has no element named '{}' (add `appsink name={}`)",
                    APPSINK_NAME, APPSINK_NAME
                )
            })?
            .downcast::<gstreamer_app::AppSink>()
            .map_err(|_| anyhow!("'{}' element is not an appsink", APPSINK_NAME))?;

        // Frames are pulled in order; the sink must not race the clock.
        appsink.set_property("sync", false);

        Ok(Self {
            last_width: config.width,
            last_height: config.height,
            config,
            pipeline,
            appsink,
            frame_count: 0,
        })
    }

    fn connect(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gstreamer::State::Playing)
            .context("set capture pipeline to Playing")?;

        // Surface a source that fails to start (missing camera, bad caps)
        // as an open error rather than a first-read failure.
        let (result, _, _) = self.pipeline.state(gstreamer::ClockTime::from_seconds(5));
        if let Err(err) = result {
            self.pipeline.set_state(gstreamer::State::Null).ok();
            return Err(anyhow!("capture pipeline failed to start: {}", err));
        }

        log::info!("PipelineSource: started `{}`", self.config.pipeline);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let sample = match self.appsink.pull_sample() {
            Ok(sample) => sample,
            Err(_) if self.appsink.is_eos() => {
                log::info!("PipelineSource: end of stream");
                return Ok(None);
            }
            Err(err) => {
                return Err(anyhow!("pull capture sample: {}", err));
            }
        };

        let frame = sample_to_frame(&sample)?;
        if frame.is_empty() {
            return Ok(None);
        }

        self.frame_count += 1;
        self.last_width = frame.width;
        self.last_height = frame.height;
        Ok(Some(frame))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            address: self.config.pipeline.clone(),
            width: self.last_width,
            height: self.last_height,
        }
    }
}

#[cfg(feature = "pipeline-gstreamer")]
impl Drop for GstreamerPipelineSource {
    fn drop(&mut self) {
        if let Err(err) = self.pipeline.set_state(gstreamer::State::Null) {
            log::warn!("PipelineSource: failed to stop pipeline: {}", err);
        }
    }
}

#[cfg(feature = "pipeline-gstreamer")]
fn sample_to_frame(sample: &gstreamer::Sample) -> Result<Frame> {
    let buffer = sample.buffer().context("capture sample missing buffer")?;
    let caps = sample.caps().context("capture sample missing caps")?;
    let info =
        gstreamer_video::VideoInfo::from_caps(caps).context("parse capture caps as video info")?;

    let format = match info.format() {
        gstreamer_video::VideoFormat::Bgr => DeviceFormat::Bgr24,
        gstreamer_video::VideoFormat::Rgb => DeviceFormat::Rgb24,
        gstreamer_video::VideoFormat::Gray8 => DeviceFormat::Gray8,
        other => {
            return Err(anyhow!(
                "capture pipeline delivers {:?}; convert to BGR, RGB or GRAY8 before the appsink",
                other
            ))
        }
    };

    let stride = usize::try_from(info.stride()[0])
        .map_err(|_| anyhow!("capture caps carry a negative row stride"))?;

    let map = buffer.map_readable().context("map capture buffer")?;
    normalize_strided_frame(map.as_slice(), info.width(), info.height(), stride, format)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
