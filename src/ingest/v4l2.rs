//! Direct-device capture through V4L2.
//!
//! This module provides `V4l2Source` for the `DirectDevice` backend:
//! - Opening a local device node (e.g. /dev/video0)
//! - Issuing advisory width/height/frame-rate requests
//! - Recording the mode the driver actually chose
//! - Normalizing device buffers (RGB3, BGR3, GREY, YUYV, NV12) into `Frame`s
//!
//! The driver is free to substitute its nearest supported mode. Nothing
//! downstream assumes the request was honored.

use anyhow::Result;
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(not(feature = "ingest-v4l2"))]
use anyhow::bail;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;

#[cfg(feature = "ingest-v4l2")]
use super::normalize::normalize_strided_frame;
use super::normalize::DeviceFormat;
use super::synthetic::{is_stub_address, StubParams, SyntheticSource};
use super::{CaptureConfig, FrameSource, SourceStats};
use crate::frame::Frame;

/// V4L2 frame source.
///
/// Uses libv4l for real devices, with a synthetic fallback for `stub://` paths.
pub struct V4l2Source {
    backend: V4l2Backend,
}

enum V4l2Backend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceV4l2Source),
}

impl V4l2Source {
    pub fn new(config: CaptureConfig) -> Result<Self> {
        if is_stub_address(&config.device) {
            let params = StubParams::parse(
                &config.device,
                config.width,
                config.height,
                DeviceFormat::Rgb24,
            )?;
            Ok(Self {
                backend: V4l2Backend::Synthetic(SyntheticSource::new(&config.device, params)),
            })
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Self {
                    backend: V4l2Backend::Device(DeviceV4l2Source::new(config)),
                })
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                bail!(
                    "opening {} requires the ingest-v4l2 feature",
                    config.device
                )
            }
        }
    }

    /// Open the device and negotiate a capture mode.
    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.connect(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.connect(),
        }
    }
}

impl FrameSource for V4l2Source {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.read_frame(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.read_frame(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.stats(),
        }
    }
}

// ----------------------------------------------------------------------------
// Production V4L2 source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
const STREAM_BUFFERS: u32 = 4;

#[cfg(feature = "ingest-v4l2")]
struct DeviceV4l2Source {
    config: CaptureConfig,
    state: Option<DeviceV4l2State>,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
    active_format: DeviceFormat,
    /// Bytes per line reported by the driver.
    active_stride: usize,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceV4l2Source {
    fn new(config: CaptureConfig) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            active_format: DeviceFormat::Rgb24,
            active_stride: 0,
            config,
            state: None,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        // Mode requests are advisory: keep whatever the driver settles on.
        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };

        if self.config.fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_format = DeviceFormat::from_fourcc(&format.fourcc.repr).with_context(|| {
            format!(
                "v4l2 device {} delivers unsupported pixel format {}",
                self.config.device, format.fourcc
            )
        })?;
        self.active_width = format.width;
        self.active_height = format.height;
        self.active_stride = format.stride as usize;

        if (self.active_width, self.active_height) != (self.config.width, self.config.height) {
            log::info!(
                "V4l2Source: requested {}x{}, device chose {}x{}",
                self.config.width,
                self.config.height,
                self.active_width,
                self.active_height
            );
        }

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: connected to {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.active_format
        );
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Option<Frame>> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not connected")?;
        let (width, height, format, stride) = (
            self.active_width,
            self.active_height,
            self.active_format,
            self.active_stride,
        );

        let frame = state.with_mut(|fields| -> Result<Option<Frame>> {
            let (buf, meta) = fields.stream.next().context("capture v4l2 frame")?;
            let used = match meta.bytesused as usize {
                0 => buf.len(),
                n => n.min(buf.len()),
            };
            if used == 0 {
                return Ok(None);
            }
            normalize_strided_frame(&buf[..used], width, height, stride, format).map(Some)
        })?;

        if frame.is_some() {
            self.frame_count += 1;
        }
        Ok(frame)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            address: self.config.device.clone(),
            width: self.active_width,
            height: self.active_height,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::ingest::CaptureBackend;

    fn stub_config(device: &str) -> CaptureConfig {
        CaptureConfig {
            backend: CaptureBackend::DirectDevice,
            device: device.to_string(),
            width: 640,
            height: 480,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn v4l2_source_produces_frames_at_requested_mode() -> Result<()> {
        let mut source = V4l2Source::new(stub_config("stub://test"))?;
        source.connect()?;

        let frame = source.read_frame()?.expect("frame");
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.format, PixelFormat::Rgb24);

        Ok(())
    }

    #[test]
    fn v4l2_stub_reports_end_of_stream() -> Result<()> {
        let mut source = V4l2Source::new(stub_config("stub://test?frames=1&width=8&height=8"))?;
        source.connect()?;

        assert!(source.read_frame()?.is_some());
        assert!(source.read_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 1);

        Ok(())
    }

    #[cfg(not(feature = "ingest-v4l2"))]
    #[test]
    fn real_device_requires_feature() {
        let err = V4l2Source::new(stub_config("/dev/video0"))
            .err()
            .expect("device open must fail without the feature");
        assert!(err.to_string().contains("ingest-v4l2"));
    }
}
