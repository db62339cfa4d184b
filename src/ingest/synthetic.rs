//! Synthetic frame source for `stub://` addresses.
//!
//! Address form: `stub://<name>[?frames=N&width=W&height=H&format=F&stride=S]`
//!
//! - `frames`: stream ends after N frames (unbounded when absent)
//! - `width`/`height`: frame size (defaults to the requested capture mode)
//! - `format`: device layout to emulate (`rgb`, `bgr`, `gray`, `yuyv`, `nv12`)
//! - `stride`: bytes between row starts, for emulating padded driver buffers
//!
//! Frames are a moving gradient so consecutive frames differ. Emulated YUV
//! layouts go through the same normalization as real device buffers.

use anyhow::{anyhow, Result};

use super::normalize::{normalize_strided_frame, DeviceFormat};
use super::{FrameSource, SourceStats};
use crate::frame::Frame;

pub const STUB_SCHEME: &str = "stub://";

pub fn is_stub_address(address: &str) -> bool {
    address.starts_with(STUB_SCHEME)
}

/// Parameters parsed from a `stub://` address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct StubParams {
    pub frames: Option<u64>,
    pub width: u32,
    pub height: u32,
    pub format: DeviceFormat,
    /// Row pitch in bytes; `None` packs rows tightly.
    pub stride: Option<usize>,
}

impl StubParams {
    pub(crate) fn parse(
        address: &str,
        default_width: u32,
        default_height: u32,
        default_format: DeviceFormat,
    ) -> Result<Self> {
        let rest = address
            .strip_prefix(STUB_SCHEME)
            .ok_or_else(|| anyhow!("not a stub address: {}", address))?;

        let mut params = Self {
            frames: None,
            width: default_width,
            height: default_height,
            format: default_format,
            stride: None,
        };

        let Some((_, query)) = rest.split_once('?') else {
            return Ok(params);
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("stub parameter '{}' has no value", pair))?;
            match key {
                "frames" => params.frames = Some(parse_number(key, value)?),
                "width" => params.width = parse_number(key, value)?,
                "height" => params.height = parse_number(key, value)?,
                "format" => {
                    params.format = DeviceFormat::from_name(value)
                        .ok_or_else(|| anyhow!("unsupported stub format '{}'", value))?
                }
                "stride" => params.stride = Some(parse_number(key, value)?),
                other => return Err(anyhow!("unknown stub parameter '{}'", other)),
            }
        }

        if params.width == 0 || params.height == 0 {
            return Err(anyhow!(
                "stub frame size must be non-zero, got {}x{}",
                params.width,
                params.height
            ));
        }
        Ok(params)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow!("stub parameter '{}' must be a number, got '{}'", key, value))
}

/// Synthetic frame source.
pub struct SyntheticSource {
    address: String,
    params: StubParams,
    frame_count: u64,
}

impl SyntheticSource {
    pub(crate) fn new(address: &str, params: StubParams) -> Self {
        Self {
            address: address.to_string(),
            params,
            frame_count: 0,
        }
    }

    /// Synthetic sources are always "connected".
    pub(crate) fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{} {:?})",
            self.address,
            self.params.width,
            self.params.height,
            self.params.format
        );
        Ok(())
    }

    /// Fill a device buffer with a gradient that shifts every frame.
    fn generate_synthetic_pixels(&self) -> Result<Vec<u8>> {
        let StubParams {
            width,
            height,
            format,
            stride,
            ..
        } = self.params;
        let len = match stride {
            Some(stride) => {
                let rows = match format {
                    DeviceFormat::Nv12 => height as usize + (height as usize).div_ceil(2),
                    _ => height as usize,
                };
                stride
                    .checked_mul(rows)
                    .ok_or_else(|| anyhow!("stub stride {} overflows", stride))?
            }
            None => format.buffer_len(width, height)?,
        };
        let mut pixels = vec![0u8; len];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        Ok(pixels)
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.params.frames {
            if self.frame_count >= limit {
                return Ok(None);
            }
        }

        let pixels = self.generate_synthetic_pixels()?;
        self.frame_count += 1;

        normalize_strided_frame(
            &pixels,
            self.params.width,
            self.params.height,
            self.params.stride.unwrap_or(0),
            self.params.format,
        )
        .map(Some)
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            address: self.address.clone(),
            width: self.params.width,
            height: self.params.height,
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

    #[test]
    fn parses_defaults_and_overrides() -> Result<()> {
        let plain = StubParams::parse("stub://cam", 640, 480, DeviceFormat::Rgb24)?;
        assert_eq!(plain.frames, None);
        assert_eq!((plain.width, plain.height), (640, 480));

        let custom = StubParams::parse(
            "stub://cam?frames=3&width=32&height=16&format=yuyv",
            640,
            480,
            DeviceFormat::Rgb24,
        )?;
        assert_eq!(custom.frames, Some(3));
        assert_eq!((custom.width, custom.height), (32, 16));
        assert_eq!(custom.format, DeviceFormat::Yuyv);
        Ok(())
    }

    #[test]
    fn rejects_bad_parameters() {
        for address in [
            "stub://cam?frames=many",
            "stub://cam?colour=red",
            "stub://cam?width=0",
            "stub://cam?format=mjpeg",
            "stub://cam?frames",
        ] {
            assert!(
                StubParams::parse(address, 640, 480, DeviceFormat::Rgb24).is_err(),
                "{} should be rejected",
                address
            );
        }
    }

    #[test]
    fn stream_ends_after_frame_limit() -> Result<()> {
        let address = "stub://cam?frames=2&width=4&height=2";
        let params = StubParams::parse(address, 640, 480, DeviceFormat::Bgr24)?;
        let mut source = SyntheticSource::new(address, params);
        source.connect()?;

        let first = source.read_frame()?.expect("first frame");
        assert_eq!((first.width, first.height), (4, 2));
        assert_eq!(first.format, PixelFormat::Bgr24);
        let second = source.read_frame()?.expect("second frame");
        assert_ne!(first.pixels(), second.pixels());

        assert!(source.read_frame()?.is_none());
        assert!(source.read_frame()?.is_none());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn emulated_yuv_is_normalized_to_rgb() -> Result<()> {
        let address = "stub://cam?width=4&height=2&format=nv12";
        let params = StubParams::parse(address, 640, 480, DeviceFormat::Rgb24)?;
        let mut source = SyntheticSource::new(address, params);

        let frame = source.read_frame()?.expect("frame");
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert_eq!(frame.byte_len(), 4 * 2 * 3);
        Ok(())
    }

    #[test]
    fn odd_sized_nv12_frames_read_cleanly() -> Result<()> {
        for address in [
            "stub://cam?frames=1&width=3&height=2&format=nv12",
            "stub://cam?frames=1&width=2&height=3&format=nv12",
        ] {
            let params = StubParams::parse(address, 640, 480, DeviceFormat::Rgb24)?;
            let mut source = SyntheticSource::new(address, params);
            let frame = source.read_frame()?.expect("frame");
            assert_eq!(frame.byte_len(), 6 * 3);
            assert!(source.read_frame()?.is_none());
        }
        Ok(())
    }

    #[test]
    fn padded_rows_are_packed() -> Result<()> {
        let address = "stub://cam?width=2&height=2&format=rgb&stride=8";
        let params = StubParams::parse(address, 640, 480, DeviceFormat::Rgb24)?;
        assert_eq!(params.stride, Some(8));
        let mut source = SyntheticSource::new(address, params);

        // Gradient bytes 0..16; rows start at 0 and 8.
        let frame = source.read_frame()?.expect("frame");
        assert_eq!(frame.pixels(), &[0, 1, 2, 3, 4, 5, 8, 9, 10, 11, 12, 13]);
        Ok(())
    }
}
