use anyhow::{anyhow, Context, Result};

use crate::frame::{expected_len, Frame, PixelFormat};

/// Pixel layouts a capture backend may hand us.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeviceFormat {
    Gray8,
    Rgb24,
    Bgr24,
    Yuyv,
    Nv12,
}

impl DeviceFormat {
    #[cfg(feature = "ingest-v4l2")]
    pub(crate) fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"GREY" => Some(DeviceFormat::Gray8),
            b"RGB3" => Some(DeviceFormat::Rgb24),
            b"BGR3" => Some(DeviceFormat::Bgr24),
            b"YUYV" => Some(DeviceFormat::Yuyv),
            b"NV12" => Some(DeviceFormat::Nv12),
            _ => None,
        }
    }

    /// Parse the short names accepted in `stub://` addresses and GStreamer caps.
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "gray" | "gray8" | "grey" => Some(DeviceFormat::Gray8),
            "rgb" => Some(DeviceFormat::Rgb24),
            "bgr" => Some(DeviceFormat::Bgr24),
            "yuyv" | "yuy2" => Some(DeviceFormat::Yuyv),
            "nv12" => Some(DeviceFormat::Nv12),
            _ => None,
        }
    }

    pub(crate) fn buffer_len(self, width: u32, height: u32) -> Result<usize> {
        let plane = (width as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| anyhow!("frame dimensions overflow: {}x{}", width, height))?;
        let len = match self {
            DeviceFormat::Gray8 => Some(plane),
            DeviceFormat::Rgb24 | DeviceFormat::Bgr24 => plane.checked_mul(3),
            DeviceFormat::Yuyv => plane.checked_mul(2),
            DeviceFormat::Nv12 => nv12_chroma_row(width)
                .checked_mul(nv12_chroma_rows(height))
                .and_then(|chroma| plane.checked_add(chroma)),
        };
        len.ok_or_else(|| anyhow!("frame dimensions overflow: {}x{}", width, height))
    }

    /// Image bytes in one row of the first plane.
    fn row_bytes(self, width: u32) -> Option<usize> {
        let width = width as usize;
        match self {
            DeviceFormat::Gray8 | DeviceFormat::Nv12 => Some(width),
            DeviceFormat::Rgb24 | DeviceFormat::Bgr24 => width.checked_mul(3),
            DeviceFormat::Yuyv => width.checked_mul(2),
        }
    }
}

// NV12 chroma is subsampled 2x2 and interleaved (U V), rounding odd sizes up.
fn nv12_chroma_row(width: u32) -> usize {
    (width as usize).div_ceil(2) * 2
}

fn nv12_chroma_rows(height: u32) -> usize {
    (height as usize).div_ceil(2)
}

/// Like `normalize_frame`, for buffers whose rows are `stride` bytes apart.
///
/// A stride of 0 or exactly one row means the buffer is tightly packed. For
/// NV12 the chroma plane starts `stride * height` bytes in and uses the same
/// stride.
pub(crate) fn normalize_strided_frame(
    pixels: &[u8],
    width: u32,
    height: u32,
    stride: usize,
    format: DeviceFormat,
) -> Result<Frame> {
    let row = format
        .row_bytes(width)
        .ok_or_else(|| anyhow!("frame dimensions overflow: {}x{}", width, height))?;
    if stride == 0 || stride == row {
        return normalize_frame(pixels, width, height, format);
    }
    if stride < row {
        return Err(anyhow!(
            "{:?} row stride {} is shorter than a {}-byte row",
            format,
            stride,
            row
        ));
    }

    let h = height as usize;
    let mut planes = vec![(0usize, h, row)];
    if format == DeviceFormat::Nv12 {
        // stride > width here, so the rounded-up chroma row always fits.
        let offset = stride
            .checked_mul(h)
            .ok_or_else(|| anyhow!("frame dimensions overflow: {}x{}", width, height))?;
        planes.push((offset, nv12_chroma_rows(height), nv12_chroma_row(width)));
    }

    let mut packed = Vec::with_capacity(format.buffer_len(width, height)?);
    for (offset, rows, row_len) in planes {
        for r in 0..rows {
            let start = offset + r * stride;
            let bytes = pixels.get(start..start + row_len).with_context(|| {
                format!(
                    "{:?} buffer of {} bytes ends inside row {} (stride {})",
                    format,
                    pixels.len(),
                    r,
                    stride
                )
            })?;
            packed.extend_from_slice(bytes);
        }
    }

    normalize_frame(&packed, width, height, format)
}

/// Turn a device buffer into a `Frame` in a format the preprocessor handles.
///
/// Packed gray/RGB/BGR pass through; YUV layouts are converted to RGB.
pub(crate) fn normalize_frame(
    pixels: &[u8],
    width: u32,
    height: u32,
    format: DeviceFormat,
) -> Result<Frame> {
    let expected = format.buffer_len(width, height)?;
    if pixels.len() < expected {
        return Err(anyhow!(
            "{:?} frame length mismatch: expected {}, got {}",
            format,
            expected,
            pixels.len()
        ));
    }
    // Drivers may pad the tail of a buffer; only the image bytes matter.
    let pixels = &pixels[..expected];

    match format {
        DeviceFormat::Gray8 => Frame::new(pixels.to_vec(), width, height, PixelFormat::Gray8),
        DeviceFormat::Rgb24 => Frame::new(pixels.to_vec(), width, height, PixelFormat::Rgb24),
        DeviceFormat::Bgr24 => Frame::new(pixels.to_vec(), width, height, PixelFormat::Bgr24),
        DeviceFormat::Yuyv => {
            Frame::new(yuyv_to_rgb(pixels, width, height)?, width, height, PixelFormat::Rgb24)
        }
        DeviceFormat::Nv12 => {
            Frame::new(nv12_to_rgb(pixels, width, height)?, width, height, PixelFormat::Rgb24)
        }
    }
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;
    let chroma_row = nv12_chroma_row(width);

    let mut rgb = vec![0u8; expected_len(width, height, PixelFormat::Rgb24)?];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * chroma_row + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let offset = (j * w + i) * 3;
            write_rgb(&mut rgb[offset..offset + 3], y, u, v);
        }
    }

    Ok(rgb)
}

fn yuyv_to_rgb(pixels: &[u8], width: u32, height: u32) -> Result<Vec<u8>> {
    if width % 2 != 0 {
        return Err(anyhow!("YUYV frame width must be even, got {}", width));
    }

    let mut rgb = vec![0u8; expected_len(width, height, PixelFormat::Rgb24)?];
    // Each 4-byte macropixel (Y0 U Y1 V) covers two horizontal pixels.
    for (macro_px, out) in pixels.chunks_exact(4).zip(rgb.chunks_exact_mut(6)) {
        let u = macro_px[1] as f32 - 128.0;
        let v = macro_px[3] as f32 - 128.0;
        write_rgb(&mut out[0..3], macro_px[0] as f32, u, v);
        write_rgb(&mut out[3..6], macro_px[2] as f32, u, v);
    }

    Ok(rgb)
}

fn write_rgb(out: &mut [u8], y: f32, u: f32, v: f32) {
    let r = y + 1.402_f32 * v;
    let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
    let b = y + 1.772_f32 * u;

    out[0] = clamp_to_u8(r);
    out[1] = clamp_to_u8(g);
    out[2] = clamp_to_u8(b);
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
