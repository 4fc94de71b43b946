use anyhow::{anyhow, bail, Result};
use image::{codecs::jpeg::JpegEncoder, DynamicImage, ExtendedColorType, ImageEncoder, RgbaImage};

use super::RawFrame;

const BYTES_PER_PIXEL: usize = 4;

/// Copies the visible part of `frame` into a tightly packed image, dropping
/// any row padding the frame reader added.
pub fn frame_to_image(frame: &RawFrame) -> Result<RgbaImage> {
    if frame.width == 0 || frame.height == 0 {
        bail!("empty frame ({}x{})", frame.width, frame.height);
    }

    let row_bytes = frame.width as usize * BYTES_PER_PIXEL;
    if frame.row_stride < row_bytes {
        bail!(
            "row stride {} shorter than row width {} bytes",
            frame.row_stride,
            row_bytes
        );
    }

    let needed = frame.row_stride * (frame.height as usize - 1) + row_bytes;
    if frame.data.len() < needed {
        bail!(
            "frame buffer holds {} bytes, {}x{} needs {}",
            frame.data.len(),
            frame.width,
            frame.height,
            needed
        );
    }

    let pixels = if frame.row_stride == row_bytes {
        frame.data[..row_bytes * frame.height as usize].to_vec()
    } else {
        let mut packed = Vec::with_capacity(row_bytes * frame.height as usize);
        for row in frame.data.chunks(frame.row_stride).take(frame.height as usize) {
            packed.extend_from_slice(&row[..row_bytes]);
        }
        packed
    };

    RgbaImage::from_raw(frame.width, frame.height, pixels)
        .ok_or_else(|| anyhow!("pixel buffer does not match frame dimensions"))
}

/// Encodes a frame as JPEG. Lossy on purpose: the result goes over the network.
pub fn encode_jpeg(frame: &RawFrame, quality: u8) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgba8(frame_to_image(frame)?).to_rgb8();

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, quality.clamp(1, 100)).write_image(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        ExtendedColorType::Rgb8,
    )?;
    Ok(bytes)
}
