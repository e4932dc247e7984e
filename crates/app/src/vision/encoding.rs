//! Pixel plumbing between capture, overlay, and the two JPEG consumers.
//!
//! Display frames are encoded at stream quality for viewers; classification
//! frames are downscaled, optionally contrast-enhanced for haze, and encoded at
//! the classifier's quality.

use anyhow::{Result, anyhow};
use image::{
    ImageBuffer, Rgb, RgbImage,
    codecs::jpeg::JpegEncoder,
    imageops::{self, FilterType},
};
use video_ingest::{CaptureError, Frame, FrameFormat};

/// CLAHE-style clip limit, as a multiple of the mean histogram bin.
const CLIP_LIMIT: f32 = 3.0;
const SHARPEN_KERNEL: [f32; 9] = [0.0, -0.5, 0.0, -0.5, 3.0, -0.5, 0.0, -0.5, 0.0];
const ENHANCED_WEIGHT: f32 = 0.7;

/// Convert a captured frame into an owned RGB image.
pub(crate) fn frame_to_rgb(frame: Frame) -> Result<RgbImage> {
    let expected = frame.expected_len();
    if frame.data.len() != expected {
        return Err(CaptureError::ShortFrame {
            got: frame.data.len(),
            expected,
        }
        .into());
    }
    let data = match frame.format {
        FrameFormat::Rgb8 => frame.data,
        FrameFormat::Bgr8 => bgr_to_rgb(frame.data),
    };
    ImageBuffer::from_vec(frame.width, frame.height, data)
        .ok_or_else(|| anyhow!("failed to convert frame into image buffer"))
}

fn bgr_to_rgb(mut data: Vec<u8>) -> Vec<u8> {
    for chunk in data.chunks_exact_mut(3) {
        chunk.swap(0, 2);
    }
    data
}

/// Resize to `size`, or clone when the image already matches (or size is 0×0).
pub(crate) fn resize_to(image: &RgbImage, size: (u32, u32)) -> RgbImage {
    let (width, height) = size;
    if width == 0 || height == 0 || image.dimensions() == size {
        return image.clone();
    }
    imageops::resize(image, width, height, FilterType::Triangle)
}

pub(crate) fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(image.len() / 8);
    JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode failed: {err}"))?;
    Ok(buffer)
}

/// Boost local contrast and edges so faint haze survives JPEG compression.
pub(crate) fn enhance_for_smoke(image: &RgbImage) -> RgbImage {
    let equalized = equalize_luma(image);
    let sharpened: RgbImage = imageops::filter3x3(&equalized, &SHARPEN_KERNEL);

    let mut out = image.clone();
    for (dst, src) in out.pixels_mut().zip(sharpened.pixels()) {
        for channel in 0..3 {
            let blended = ENHANCED_WEIGHT * src[channel] as f32
                + (1.0 - ENHANCED_WEIGHT) * dst[channel] as f32;
            dst[channel] = blended.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32) / 1000) as u8
}

/// Contrast-limited histogram equalization applied to luminance only.
fn equalize_luma(image: &RgbImage) -> RgbImage {
    let pixel_count = (image.width() as usize) * (image.height() as usize);
    if pixel_count == 0 {
        return image.clone();
    }

    let mut histogram = [0u32; 256];
    for pixel in image.pixels() {
        histogram[luma(pixel) as usize] += 1;
    }

    let limit = ((pixel_count as f32 / 256.0) * CLIP_LIMIT).ceil().max(1.0) as u32;
    let mut excess = 0u32;
    for bin in histogram.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let share = excess / 256;
    let remainder = (excess % 256) as usize;
    for (i, bin) in histogram.iter_mut().enumerate() {
        *bin += share + u32::from(i < remainder);
    }

    let mut lut = [0u8; 256];
    let mut cumulative = 0u64;
    for (value, bin) in histogram.iter().enumerate() {
        cumulative += *bin as u64;
        lut[value] = ((cumulative * 255) / pixel_count as u64).min(255) as u8;
    }

    let mut out = image.clone();
    for pixel in out.pixels_mut() {
        let y = luma(pixel) as i32;
        let delta = lut[y as usize] as i32 - y;
        for channel in pixel.0.iter_mut() {
            *channel = (*channel as i32 + delta).clamp(0, 255) as u8;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32, lo: u8, hi: u8) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, _| {
            let span = (hi - lo) as u32;
            let v = lo + (x * span / width.max(1)) as u8;
            Rgb([v, v, v])
        })
    }

    #[test]
    fn bgr_frames_are_swizzled() {
        let frame = Frame {
            data: vec![10, 20, 30, 40, 50, 60],
            width: 2,
            height: 1,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        };
        let rgb = frame_to_rgb(frame).unwrap();
        assert_eq!(rgb.get_pixel(0, 0).0, [30, 20, 10]);
        assert_eq!(rgb.get_pixel(1, 0).0, [60, 50, 40]);
    }

    #[test]
    fn short_frames_are_rejected() {
        let frame = Frame {
            data: vec![0; 5],
            width: 2,
            height: 1,
            timestamp_ms: 0,
            format: FrameFormat::Rgb8,
        };
        let err = frame_to_rgb(frame).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CaptureError>(),
            Some(CaptureError::ShortFrame {
                got: 5,
                expected: 6
            })
        ));
    }

    #[test]
    fn resize_honours_native_passthrough() {
        let image = gradient(64, 36, 0, 255);
        assert_eq!(resize_to(&image, (0, 0)).dimensions(), (64, 36));
        assert_eq!(resize_to(&image, (32, 18)).dimensions(), (32, 18));
    }

    #[test]
    fn jpeg_output_has_soi_marker() {
        let jpeg = encode_jpeg(&gradient(16, 16, 0, 200), 60).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn enhancement_widens_low_contrast_range() {
        let flat = gradient(128, 8, 100, 140);
        let enhanced = enhance_for_smoke(&flat);
        assert_eq!(enhanced.dimensions(), flat.dimensions());

        let range = |img: &RgbImage| {
            let values: Vec<u8> = img.pixels().map(|p| p.0[0]).collect();
            values.iter().max().unwrap() - values.iter().min().unwrap()
        };
        assert!(range(&enhanced) > range(&flat));
    }
}
