//! Image preparation: decoding, long-edge bounding and last-resort upscaling.
//!
//! Every operation returns a new [`PixelBuffer`]; buffers are never mutated
//! after creation, so pipeline phases can hold independent handles.

use image::imageops::FilterType;
use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageReader, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use thiserror::Error;

/// Largest factor [`upscale`] applies; larger requests are clamped.
pub const MAX_UPSCALE_FACTOR: f32 = 4.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty file")]
    EmptyInput,
    #[error("invalid image")]
    InvalidImage,
}

/// A decoded RGB image. Cloning shares the underlying pixels.
#[derive(Clone)]
pub struct PixelBuffer {
    image: Arc<RgbImage>,
}

impl PixelBuffer {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }

    /// A buffer filled with a single colour.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        Self::from_rgb(RgbImage::from_pixel(width, height, image::Rgb(rgb)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn long_edge(&self) -> u32 {
        self.width().max(self.height())
    }

    pub fn as_rgb(&self) -> &RgbImage {
        &self.image
    }

    /// True when both handles point at the same pixel allocation.
    pub fn shares_pixels_with(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Decode raw upload bytes (any format the `image` crate recognises) into RGB.
///
/// The EXIF orientation tag, when present, is applied so the buffer is in
/// display orientation.
pub fn decode(bytes: &[u8]) -> Result<PixelBuffer, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::EmptyInput);
    }

    let invalid = |e: &dyn std::fmt::Display| {
        tracing::debug!(error = %e, len = bytes.len(), "image decode failed");
        DecodeError::InvalidImage
    };

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| invalid(&e))?
        .into_decoder()
        .map_err(|e| invalid(&e))?;
    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut decoded = DynamicImage::from_decoder(decoder).map_err(|e| invalid(&e))?;
    decoded.apply_orientation(orientation);

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(DecodeError::InvalidImage);
    }

    if !matches!(orientation, Orientation::NoTransforms) {
        tracing::debug!(?orientation, width = decoded.width(), height = decoded.height(), "applied EXIF orientation");
    }

    Ok(PixelBuffer::from_rgb(decoded.to_rgb8()))
}

/// Shrink `buffer` so its longer edge equals `max_edge`, preserving aspect ratio.
///
/// Uses area averaging. Buffers already within bounds are returned as-is.
pub fn bound_long_edge(buffer: &PixelBuffer, max_edge: u32) -> PixelBuffer {
    let (w, h) = buffer.dimensions();
    let long = w.max(h);
    if max_edge == 0 || long <= max_edge {
        return buffer.clone();
    }

    let scale = max_edge as f64 / long as f64;
    let (new_w, new_h) = if w >= h {
        (max_edge, ((h as f64 * scale).round() as u32).max(1))
    } else {
        (((w as f64 * scale).round() as u32).max(1), max_edge)
    };

    tracing::debug!(from_w = w, from_h = h, to_w = new_w, to_h = new_h, "bounding long edge");
    PixelBuffer::from_rgb(area_resize(buffer.as_rgb(), new_w, new_h))
}

/// Enlarge `buffer` by `factor` with cubic resampling. `factor <= 1.0` is a no-op
/// and factors above [`MAX_UPSCALE_FACTOR`] are clamped to it.
pub fn upscale(buffer: &PixelBuffer, factor: f32) -> PixelBuffer {
    if !factor.is_finite() || factor <= 1.0 {
        return buffer.clone();
    }
    let factor = factor.min(MAX_UPSCALE_FACTOR);

    let (w, h) = buffer.dimensions();
    let new_w = ((w as f64 * factor as f64).round() as u32).max(1);
    let new_h = ((h as f64 * factor as f64).round() as u32).max(1);

    tracing::debug!(from_w = w, from_h = h, to_w = new_w, to_h = new_h, factor, "upscaling");
    PixelBuffer::from_rgb(image::imageops::resize(
        buffer.as_rgb(),
        new_w,
        new_h,
        FilterType::CatmullRom,
    ))
}

/// Per-destination-index source taps `(index, weight)` for area resampling.
///
/// Each destination cell covers `src_len / dst_len` source cells; partially
/// covered cells contribute in proportion to the overlap. Weights sum to 1.
fn area_taps(src_len: u32, dst_len: u32) -> Vec<Vec<(usize, f32)>> {
    let scale = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * scale;
            let end = ((d + 1) as f64 * scale).min(src_len as f64);
            let span = end - start;
            let mut taps = Vec::new();
            let mut s = start.floor() as usize;
            while (s as f64) < end && s < src_len as usize {
                let lo = start.max(s as f64);
                let hi = end.min((s + 1) as f64);
                let w = hi - lo;
                if w > 0.0 {
                    taps.push((s, (w / span) as f32));
                }
                s += 1;
            }
            taps
        })
        .collect()
}

/// Separable area-averaging resize (horizontal pass, then vertical).
fn area_resize(src: &RgbImage, new_w: u32, new_h: u32) -> RgbImage {
    let (src_w, src_h) = src.dimensions();
    let x_taps = area_taps(src_w, new_w);
    let y_taps = area_taps(src_h, new_h);
    let raw = src.as_raw();

    // Horizontal pass: src_h rows of new_w pixels.
    let row_stride = new_w as usize * 3;
    let mut horizontal = vec![0.0f32; row_stride * src_h as usize];
    for y in 0..src_h as usize {
        let src_row = &raw[y * src_w as usize * 3..(y + 1) * src_w as usize * 3];
        let dst_row = &mut horizontal[y * row_stride..(y + 1) * row_stride];
        for (x, taps) in x_taps.iter().enumerate() {
            for &(sx, weight) in taps {
                for c in 0..3 {
                    dst_row[x * 3 + c] += src_row[sx * 3 + c] as f32 * weight;
                }
            }
        }
    }

    // Vertical pass.
    let mut out = vec![0u8; row_stride * new_h as usize];
    for (y, taps) in y_taps.iter().enumerate() {
        let dst_row = &mut out[y * row_stride..(y + 1) * row_stride];
        for i in 0..row_stride {
            let mut acc = 0.0f32;
            for &(sy, weight) in taps {
                acc += horizontal[sy * row_stride + i] * weight;
            }
            dst_row[i] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    // The buffer length always matches new_w * new_h * 3.
    RgbImage::from_raw(new_w, new_h, out).unwrap_or_else(|| RgbImage::new(new_w, new_h))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([200, 120, 40]));
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_empty_input() {
        assert_eq!(decode(&[]).unwrap_err(), DecodeError::EmptyInput);
    }

    #[test]
    fn test_decode_garbage_is_invalid_image() {
        for bytes in [&b"not an image"[..], &[0u8; 64][..], &[0xFF, 0xD8, 0xFF][..]] {
            assert_eq!(decode(bytes).unwrap_err(), DecodeError::InvalidImage);
        }
    }

    #[test]
    fn test_decode_png() {
        let buffer = decode(&png_bytes(37, 21)).unwrap();
        assert_eq!(buffer.dimensions(), (37, 21));
        assert_eq!(buffer.as_rgb().get_pixel(0, 0), &Rgb([200, 120, 40]));
    }

    /// A JPEG of `width` × `height`, red on the left half and blue on the
    /// right, carrying an EXIF APP1 segment with the given orientation tag.
    fn jpeg_with_orientation(width: u32, height: u32, orientation: u16) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let mut jpeg = Cursor::new(Vec::new());
        img.write_to(&mut jpeg, ImageFormat::Jpeg).unwrap();
        let jpeg = jpeg.into_inner();

        // Big-endian TIFF header, one IFD entry: tag 0x0112 (Orientation), SHORT, count 1.
        let mut exif = b"Exif\0\0MM\0\x2a\0\0\0\x08\0\x01\x01\x12\0\x03\0\0\0\x01".to_vec();
        exif.extend_from_slice(&orientation.to_be_bytes());
        exif.extend_from_slice(&[0, 0, 0, 0, 0, 0]);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&[0xFF, 0xE1]);
        out.extend_from_slice(&((exif.len() + 2) as u16).to_be_bytes());
        out.extend_from_slice(&exif);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_decode_applies_exif_rotation() {
        // Orientation 6: stored image must be rotated 90° clockwise for display.
        let buffer = decode(&jpeg_with_orientation(40, 20, 6)).unwrap();
        assert_eq!(buffer.dimensions(), (20, 40));

        // The stored left (red) half ends up on top.
        let top = buffer.as_rgb().get_pixel(10, 5);
        let bottom = buffer.as_rgb().get_pixel(10, 34);
        assert!(top.0[0] > 200 && top.0[2] < 60, "top = {top:?}");
        assert!(bottom.0[2] > 200 && bottom.0[0] < 60, "bottom = {bottom:?}");
    }

    #[test]
    fn test_decode_upright_exif_keeps_dimensions() {
        let buffer = decode(&jpeg_with_orientation(40, 20, 1)).unwrap();
        assert_eq!(buffer.dimensions(), (40, 20));
    }

    #[test]
    fn test_bound_long_edge_within_limit_is_unchanged() {
        let buffer = PixelBuffer::solid(800, 600, [1, 2, 3]);
        let bounded = bound_long_edge(&buffer, 800);
        assert_eq!(bounded.dimensions(), (800, 600));
        assert!(bounded.shares_pixels_with(&buffer));
    }

    #[test]
    fn test_bound_long_edge_landscape() {
        let buffer = PixelBuffer::solid(4000, 3000, [10, 20, 30]);
        let bounded = bound_long_edge(&buffer, 2200);
        assert_eq!(bounded.dimensions(), (2200, 1650));
        assert!(!bounded.shares_pixels_with(&buffer));
    }

    #[test]
    fn test_bound_long_edge_portrait_preserves_aspect() {
        let buffer = PixelBuffer::solid(1234, 3457, [0, 0, 0]);
        let bounded = bound_long_edge(&buffer, 1000);
        assert_eq!(bounded.height(), 1000);
        let expected_w = 1234.0 * 1000.0 / 3457.0;
        assert!((bounded.width() as f64 - expected_w).abs() <= 1.0);
    }

    #[test]
    fn test_area_resize_keeps_uniform_colour() {
        let buffer = PixelBuffer::solid(301, 157, [90, 180, 33]);
        let bounded = bound_long_edge(&buffer, 100);
        assert!(bounded.as_rgb().pixels().all(|p| *p == Rgb([90, 180, 33])));
    }

    #[test]
    fn test_area_resize_averages_blocks() {
        // 4x1 [0, 0, 255, 255] halved -> [0, 255]
        let mut img = RgbImage::new(4, 1);
        img.put_pixel(2, 0, Rgb([255, 255, 255]));
        img.put_pixel(3, 0, Rgb([255, 255, 255]));
        let out = area_resize(&img, 2, 1);
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([255, 255, 255]));

        // 3x1 [0, 255, 0] to 2x1: each output covers 1.5 source pixels.
        let mut img = RgbImage::new(3, 1);
        img.put_pixel(1, 0, Rgb([255, 255, 255]));
        let out = area_resize(&img, 2, 1);
        assert_eq!(out.get_pixel(0, 0), &Rgb([85, 85, 85]));
        assert_eq!(out.get_pixel(1, 0), &Rgb([85, 85, 85]));
    }

    #[test]
    fn test_area_taps_weights_sum_to_one() {
        for (src, dst) in [(3200u32, 2200u32), (17, 5), (1000, 999)] {
            for taps in area_taps(src, dst) {
                let sum: f32 = taps.iter().map(|(_, w)| w).sum();
                assert!((sum - 1.0).abs() < 1e-4, "{src}->{dst}: {sum}");
            }
        }
    }

    #[test]
    fn test_upscale_noop_at_or_below_one() {
        let buffer = PixelBuffer::solid(100, 50, [5, 5, 5]);
        for factor in [1.0, 0.5, 0.0, -2.0, f32::NAN] {
            let out = upscale(&buffer, factor);
            assert_eq!(out.dimensions(), (100, 50));
            assert!(out.shares_pixels_with(&buffer));
        }
    }

    #[test]
    fn test_upscale_rounds_dimensions() {
        let buffer = PixelBuffer::solid(100, 75, [5, 5, 5]);
        let out = upscale(&buffer, 1.35);
        assert_eq!(out.dimensions(), (135, 101));

        let tiny = PixelBuffer::solid(1, 1, [5, 5, 5]);
        assert_eq!(upscale(&tiny, 1.2).dimensions(), (1, 1));
    }

    #[test]
    fn test_upscale_clamps_huge_factor() {
        let buffer = PixelBuffer::solid(320, 240, [5, 5, 5]);
        let out = upscale(&buffer, 100_000.0);
        assert_eq!(out.dimensions(), (1280, 960));
    }
}
