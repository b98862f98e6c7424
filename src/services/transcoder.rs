//! Thumbnail transcoding.
//!
//! Decodes JPEG, PNG, GIF (first frame) and WebP sources, scales them down to a
//! target width with nearest-neighbor sampling and re-encodes the result. PNG
//! sources stay PNG so transparency survives; everything else becomes JPEG.
//! Sources already narrower than the target are never upscaled.

use bytes::Bytes;
use image::{
    ColorType, DynamicImage, ImageBuffer, ImageEncoder, ImageFormat, RgbaImage,
    codecs::{jpeg::JpegEncoder, png::PngEncoder},
    guess_format, load_from_memory_with_format,
};
use thiserror::Error;

use crate::models::size_spec::ThumbnailWidth;

/// Largest source the transcoder will attempt to decode.
pub const MAX_DECODE_BYTES: u64 = 32 * 1024 * 1024;
pub const JPEG_QUALITY: u8 = 75;

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("source is {size} bytes, above the {max} byte decode limit")]
    TooLarge { size: u64, max: u64 },
    #[error("failed to decode source image: {0}")]
    Decode(String),
    #[error("failed to encode thumbnail: {0}")]
    Encode(String),
    #[error("transcode task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcoded {
    /// The source is no wider than the target; serve it as is.
    Unchanged,
    Resized {
        data: Bytes,
        content_type: &'static str,
        width: u32,
        height: u32,
    },
}

/// Resize `source` to `target` width, preserving the aspect ratio.
pub fn transcode(source: &[u8], target: ThumbnailWidth) -> Result<Transcoded, TranscodeError> {
    if source.len() as u64 > MAX_DECODE_BYTES {
        return Err(TranscodeError::TooLarge {
            size: source.len() as u64,
            max: MAX_DECODE_BYTES,
        });
    }

    let format = guess_format(source).map_err(|err| TranscodeError::Decode(err.to_string()))?;
    let image = load_from_memory_with_format(source, format)
        .map_err(|err| TranscodeError::Decode(err.to_string()))?;

    let (src_width, src_height) = (image.width(), image.height());
    if src_width == 0 || src_height == 0 {
        return Err(TranscodeError::Decode("image has no pixels".into()));
    }
    let dst_width = target.get();
    if src_width <= dst_width {
        return Ok(Transcoded::Unchanged);
    }
    let dst_height = scaled_height(src_width, src_height, dst_width);
    let resized = resize_nearest(&image, dst_width, dst_height);

    let (data, content_type) = if format == ImageFormat::Png {
        (encode_png(&resized)?, "image/png")
    } else {
        (encode_jpeg(resized)?, "image/jpeg")
    };

    Ok(Transcoded::Resized {
        data: Bytes::from(data),
        content_type,
        width: dst_width,
        height: dst_height,
    })
}

/// Run [`transcode`] on the blocking thread pool.
pub async fn transcode_blocking(
    source: Bytes,
    target: ThumbnailWidth,
) -> Result<Transcoded, TranscodeError> {
    tokio::task::spawn_blocking(move || transcode(&source, target))
        .await
        .map_err(|err| TranscodeError::Task(err.to_string()))?
}

/// `max(1, round(src_height * dst_width / src_width))`, in integer arithmetic.
pub fn scaled_height(src_width: u32, src_height: u32, dst_width: u32) -> u32 {
    let (w, h, dw) = (src_width as u64, src_height as u64, dst_width as u64);
    let rounded = (2 * h * dw + w) / (2 * w);
    rounded.clamp(1, u32::MAX as u64) as u32
}

/// Nearest-neighbor resample: destination `(x, y)` takes the source pixel at
/// `(floor(x * sw / dw), floor(y * sh / dh))`.
fn resize_nearest(image: &DynamicImage, dst_width: u32, dst_height: u32) -> RgbaImage {
    let src = image.to_rgba8();
    let (sw, sh) = (src.width() as u64, src.height() as u64);
    ImageBuffer::from_fn(dst_width, dst_height, |x, y| {
        let sx = (x as u64 * sw / dst_width as u64) as u32;
        let sy = (y as u64 * sh / dst_height as u64) as u32;
        *src.get_pixel(sx, sy)
    })
}

fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, TranscodeError> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(image.as_raw(), image.width(), image.height(), ColorType::Rgba8)
        .map_err(|err| TranscodeError::Encode(err.to_string()))?;
    Ok(out)
}

fn encode_jpeg(image: RgbaImage) -> Result<Vec<u8>, TranscodeError> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, JPEG_QUALITY)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(|err| TranscodeError::Encode(err.to_string()))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{jpeg_bytes, png_bytes};
    use image::{GenericImageView, Rgba};

    fn width(px: u32) -> ThumbnailWidth {
        ThumbnailWidth::new(px).unwrap()
    }

    #[test]
    fn halves_height_with_width() {
        let source = jpeg_bytes(1000, 500);
        let Transcoded::Resized {
            data,
            content_type,
            width: w,
            height: h,
        } = transcode(&source, width(200)).unwrap()
        else {
            panic!("expected a resized image");
        };
        assert_eq!((w, h), (200, 100));
        assert_eq!(content_type, "image/jpeg");

        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!(decoded.dimensions(), (200, 100));
    }

    #[test]
    fn never_upscales() {
        let source = jpeg_bytes(120, 80);
        assert_eq!(transcode(&source, width(120)).unwrap(), Transcoded::Unchanged);
        assert_eq!(transcode(&source, width(300)).unwrap(), Transcoded::Unchanged);
    }

    #[test]
    fn png_sources_stay_png() {
        let source = png_bytes(64, 32);
        let Transcoded::Resized {
            data, content_type, ..
        } = transcode(&source, width(16)).unwrap()
        else {
            panic!("expected a resized image");
        };
        assert_eq!(content_type, "image/png");
        assert_eq!(guess_format(&data).unwrap(), ImageFormat::Png);
        let decoded = image::load_from_memory(&data).unwrap();
        assert_eq!(decoded.dimensions(), (16, 8));
    }

    #[test]
    fn samples_nearest_source_pixel() {
        // 4x1 source with distinct columns, downscaled to 2x1.
        let mut src = RgbaImage::new(4, 1);
        for x in 0..4 {
            src.put_pixel(x, 0, Rgba([x as u8 * 60, 0, 0, 255]));
        }
        let out = resize_nearest(&DynamicImage::ImageRgba8(src), 2, 1);
        assert_eq!(out.get_pixel(0, 0), &Rgba([0, 0, 0, 255]));
        assert_eq!(out.get_pixel(1, 0), &Rgba([120, 0, 0, 255]));
    }

    #[test]
    fn height_is_rounded_and_floored_at_one() {
        assert_eq!(scaled_height(1000, 500, 200), 100);
        assert_eq!(scaled_height(3, 2, 2), 1);
        assert_eq!(scaled_height(3, 4, 2), 3);
        assert_eq!(scaled_height(4000, 1, 100), 1);
    }

    #[test]
    fn garbage_is_a_decode_error() {
        assert!(matches!(
            transcode(b"definitely not an image", width(100)),
            Err(TranscodeError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn blocking_wrapper_matches_direct_call() {
        let source = png_bytes(50, 50);
        let out = transcode_blocking(Bytes::from(source), width(25)).await.unwrap();
        assert!(matches!(out, Transcoded::Resized { width: 25, height: 25, .. }));
    }
}
