//! Decoding, fitting and encoding of photos.
//!
//! The import pipeline and the slideshow both size photos through
//! [`resize_to_fit`], so a stored file and an on-screen preview of the same
//! source always come out with identical dimensions.

use std::fmt;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use fast_image_resize as fir;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageError, ImageReader, RgbaImage};
use tracing::debug;

use crate::error::DecodeError;

/// A decoded photo in RGBA8.
#[derive(Clone, PartialEq, Eq)]
pub struct Bitmap {
    image: RgbaImage,
}

impl Bitmap {
    pub fn from_rgba(image: RgbaImage) -> Self {
        Self { image }
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

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.image
    }

    pub fn into_rgba(self) -> RgbaImage {
        self.image
    }
}

impl fmt::Debug for Bitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Turns files into bitmaps. Implementations must be callable from worker
/// threads.
pub trait ImageCodec: Send + Sync + 'static {
    fn decode(&self, path: &Path) -> Result<Bitmap, DecodeError>;

    fn resize_to_fit(&self, bitmap: &Bitmap, target_w: u32, target_h: u32) -> Bitmap {
        resize_to_fit(bitmap, target_w, target_h)
    }
}

/// Decoder backed by the `image` crate with EXIF orientation applied.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileCodec;

impl ImageCodec for FileCodec {
    fn decode(&self, path: &Path) -> Result<Bitmap, DecodeError> {
        decode_rgba8_apply_exif(path)
            .map(Bitmap::from_rgba)
            .map_err(|cause| DecodeError {
                path: path.to_path_buf(),
                cause,
            })
    }
}

// Sniffs the format from content rather than trusting the extension.
fn decode_rgba8_apply_exif(path: &Path) -> Result<RgbaImage, ImageError> {
    let img = ImageReader::open(path)
        .map_err(ImageError::IoError)?
        .with_guessed_format()
        .map_err(ImageError::IoError)?
        .decode()?;
    let img = img.to_rgba8();

    let orientation = read_orientation(path).unwrap_or(1);
    Ok(apply_orientation(img, orientation))
}

fn apply_orientation(img: RgbaImage, orientation: u16) -> RgbaImage {
    match orientation {
        2 => imageops::flip_horizontal(&img),
        3 => imageops::rotate180(&img),
        4 => imageops::flip_vertical(&img),
        // transpose
        5 => imageops::flip_horizontal(&imageops::rotate90(&img)),
        6 => imageops::rotate90(&img),
        // transverse
        7 => imageops::flip_horizontal(&imageops::rotate270(&img)),
        8 => imageops::rotate270(&img),
        _ => img,
    }
}

fn read_orientation(path: &Path) -> Option<u16> {
    let file = File::open(path).ok()?;
    let mut buf = BufReader::new(file);
    let exif = exif::Reader::new().read_from_container(&mut buf).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let o = field.value.get_uint(0)? as u16;
    debug!(path = %path.display(), orientation = o, "exif orientation");
    Some(o)
}

/// Largest size that fits within `max_w` x `max_h` while keeping the aspect
/// ratio of `src_w` x `src_h`. Never upscales; each side is at least 1.
#[must_use]
pub fn fit_dimensions(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let (src_w, src_h) = (src_w.max(1), src_h.max(1));
    let (max_w, max_h) = (max_w.max(1), max_h.max(1));
    if src_w <= max_w && src_h <= max_h {
        return (src_w, src_h);
    }
    let scale = (f64::from(max_w) / f64::from(src_w)).min(f64::from(max_h) / f64::from(src_h));
    let w = (f64::from(src_w) * scale).round() as u32;
    let h = (f64::from(src_h) * scale).round() as u32;
    (w.clamp(1, max_w), h.clamp(1, max_h))
}

/// Shrink `bitmap` to fit within `target_w` x `target_h`, preserving aspect
/// ratio. Bitmaps that already fit are returned as-is.
#[must_use]
pub fn resize_to_fit(bitmap: &Bitmap, target_w: u32, target_h: u32) -> Bitmap {
    let (w, h) = fit_dimensions(bitmap.width(), bitmap.height(), target_w, target_h);
    if (w, h) == bitmap.dimensions() {
        return bitmap.clone();
    }
    match resize_rgba(bitmap.as_rgba(), w, h) {
        Ok(resized) => Bitmap::from_rgba(resized),
        Err(err) => {
            debug!("fast resize failed: {err}; falling back to imageops");
            Bitmap::from_rgba(imageops::resize(
                bitmap.as_rgba(),
                w,
                h,
                FilterType::CatmullRom,
            ))
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ResizeError {
    #[error("invalid source view: {0}")]
    Source(#[from] fir::ImageBufferError),
    #[error("resize failed: {0}")]
    Resize(#[from] fir::ResizeError),
    #[error("resized buffer has unexpected length")]
    Buffer,
}

fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage, ResizeError> {
    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer.resize(&src_view, &mut dst_image, Some(&options))?;
    RgbaImage::from_raw(target_w, target_h, dst_image.into_vec()).ok_or(ResizeError::Buffer)
}

/// Write `bitmap` as a baseline RGB JPEG. Alpha is discarded.
pub fn encode_jpeg<W: Write>(bitmap: &Bitmap, quality: u8, writer: W) -> Result<(), ImageError> {
    let rgb = DynamicImage::ImageRgba8(bitmap.as_rgba().clone()).into_rgb8();
    let encoder = JpegEncoder::new_with_quality(writer, quality.clamp(1, 100));
    rgb.write_with_encoder(encoder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;

    // JPEG 2x1 with EXIF orientation 6 (rotate 90 CW), base64 encoded
    const ORIENT6_JPEG: &str = concat!(
        "/9j/4AAQSkZJRgABAQAAAQABAAD/4QAiRXhpZgAATU0AKgAAAAgAAQESAAMAAAABAAYAAAAAAAD/2wBDAAgGBgcGBQgHBwcJCQgKDBQNDAsLDBkSEw8UHRofHh0aHBwgJC4nICIsIxwcKDcpLDAxNDQ0Hyc5PTgyPC4zNDL/",
        "2wBDAQkJCQwLDBgNDRgyIRwhMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjIyMjL/wAARCAABAAIDASIAAhEBAxEB/8QAHwAAAQUBAQEBAQEAAAAAAAAAAAECAwQFBgcICQoL/8QAtRAAAgEDAwIEAwUFBAQAAAF9AQIDAAQRBRIhMUEGE1FhByJxFDKBkaEII0KxwRVS0fAkM2JyggkKFhcYGRolJicoKSo0NTY3ODk6Q0RFRkdISUpTVFVWV1hZWmNkZWZnaGlqc3R1dnd4eXqDhIWGh4iJipKTlJWWl5iZmqKjpKWmp6ipqrKztLW2t7i5usLDxMXGx8jJytLT1NXW19jZ2uHi4+Tl5ufo6erx8vP09fb3+Pn6/8QAHwEAAwEBAQEBAQEBAQAAAAAAAAECAwQFBgcICQoL/8QAtREAAgECBAQDBAcFBAQAAQJ3AAECAxEEBSExBhJBUQdhcRMiMoEIFEKRobHBCSMzUvAVYnLRChYkNOEl8RcYGRomJygpKjU2Nzg5OkNERUZHSElKU1RVVldYWVpjZGVmZ2hpanN0dXZ3eHl6goOEhYaHiImKkpOUlZaXmJmaoqOkpaanqKmqsrO0tba3uLm6wsPExcbHyMnK0tPU1dbX2Nna4uPk5ebn6Onq8vP09fb3+Pn6/9oADAMBAAIRAxEAPwDi6KKK+ZP3E//Z"
    );

    #[test]
    fn applies_orientation_six() {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(ORIENT6_JPEG)
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orient6.jpg");
        std::fs::write(&path, &bytes).unwrap();
        let bitmap = FileCodec.decode(&path).unwrap();
        assert_eq!(bitmap.dimensions(), (1, 2));
    }

    #[test]
    fn corrupt_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jpg");
        std::fs::write(&path, b"definitely not a jpeg").unwrap();
        let err = FileCodec.decode(&path).unwrap_err();
        assert_eq!(err.path, path);
    }

    #[test]
    fn fit_keeps_small_images_untouched() {
        assert_eq!(fit_dimensions(800, 600, 1920, 1080), (800, 600));
        assert_eq!(fit_dimensions(1920, 1080, 1920, 1080), (1920, 1080));
    }

    #[test]
    fn fit_uses_the_more_restrictive_side() {
        // 4000x2000 (2:1) into 1920x1080 → width bound
        assert_eq!(fit_dimensions(4000, 2000, 1920, 1080), (1920, 960));
        // 3000x4000 portrait → height bound
        assert_eq!(fit_dimensions(3000, 4000, 1920, 1080), (810, 1080));
    }

    #[test]
    fn fit_never_collapses_to_zero() {
        assert_eq!(fit_dimensions(10_000, 1, 100, 100), (100, 1));
        assert_eq!(fit_dimensions(0, 0, 0, 0), (1, 1));
    }

    #[test]
    fn resize_produces_fitted_bitmap() {
        let src = Bitmap::from_rgba(RgbaImage::from_pixel(400, 200, image::Rgba([10, 20, 30, 255])));
        let out = resize_to_fit(&src, 100, 100);
        assert_eq!(out.dimensions(), (100, 50));
        let px = out.as_rgba().get_pixel(50, 25);
        assert_eq!(px.0[3], 255);
    }

    #[test]
    fn encoded_jpeg_decodes_back() {
        let src = Bitmap::from_rgba(RgbaImage::from_pixel(16, 8, image::Rgba([200, 10, 10, 128])));
        let mut buf = Vec::new();
        encode_jpeg(&src, 90, &mut buf).unwrap();
        let back = image::load_from_memory(&buf).unwrap();
        assert_eq!((back.width(), back.height()), (16, 8));
    }
}
