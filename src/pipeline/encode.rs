//! Image encoding: `DynamicImage` → PNG bytes, plus thumbnail downscaling.
//!
//! Snapshots are stored as PNG so rendered text stays crisp; thumbnails are
//! downscaled with Lanczos3 to fit a bounding box without distorting the
//! page's aspect ratio.

use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode an image as PNG.
pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(buf)
}

/// Largest size with the aspect ratio of `width × height` that fits in
/// `max_width × max_height`. Never larger than the input.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let scale = f64::min(
        max_width as f64 / width as f64,
        max_height as f64 / height as f64,
    );
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_width.max(1));
    let h = ((height as f64 * scale).round() as u32).clamp(1, max_height.max(1));
    (w, h)
}

/// Downscale `img` to fit `max_width × max_height`.
pub fn thumbnail(img: &DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (w, h) = fit_within(img.width(), img.height(), max_width, max_height);
    if (w, h) == (img.width(), img.height()) {
        return img.clone();
    }
    img.resize_exact(w, h, FilterType::Lanczos3)
}
