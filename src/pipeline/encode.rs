//! Image encoding: unit files → base64 `ImageData`, and format-aware saving.
//!
//! Unit images are sent in the format they were written in; no re-encode is
//! needed because segmentation and normalization already produce files the
//! backend accepts. `detail: "high"` instructs GPT-4-class models to use the
//! full tile budget, without it small print in a crop is lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use std::path::Path;
use tracing::debug;

/// MIME type for a unit file, from its extension. Defaults to PNG.
pub fn mime_for(path: &Path) -> &'static str {
    match ImageFormat::from_path(path) {
        Ok(ImageFormat::Jpeg) => "image/jpeg",
        Ok(ImageFormat::Bmp) => "image/bmp",
        Ok(ImageFormat::Tiff) => "image/tiff",
        _ => "image/png",
    }
}

/// Read a unit image file and wrap it as base64 `ImageData`.
pub fn encode_file(path: &Path) -> std::io::Result<ImageData> {
    let bytes = std::fs::read(path)?;
    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), b64.len());
    Ok(ImageData::new(b64, mime_for(path)).with_detail("high"))
}

/// Encode an in-memory image as base64 PNG.
pub fn encode_png_base64(img: &DynamicImage) -> Result<String, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    Ok(STANDARD.encode(&buf))
}

/// Save `img` to `path` in the format implied by its extension.
///
/// The JPEG encoder only takes 8-bit gray or RGB, so anything else is
/// flattened to RGB first.
pub fn save_image(img: &DynamicImage, path: &Path) -> Result<(), image::ImageError> {
    let jpeg_ready = matches!(img, DynamicImage::ImageRgb8(_) | DynamicImage::ImageLuma8(_));
    match ImageFormat::from_path(path) {
        Ok(ImageFormat::Jpeg) if !jpeg_ready => DynamicImage::ImageRgb8(img.to_rgb8()).save(path),
        _ => img.save(path),
    }
}
