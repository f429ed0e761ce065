//! Normalization: enforce a minimum unit size by symmetric white padding.
//!
//! Vision backends reject images below a minimum edge length (56 px for
//! Qwen-VL class models). Units already at or above the minimum are left
//! alone in place, or copied byte for byte when writing to another
//! directory; smaller units are padded, flattened to RGB and re-saved.
//! Re-running the stage on its own output is therefore a no-op or a pure
//! copy.

use crate::error::{PipelineError, UnitError};
use crate::output::{Stage, StageReport};
use crate::pipeline::encode::save_image;
use crate::pipeline::input::{ensure_dir, file_name, list_images};
use crate::progress::Reporter;
use image::{imageops, DynamicImage, Rgb, RgbImage};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Fill colour of added borders.
pub const FILL: Rgb<u8> = Rgb([255, 255, 255]);

/// Pixels added on each side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

/// Padding needed to bring `width × height` up to `min` on both axes.
///
/// The deficit on each axis is split floor/ceil, the extra pixel going to
/// the right and bottom. `None` when no padding is needed.
pub fn padding_for(width: u32, height: u32, min: u32) -> Option<Padding> {
    if width >= min && height >= min {
        return None;
    }
    let dw = min.saturating_sub(width);
    let dh = min.saturating_sub(height);
    Some(Padding {
        left: dw / 2,
        top: dh / 2,
        right: dw - dw / 2,
        bottom: dh - dh / 2,
    })
}

/// Pad `img` to at least `min × min`. `None` if it is already large enough.
pub fn pad_to_min(img: &DynamicImage, min: u32) -> Option<RgbImage> {
    let pad = padding_for(img.width(), img.height(), min)?;
    let mut canvas = RgbImage::from_pixel(
        img.width() + pad.left + pad.right,
        img.height() + pad.top + pad.bottom,
        FILL,
    );
    imageops::replace(&mut canvas, &img.to_rgb8(), pad.left as i64, pad.top as i64);
    Some(canvas)
}

/// What happened to one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// Already valid, left in place.
    Unchanged,
    /// Already valid, copied to the output directory.
    Copied,
    /// Padded and written.
    Padded,
}

/// Normalize one unit file from `src` to `dst`. `src == dst` is in-place mode.
pub fn normalize_file(src: &Path, dst: &Path, min: u32) -> Result<NormalizeOutcome, UnitError> {
    let name = file_name(src);
    let write_err = |e: &dyn std::fmt::Display| UnitError::WriteFailed {
        name: name.clone(),
        detail: e.to_string(),
    };
    let (width, height) = image::image_dimensions(src).map_err(|e| UnitError::UnreadableImage {
        name: name.clone(),
        detail: e.to_string(),
    })?;

    if padding_for(width, height, min).is_none() {
        if same_file(src, dst) {
            return Ok(NormalizeOutcome::Unchanged);
        }
        std::fs::copy(src, dst).map_err(|e| write_err(&e))?;
        return Ok(NormalizeOutcome::Copied);
    }

    let img = image::open(src).map_err(|e| UnitError::UnreadableImage {
        name: name.clone(),
        detail: e.to_string(),
    })?;
    if let Some(padded) = pad_to_min(&img, min) {
        debug!(
            "Padding {} from {}x{} to {}x{}",
            name,
            width,
            height,
            padded.width(),
            padded.height()
        );
        save_image(&DynamicImage::ImageRgb8(padded), dst).map_err(|e| write_err(&e))?;
    }
    Ok(NormalizeOutcome::Padded)
}

fn same_file(a: &Path, b: &Path) -> bool {
    if a == b {
        return true;
    }
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Normalize every image in `input_dir` into `output_dir` (which may be the
/// same directory).
pub fn run(
    input_dir: &Path,
    output_dir: &Path,
    min: u32,
    reporter: &Reporter,
) -> Result<StageReport, PipelineError> {
    let start = Instant::now();
    let files = list_images(input_dir)?;
    ensure_dir(output_dir)?;
    info!(
        "Checking {} images for padding requirements in {}",
        files.len(),
        input_dir.display()
    );

    let mut report = StageReport::new(Stage::Normalize);
    report.total = files.len();
    reporter.stage_start(Stage::Normalize, files.len());

    for path in &files {
        let name = file_name(path);
        match normalize_file(path, &output_dir.join(&name), min) {
            Ok(outcome) => {
                if outcome == NormalizeOutcome::Padded {
                    info!("Padding applied to {}", name);
                    report.units += 1;
                }
                report.succeeded += 1;
                reporter.unit_complete(Stage::Normalize, &name);
            }
            Err(e) => {
                warn!("{}", e);
                reporter.unit_error(Stage::Normalize, &name, &e.to_string());
                report.failures.push(e);
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    info!("Padding complete. {} images were padded.", report.units);
    reporter.stage_complete(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Rgba, RgbaImage};

    #[test]
    fn no_padding_when_large_enough() {
        assert_eq!(padding_for(56, 56, 56), None);
        assert_eq!(padding_for(300, 80, 56), None);
    }

    #[test]
    fn deficit_split_floor_ceil() {
        assert_eq!(
            padding_for(10, 100, 56),
            Some(Padding {
                left: 23,
                top: 0,
                right: 23,
                bottom: 0
            })
        );
        assert_eq!(
            padding_for(100, 51, 56),
            Some(Padding {
                left: 0,
                top: 2,
                right: 0,
                bottom: 3
            })
        );
    }

    #[test]
    fn padded_border_is_white_and_content_centred() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(11, 40, Rgba([0, 0, 0, 255])));
        let out = pad_to_min(&img, 56).unwrap();
        assert_eq!(out.dimensions(), (56, 56));
        let pad = padding_for(11, 40, 56).unwrap();
        for (x, y, p) in out.enumerate_pixels() {
            let inside = x >= pad.left && x < pad.left + 11 && y >= pad.top && y < pad.top + 40;
            if inside {
                assert_eq!(*p, Rgb([0, 0, 0]), "({x},{y})");
            } else {
                assert_eq!(*p, FILL, "({x},{y})");
            }
        }
    }

    #[test]
    fn small_image_is_padded_and_rerun_is_copy() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("crop_000_000_title.png");
        RgbaImage::from_pixel(30, 12, Rgba([5, 5, 5, 255]))
            .save(&src)
            .unwrap();

        let first = dir.path().join("first");
        let second = dir.path().join("second");
        std::fs::create_dir_all(&first).unwrap();
        std::fs::create_dir_all(&second).unwrap();

        let once = first.join("crop_000_000_title.png");
        assert_eq!(normalize_file(&src, &once, 56).unwrap(), NormalizeOutcome::Padded);
        let padded = image::open(&once).unwrap();
        assert_eq!(padded.dimensions(), (56, 56));

        let twice = second.join("crop_000_000_title.png");
        assert_eq!(normalize_file(&once, &twice, 56).unwrap(), NormalizeOutcome::Copied);
        assert_eq!(std::fs::read(&once).unwrap(), std::fs::read(&twice).unwrap());
    }

    #[test]
    fn in_place_leaves_valid_files_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crop_000_001_text.png");
        RgbaImage::from_pixel(80, 60, Rgba([1, 2, 3, 255]))
            .save(&path)
            .unwrap();
        let before = std::fs::read(&path).unwrap();
        assert_eq!(normalize_file(&path, &path, 56).unwrap(), NormalizeOutcome::Unchanged);
        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn stage_counts_padded_and_failures() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        RgbaImage::from_pixel(10, 10, Rgba([0, 0, 0, 255]))
            .save(input.path().join("a.png"))
            .unwrap();
        RgbaImage::from_pixel(60, 60, Rgba([0, 0, 0, 255]))
            .save(input.path().join("b.png"))
            .unwrap();
        std::fs::write(input.path().join("c.png"), b"nope").unwrap();

        let report = run(input.path(), output.path(), 56, &Reporter::default()).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.units, 1);
        assert_eq!(report.failed(), 1);
        assert!(output.path().join("a.png").exists());
        assert!(output.path().join("b.png").exists());
        assert!(!output.path().join("c.png").exists());
    }
}
