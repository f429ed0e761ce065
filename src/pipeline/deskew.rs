//! Deskewing: estimate page rotation from straight lines and undo it.
//!
//! ## Estimator
//!
//! Canny edges → Hough line transform → each line's deviation from
//! horizontal. Lines deviating by `max_angle_deg` (45°) or more are treated
//! as vertical rules and table borders rather than text baselines and are
//! dropped. The median of what remains is the page skew. No qualifying line
//! means an angle of exactly `0.0` and the page is left untouched.
//!
//! ## Rotation
//!
//! Rotation is about the image centre with bilinear sampling. Samples that
//! fall outside the page take the nearest edge pixel, so the corners of a
//! rotated scan show paper colour instead of black wedges.

use crate::config::DeskewOptions;
use crate::error::{PipelineError, UnitError};
use crate::output::{Stage, StageReport};
use crate::pipeline::encode::save_image;
use crate::pipeline::input::{ensure_dir, file_name, list_images};
use crate::progress::Reporter;
use image::{DynamicImage, ImageBuffer, Pixel};
use imageproc::edges::canny;
use imageproc::hough::{detect_lines, LineDetectionOptions};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Estimate the skew of a page in degrees. `0.0` when no line qualifies.
pub fn estimate_skew(img: &DynamicImage, opts: &DeskewOptions) -> f32 {
    let gray = img.to_luma8();
    let edges = canny(&gray, opts.canny_low, opts.canny_high);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: opts.vote_threshold,
            suppression_radius: opts.suppression_radius,
        },
    );

    // imageproc parameterises lines as r = x·cos θ + y·sin θ, so θ is the
    // normal's angle and a horizontal line votes at θ = 90°.
    let mut angles: Vec<f32> = lines
        .iter()
        .map(|l| l.angle_in_degrees as f32 - 90.0)
        .filter(|a| a.abs() < opts.max_angle_deg)
        .collect();
    debug!(
        "Skew estimate: {} lines detected, {} within ±{}°",
        lines.len(),
        angles.len(),
        opts.max_angle_deg
    );

    median(&mut angles).unwrap_or(0.0)
}

/// Median of `values`; the mean of the middle pair for even lengths.
pub fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f32::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

/// Estimate and correct the skew of `img`.
///
/// Returns the corrected image and the estimated angle. An angle of `0.0`
/// returns `img` itself, pixel for pixel.
pub fn deskew(img: DynamicImage, opts: &DeskewOptions) -> (DynamicImage, f32) {
    let angle = estimate_skew(&img, opts);
    if angle == 0.0 {
        return (img, 0.0);
    }
    (rotate(&img, angle), angle)
}

/// Rotate about the centre by `angle_deg` (counter-clockwise as displayed),
/// replicating border pixels. Output has the input's dimensions.
pub fn rotate(img: &DynamicImage, angle_deg: f32) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(b) => DynamicImage::ImageLuma8(rotate_replicate(b, angle_deg)),
        DynamicImage::ImageLumaA8(b) => DynamicImage::ImageLumaA8(rotate_replicate(b, angle_deg)),
        DynamicImage::ImageRgb8(b) => DynamicImage::ImageRgb8(rotate_replicate(b, angle_deg)),
        DynamicImage::ImageRgba8(b) => DynamicImage::ImageRgba8(rotate_replicate(b, angle_deg)),
        other => DynamicImage::ImageRgba8(rotate_replicate(&other.to_rgba8(), angle_deg)),
    }
}

fn rotate_replicate<P>(src: &ImageBuffer<P, Vec<u8>>, angle_deg: f32) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let (w, h) = src.dimensions();
    let mut out = ImageBuffer::new(w, h);
    if w == 0 || h == 0 {
        return out;
    }

    let (cx, cy) = ((w / 2) as f32, (h / 2) as f32);
    let (sin, cos) = angle_deg.to_radians().sin_cos();
    let (max_x, max_y) = ((w - 1) as f32, (h - 1) as f32);
    let channels = P::CHANNEL_COUNT as usize;

    for (x, y, px) in out.enumerate_pixels_mut() {
        // Inverse mapping: where in the source does this output pixel come from.
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = (cx + cos * dx - sin * dy).clamp(0.0, max_x);
        let sy = (cy + sin * dx + cos * dy).clamp(0.0, max_y);

        let x0 = sx.floor() as u32;
        let y0 = sy.floor() as u32;
        let x1 = (x0 + 1).min(w - 1);
        let y1 = (y0 + 1).min(h - 1);
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let p00 = src.get_pixel(x0, y0).channels();
        let p10 = src.get_pixel(x1, y0).channels();
        let p01 = src.get_pixel(x0, y1).channels();
        let p11 = src.get_pixel(x1, y1).channels();

        let dst = px.channels_mut();
        for c in 0..channels {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            dst[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Deskew every image in `input_dir` into `output_dir` under the same name.
///
/// Unreadable files are logged, recorded in the report and skipped.
pub fn run(
    input_dir: &Path,
    output_dir: &Path,
    opts: &DeskewOptions,
    reporter: &Reporter,
) -> Result<StageReport, PipelineError> {
    let start = Instant::now();
    let files = list_images(input_dir)?;
    ensure_dir(output_dir)?;
    info!("Found {} images in {}", files.len(), input_dir.display());

    let mut report = StageReport::new(Stage::Deskew);
    report.total = files.len();
    reporter.stage_start(Stage::Deskew, files.len());

    for path in &files {
        let name = file_name(path);
        match deskew_file(path, &output_dir.join(&name), opts) {
            Ok(angle) => {
                info!("Processed {}: angle={:.2}°", name, angle);
                report.succeeded += 1;
                reporter.unit_complete(Stage::Deskew, &name);
            }
            Err(e) => {
                warn!("{}", e);
                reporter.unit_error(Stage::Deskew, &name, &e.to_string());
                report.failures.push(e);
            }
        }
    }

    report.duration_ms = start.elapsed().as_millis() as u64;
    reporter.stage_complete(&report);
    Ok(report)
}

fn deskew_file(src: &Path, dst: &Path, opts: &DeskewOptions) -> Result<f32, UnitError> {
    let name = file_name(src);
    let img = image::open(src).map_err(|e| UnitError::UnreadableImage {
        name: name.clone(),
        detail: e.to_string(),
    })?;

    let (corrected, angle) = deskew(img, opts);
    if angle == 0.0 {
        // Untouched page: keep the original bytes rather than re-encoding.
        std::fs::copy(src, dst).map_err(|e| UnitError::WriteFailed {
            name,
            detail: e.to_string(),
        })?;
    } else {
        save_image(&corrected, dst).map_err(|e| UnitError::WriteFailed {
            name,
            detail: e.to_string(),
        })?;
    }
    Ok(angle)
}
