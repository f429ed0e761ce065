//! Segmentation: split each page into addressable units.
//!
//! Pages are processed in file-name order and `source_index` is the page's
//! position in that listing. For each page the layout engine is called once;
//! regions whose label is not on the [`Category`] allow-list are dropped
//! before numbering, the rest are sorted top to bottom and numbered in that
//! order. Each survivor is written as `crop_{SSS}_{RRR}_{category}.png`.
//!
//! A page that cannot be read or that the engine fails on is logged and
//! skipped; it still consumes its `source_index` so numbering stays stable
//! across reruns.

use crate::error::{PipelineError, UnitError};
use crate::output::{PageRecord, RunManifest, Stage, StageReport};
use crate::pipeline::input::{ensure_dir, file_name, list_images};
use crate::pipeline::layout::{LayoutEngine, LayoutRegion};
use crate::progress::Reporter;
use crate::unit::{Category, UnitKey};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Extension of unit images written by segmentation.
pub const CROP_EXTENSION: &str = "png";

/// Keep allow-listed regions and order them top to bottom.
///
/// The sort is stable, so regions sharing a top edge keep the engine's order.
pub fn select_regions(regions: Vec<LayoutRegion>) -> Vec<(Category, LayoutRegion)> {
    let mut kept: Vec<(Category, LayoutRegion)> = regions
        .into_iter()
        .filter_map(|r| match Category::from_label(&r.label) {
            Some(category) => Some((category, r)),
            None => {
                debug!("Dropping '{}' region", r.label);
                None
            }
        })
        .collect();
    kept.sort_by(|a, b| a.1.bbox.top().total_cmp(&b.1.bbox.top()));
    kept
}

/// Assign unit keys to the selected regions of page `source_index`.
pub fn plan_units(source_index: usize, regions: Vec<LayoutRegion>) -> Vec<(UnitKey, LayoutRegion)> {
    select_regions(regions)
        .into_iter()
        .enumerate()
        .map(|(region_index, (category, region))| {
            (UnitKey::new(source_index, region_index, category), region)
        })
        .collect()
}

/// What segmentation produced.
#[derive(Debug, Clone)]
pub struct SegmentOutput {
    pub report: StageReport,
    pub manifest: RunManifest,
}

/// Plain-text run log, one line per page.
struct ProcessingLog {
    path: PathBuf,
    out: BufWriter<File>,
}

impl ProcessingLog {
    fn create(path: &Path, input_dir: &Path) -> Result<Self, PipelineError> {
        let file = File::create(path).map_err(|source| PipelineError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let mut log = Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        };
        log.line(&format!("Processing Log - {}", input_dir.display()))?;
        log.line(&"=".repeat(40))?;
        Ok(log)
    }

    fn line(&mut self, text: &str) -> Result<(), PipelineError> {
        writeln!(self.out, "{text}").map_err(|source| PipelineError::OutputWriteFailed {
            path: self.path.clone(),
            source,
        })
    }

    fn finish(mut self, total_crops: usize) -> Result<(), PipelineError> {
        self.line(&"=".repeat(40))?;
        self.line(&format!("Total crops extracted: {total_crops}"))?;
        self.out
            .flush()
            .map_err(|source| PipelineError::OutputWriteFailed {
                path: self.path.clone(),
                source,
            })
    }
}

/// Segment every page in `input_dir` into `crops_dir`, logging per-page
/// counts and errors to `log_file`.
pub fn run(
    input_dir: &Path,
    crops_dir: &Path,
    log_file: &Path,
    engine: &dyn LayoutEngine,
    reporter: &Reporter,
) -> Result<SegmentOutput, PipelineError> {
    let start = Instant::now();
    let files = list_images(input_dir)?;
    ensure_dir(crops_dir)?;
    if let Some(parent) = log_file.parent() {
        ensure_dir(parent)?;
    }
    info!(
        "Starting layout analysis on {} files in {} ({} engine)",
        files.len(),
        input_dir.display(),
        engine.name()
    );

    let mut log = ProcessingLog::create(log_file, input_dir)?;
    let mut report = StageReport::new(Stage::Segment);
    report.total = files.len();
    let mut manifest = RunManifest {
        source_dir: input_dir.to_path_buf(),
        pages: Vec::with_capacity(files.len()),
    };
    reporter.stage_start(Stage::Segment, files.len());

    for (source_index, path) in files.iter().enumerate() {
        let name = file_name(path);
        let mut record = PageRecord {
            source_index,
            file_name: name.clone(),
            units: Vec::new(),
            error: None,
        };

        match segment_page(source_index, path, crops_dir, engine) {
            Ok((units, write_failures)) => {
                let written = units.len() - write_failures.len();
                log.line(&format!("{name}: {written} crops extracted."))?;
                info!("{}: extracted {} valid crops", name, written);
                // Progress counts pages; crop failures only reach the log and report.
                for e in write_failures {
                    warn!("{}", e);
                    log.line(&format!("Error: {e}"))?;
                    report.failures.push(e);
                }
                report.units += written;
                report.succeeded += 1;
                record.units = units;
                reporter.unit_complete(Stage::Segment, &name);
            }
            Err(e) => {
                warn!("{}", e);
                log.line(&format!("Error: {e}"))?;
                reporter.unit_error(Stage::Segment, &name, &e.to_string());
                record.error = Some(e.to_string());
                report.failures.push(e);
            }
        }
        manifest.pages.push(record);
    }

    log.finish(report.units)?;
    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Layout analysis complete: {} crops from {} pages, log saved to {}",
        report.units,
        files.len(),
        log_file.display()
    );
    reporter.stage_complete(&report);
    Ok(SegmentOutput { report, manifest })
}

/// Segment one page. Returns every unit planned for it plus the units whose
/// crop could not be written; a page-level failure is the `Err` case.
fn segment_page(
    source_index: usize,
    path: &Path,
    crops_dir: &Path,
    engine: &dyn LayoutEngine,
) -> Result<(Vec<UnitKey>, Vec<UnitError>), UnitError> {
    let name = file_name(path);
    let page = image::open(path).map_err(|e| UnitError::UnreadableImage {
        name: name.clone(),
        detail: e.to_string(),
    })?;

    let regions = engine.detect(&page).map_err(|e| UnitError::LayoutFailed {
        name: name.clone(),
        detail: e.to_string(),
    })?;
    let detected = regions.len();

    let planned = plan_units(source_index, regions);
    debug!("{}: {} regions detected, {} kept", name, detected, planned.len());

    let mut units = Vec::with_capacity(planned.len());
    let mut failures = Vec::new();
    for (key, region) in planned {
        let crop_name = key.file_name(CROP_EXTENSION);
        if let Err(e) = region.crop.save(crops_dir.join(&crop_name)) {
            failures.push(UnitError::WriteFailed {
                name: crop_name,
                detail: e.to_string(),
            });
        }
        units.push(key);
    }
    Ok((units, failures))
}
