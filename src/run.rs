//! Run orchestration: sequence the stages over the run's directories.
//!
//! Stages run strictly one after another from `config.start_stage`, each
//! reading the directory the previous one wrote. Per-unit failures stay
//! inside each [`StageReport`]; a fatal [`PipelineError`] from any stage
//! aborts the run and no later stage is attempted.
//!
//! The image stages are synchronous and run on tokio's blocking pool.
//! Recognition is the only async stage. The layout engine and the
//! recognition provider are resolved only when their stage is part of the
//! run, so `--from normalize` needs no layout service and `--from merge`
//! needs no API key.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::output::{RunManifest, RunReport, Stage, StageReport};
use crate::pipeline::input::{ensure_dir, require_dir, RunPaths};
use crate::pipeline::layout::{LayoutEngine, RemoteLayoutEngine};
use crate::pipeline::{deskew, merge, normalize, recognize, segment};
use crate::progress::Reporter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Run the pipeline for `config.folder_name`.
///
/// # Returns
/// `Ok(RunReport)` once every scheduled stage has run, even if some units
/// failed (check [`RunReport::total_failures`]).
///
/// # Errors
/// The first fatal error of any stage: missing input directory, unwritable
/// output, missing layout engine or provider, unreadable manifest.
pub async fn run_pipeline(config: &PipelineConfig) -> Result<RunReport, PipelineError> {
    let total_start = Instant::now();
    let paths = RunPaths::new(&config.input_root, &config.output_root, &config.folder_name);
    let reporter = Reporter::new(config.progress_callback.clone());
    info!(
        "Starting run '{}' from stage {} ({} → {})",
        config.folder_name,
        config.start_stage,
        paths.input_dir.display(),
        paths.output_dir.display()
    );

    if config.runs(Stage::Deskew) {
        require_dir(&paths.input_dir)?;
    }
    ensure_dir(&paths.output_dir)?;

    let mut report = RunReport {
        folder: config.folder_name.clone(),
        output_dir: paths.output_dir.clone(),
        stages: Vec::new(),
        document: None,
        merged_units: 0,
        placeholders: 0,
        total_duration_ms: 0,
    };

    // Resumed runs pick up the manifest a previous segmentation left behind.
    let mut manifest = if config.runs(Stage::Segment) {
        None
    } else {
        let loaded = RunManifest::load(&paths.manifest)?;
        match &loaded {
            Some(m) => info!("Loaded manifest with {} units", m.unit_count()),
            None => info!("No manifest found, identifying units by file name"),
        }
        loaded
    };

    for stage in config.start_stage.remaining() {
        info!("=== Step {}: {} ===", stage.number(), stage.description());
        let outcome = match stage {
            Stage::Deskew => run_deskew(config, &paths, &reporter).await,
            Stage::Segment => run_segment(config, &paths, &reporter).await.and_then(|out| {
                out.manifest.save(&paths.manifest)?;
                manifest = Some(out.manifest);
                Ok(out.report)
            }),
            Stage::Normalize => run_normalize(config, &paths, &reporter).await,
            Stage::Recognize => run_recognize(config, &paths, manifest.as_ref(), &reporter).await,
            Stage::Merge => {
                let failures = recorded_failures(&report.stages);
                run_merge(config, &paths, manifest.clone(), failures, &reporter)
                    .await
                    .map(|(stage_report, document)| {
                        if let Some(doc) = document {
                            report.document = Some(paths.document.clone());
                            report.merged_units = doc.merged;
                            report.placeholders = doc.placeholders;
                        }
                        stage_report
                    })
            }
        };

        match outcome {
            Ok(stage_report) => {
                info!(
                    "Step {} done: {}/{} ok, {} failed, {}ms",
                    stage.number(),
                    stage_report.succeeded,
                    stage_report.total,
                    stage_report.failed(),
                    stage_report.duration_ms
                );
                report.stages.push(stage_report);
            }
            Err(e) => {
                error!("Step {} ({}) failed, aborting run: {}", stage.number(), stage, e);
                return Err(e);
            }
        }
    }

    report.total_duration_ms = total_start.elapsed().as_millis() as u64;
    match &report.document {
        Some(doc) => info!(
            "Run complete: {} units merged into {} in {}ms",
            report.merged_units,
            doc.display(),
            report.total_duration_ms
        ),
        None => info!("Run complete: nothing to merge"),
    }
    Ok(report)
}

/// Synchronous wrapper around [`run_pipeline`].
///
/// Creates a temporary tokio runtime internally.
pub fn run_pipeline_sync(config: &PipelineConfig) -> Result<RunReport, PipelineError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PipelineError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(run_pipeline(config))
}

/// Run `f` on the blocking pool; a panic there fails `stage`.
async fn blocking<T, F>(stage: Stage, f: F) -> Result<T, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PipelineError::StageFailed {
            stage,
            detail: format!("task panicked: {e}"),
        })?
}

async fn run_deskew(
    config: &PipelineConfig,
    paths: &RunPaths,
    reporter: &Reporter,
) -> Result<StageReport, PipelineError> {
    let (input, output) = (paths.input_dir.clone(), paths.rotated_dir.clone());
    let opts = config.deskew;
    let reporter = reporter.clone();
    blocking(Stage::Deskew, move || deskew::run(&input, &output, &opts, &reporter)).await
}

async fn run_segment(
    config: &PipelineConfig,
    paths: &RunPaths,
    reporter: &Reporter,
) -> Result<segment::SegmentOutput, PipelineError> {
    let engine = config.layout_engine.clone();
    let url = config.layout_url.clone();
    if engine.is_none() && url.is_none() {
        return Err(PipelineError::LayoutEngineNotConfigured);
    }
    let timeout = Duration::from_secs(config.layout_timeout_secs);
    let (input, crops, log) = (
        paths.rotated_dir.clone(),
        paths.crops_dir.clone(),
        paths.log_file.clone(),
    );
    let reporter = reporter.clone();

    // The HTTP engine uses a blocking client, which must be built and
    // dropped off the async worker threads.
    blocking(Stage::Segment, move || {
        let engine = resolve_layout_engine(engine, url, timeout)?;
        segment::run(&input, &crops, &log, engine.as_ref(), &reporter)
    })
    .await
}

/// Pre-built engine first, then an HTTP engine for `url`.
fn resolve_layout_engine(
    engine: Option<Arc<dyn LayoutEngine>>,
    url: Option<String>,
    timeout: Duration,
) -> Result<Arc<dyn LayoutEngine>, PipelineError> {
    if let Some(engine) = engine {
        return Ok(engine);
    }
    let url = url.ok_or(PipelineError::LayoutEngineNotConfigured)?;
    info!("Using layout service at {}", url);
    let remote = RemoteLayoutEngine::new(url, timeout)
        .map_err(|e| PipelineError::InvalidConfig(format!("layout engine: {e}")))?;
    Ok(Arc::new(remote))
}

async fn run_normalize(
    config: &PipelineConfig,
    paths: &RunPaths,
    reporter: &Reporter,
) -> Result<StageReport, PipelineError> {
    let (input, output) = (paths.crops_dir.clone(), paths.padded_dir.clone());
    let min = config.min_dimension;
    let reporter = reporter.clone();
    blocking(Stage::Normalize, move || {
        normalize::run(&input, &output, min, &reporter)
    })
    .await
}

async fn run_recognize(
    config: &PipelineConfig,
    paths: &RunPaths,
    manifest: Option<&RunManifest>,
    reporter: &Reporter,
) -> Result<StageReport, PipelineError> {
    require_dir(&paths.padded_dir)?;
    let backend = recognize::resolve_backend(config)?;
    recognize::run(
        &paths.padded_dir,
        &paths.fragments_dir,
        manifest,
        backend.as_ref(),
        config,
        reporter,
    )
    .await
}

async fn run_merge(
    config: &PipelineConfig,
    paths: &RunPaths,
    manifest: Option<RunManifest>,
    failures: HashMap<String, String>,
    reporter: &Reporter,
) -> Result<(StageReport, Option<crate::output::Document>), PipelineError> {
    require_dir(&paths.fragments_dir)?;
    let (fragments, document) = (paths.fragments_dir.clone(), paths.document.clone());
    let order = config.merge_order;
    let reporter = reporter.clone();
    blocking(Stage::Merge, move || {
        merge::run(
            &fragments,
            &document,
            manifest.as_ref(),
            &failures,
            order,
            &reporter,
        )
    })
    .await
}

/// Failure reasons recorded so far, keyed by unit stem. The earliest stage's
/// reason wins.
fn recorded_failures(stages: &[StageReport]) -> HashMap<String, String> {
    let mut failures = HashMap::new();
    for report in stages {
        for (stem, reason) in report.failures_by_stem() {
            failures.entry(stem).or_insert(reason);
        }
    }
    failures
}
