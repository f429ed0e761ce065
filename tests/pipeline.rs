//! Integration tests for edgequake-scan2md.
//!
//! Everything except the last test runs offline against temporary
//! directories, with a scripted layout engine standing in for the layout
//! service. The live end-to-end test is gated behind `E2E_ENABLED`.
//!
//! Run the live test with:
//!   E2E_ENABLED=1 SCAN2MD_LAYOUT_URL=http://localhost:8866/layout \
//!     cargo test --test pipeline e2e -- --nocapture

use edgequake_scan2md::pipeline::{normalize, recognize, segment};
use edgequake_scan2md::{
    run_pipeline, BoundingBox, Category, LayoutEngine, LayoutError, LayoutRegion, MergeOrder,
    PageRecord, PipelineConfig, PipelineError, RecognitionBackend, RecognitionRequest, Reporter,
    RunManifest, Stage, Transcript, UnitError, UnitKey,
};
use futures::future::BoxFuture;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Route library logs through the test harness; `RUST_LOG` picks the level.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns fixed `(label, bbox)` regions for every page and crops them.
struct ScriptedEngine {
    regions: Vec<(&'static str, [f32; 4])>,
}

impl LayoutEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn detect(&self, page: &DynamicImage) -> Result<Vec<LayoutRegion>, LayoutError> {
        Ok(self
            .regions
            .iter()
            .filter_map(|(label, [x0, y0, x1, y1])| {
                let bbox = BoundingBox::new(*x0, *y0, *x1, *y1);
                let (x, y, w, h) = bbox.clip(page.width(), page.height())?;
                Some(LayoutRegion {
                    label: label.to_string(),
                    bbox,
                    crop: page.crop_imm(x, y, w, h),
                })
            })
            .collect())
    }
}

/// Answers every unit with a canned transcript after failing the scripted
/// number of times for its stem. Records the instruction of every call.
#[derive(Default)]
struct ScriptedVlm {
    fail_first: HashMap<&'static str, u32>,
    calls: Mutex<HashMap<String, u32>>,
    instructions: Mutex<Vec<(String, String)>>,
}

impl ScriptedVlm {
    fn failing(fail_first: &[(&'static str, u32)]) -> Self {
        Self {
            fail_first: fail_first.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn reply(stem: &str) -> String {
        format!("  Text of {stem}.\n\n")
    }

    fn calls(&self, stem: &str) -> u32 {
        self.calls.lock().unwrap().get(stem).copied().unwrap_or(0)
    }

    fn instruction(&self, stem: &str) -> String {
        self.instructions
            .lock()
            .unwrap()
            .iter()
            .find(|(unit, _)| unit == stem)
            .map(|(_, text)| text.clone())
            .unwrap()
    }
}

impl RecognitionBackend for ScriptedVlm {
    fn name(&self) -> &str {
        "scripted"
    }

    fn transcribe<'a>(
        &'a self,
        request: RecognitionRequest<'a>,
    ) -> BoxFuture<'a, Result<Transcript, String>> {
        let unit = request.unit.to_string();
        self.instructions
            .lock()
            .unwrap()
            .push((unit.clone(), request.instruction.to_string()));
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(unit.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let failures = self.fail_first.get(unit.as_str()).copied().unwrap_or(0);
        Box::pin(async move {
            if call <= failures {
                Err(format!("HTTP 503 on call {call}"))
            } else {
                Ok(Transcript {
                    content: Self::reply(&unit),
                    prompt_tokens: 100,
                    completion_tokens: 20,
                })
            }
        })
    }
}

fn unit_image(dir: &Path, stem: &str) {
    RgbImage::from_pixel(60, 60, Rgb([255, 255, 255]))
        .save(dir.join(format!("{stem}.png")))
        .unwrap();
}

fn page(path: &Path) {
    RgbImage::from_pixel(200, 300, Rgb([250, 250, 250]))
        .save(path)
        .unwrap();
}

fn config_for(root: &Path, folder: &str, from: Stage) -> PipelineConfig {
    PipelineConfig::builder(folder)
        .input_root(root.join("input"))
        .output_root(root.join("output"))
        .start_stage(from)
        .build()
        .unwrap()
}

fn fragments_dir(root: &Path, folder: &str) -> PathBuf {
    let dir = root.join("output").join(folder).join("step3_md_fragments");
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

// ── Segmentation + normalization ─────────────────────────────────────────────

#[test]
fn segment_then_normalize_produces_addressable_units() {
    let root = tempfile::tempdir().unwrap();
    let pages = root.path().join("pages");
    std::fs::create_dir_all(&pages).unwrap();
    page(&pages.join("a.png"));
    page(&pages.join("b.png"));

    let engine = ScriptedEngine {
        regions: vec![
            ("text", [10.0, 120.0, 190.0, 200.0]),
            ("header", [0.0, 0.0, 200.0, 10.0]),
            ("title", [20.0, 20.0, 180.0, 50.0]),
            ("figure", [150.0, 210.0, 170.0, 230.0]),
        ],
    };

    let crops = root.path().join("crops");
    let log = root.path().join("processing_log.txt");
    let out = segment::run(&pages, &crops, &log, &engine, &Reporter::default()).unwrap();

    assert_eq!(out.report.total, 2);
    assert_eq!(out.report.succeeded, 2);
    assert_eq!(out.report.units, 6);
    assert_eq!(
        out.manifest.pages[1].units,
        vec![
            UnitKey::new(1, 0, Category::Title),
            UnitKey::new(1, 1, Category::Text),
            UnitKey::new(1, 2, Category::Figure),
        ]
    );
    for name in [
        "crop_000_000_title.png",
        "crop_000_001_text.png",
        "crop_000_002_figure.png",
        "crop_001_002_figure.png",
    ] {
        assert!(crops.join(name).exists(), "{name} missing");
    }

    let text = std::fs::read_to_string(&log).unwrap();
    assert!(text.starts_with("Processing Log - "));
    assert!(text.contains("a.png: 3 crops extracted."));
    assert!(text.contains("Total crops extracted: 6"));

    // The 20×20 figure is below the 56 px minimum and gets padded.
    let padded = root.path().join("padded");
    let report = normalize::run(&crops, &padded, 56, &Reporter::default()).unwrap();
    assert_eq!(report.total, 6);
    assert_eq!(report.units, 4);
    let figure = image::open(padded.join("crop_000_002_figure.png")).unwrap();
    assert_eq!(figure.dimensions(), (56, 56));
    assert_eq!(figure.to_rgb8().get_pixel(0, 0), &Rgb([255, 255, 255]));

    // Normalizing the normalized set again changes nothing.
    let again = root.path().join("padded_again");
    let second = normalize::run(&padded, &again, 56, &Reporter::default()).unwrap();
    assert_eq!(second.units, 0);
    for entry in std::fs::read_dir(&padded).unwrap() {
        let path = entry.unwrap().path();
        let twin = again.join(path.file_name().unwrap());
        assert_eq!(std::fs::read(&path).unwrap(), std::fs::read(&twin).unwrap());
    }
}

// ── Recognition ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn recognition_retries_records_failures_and_moves_on() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let padded = root.path().join("padded");
    let fragments = root.path().join("fragments");
    std::fs::create_dir_all(&padded).unwrap();
    for stem in ["crop_000_000_title", "crop_000_001_table", "crop_001_000_text"] {
        unit_image(&padded, stem);
    }

    let manifest = RunManifest {
        source_dir: root.path().join("rotated"),
        pages: vec![
            PageRecord {
                source_index: 0,
                file_name: "p0.png".into(),
                units: vec![
                    UnitKey::new(0, 0, Category::Title),
                    UnitKey::new(0, 1, Category::Table),
                ],
                error: None,
            },
            PageRecord {
                source_index: 1,
                file_name: "p1.png".into(),
                units: vec![
                    UnitKey::new(1, 0, Category::Text),
                    UnitKey::new(1, 1, Category::Figure),
                ],
                error: None,
            },
        ],
    };

    let vlm = ScriptedVlm::failing(&[("crop_000_000_title", u32::MAX), ("crop_000_001_table", 2)]);
    let config = PipelineConfig::builder("book")
        .retry_delay_ms(0)
        .build()
        .unwrap();
    let report = recognize::run(
        &padded,
        &fragments,
        Some(&manifest),
        &vlm,
        &config,
        &Reporter::default(),
    )
    .await
    .unwrap();

    assert_eq!(report.total, 4);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.input_tokens, 200);
    assert_eq!(report.output_tokens, 40);
    assert_eq!(
        report.failures,
        vec![
            UnitError::MissingArtifact {
                name: "crop_001_001_figure".into()
            },
            UnitError::RecognitionFailed {
                name: "crop_000_000_title.png".into(),
                attempts: 3,
                detail: "HTTP 503 on call 3".into(),
            },
        ]
    );

    // The exhausted unit leaves no fragment; the others are written verbatim.
    assert_eq!(vlm.calls("crop_000_000_title"), 3);
    assert!(!fragments.join("crop_000_000_title.md").exists());
    assert_eq!(vlm.calls("crop_000_001_table"), 3);
    assert_eq!(
        std::fs::read_to_string(fragments.join("crop_000_001_table.md")).unwrap(),
        ScriptedVlm::reply("crop_000_001_table")
    );
    assert_eq!(vlm.calls("crop_001_000_text"), 1);
    assert!(fragments.join("crop_001_000_text.md").exists());

    assert!(vlm.instruction("crop_000_000_title").contains("**Title region**"));
    assert!(vlm.instruction("crop_000_001_table").contains("**Table region**"));
    let text = vlm.instruction("crop_001_000_text");
    assert!(!text.contains("region**"), "text units get the base instruction");
}

// ── Orchestrator ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_from_pages_to_document() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let input = root.path().join("input").join("book");
    std::fs::create_dir_all(&input).unwrap();
    page(&input.join("a.png"));
    page(&input.join("b.png"));

    let engine = ScriptedEngine {
        regions: vec![
            ("text", [10.0, 120.0, 190.0, 200.0]),
            ("title", [20.0, 20.0, 180.0, 50.0]),
            ("footer", [0.0, 290.0, 200.0, 300.0]),
            ("table", [10.0, 60.0, 190.0, 110.0]),
        ],
    };
    let vlm = Arc::new(ScriptedVlm::failing(&[("crop_000_000_title", u32::MAX)]));
    let config = PipelineConfig::builder("book")
        .input_root(root.path().join("input"))
        .output_root(root.path().join("output"))
        .layout_engine(Arc::new(engine))
        .backend(vlm.clone())
        .retry_delay_ms(0)
        .build()
        .unwrap();

    let report = run_pipeline(&config).await.unwrap();

    let stages: Vec<Stage> = report.stages.iter().map(|r| r.stage).collect();
    assert_eq!(
        stages,
        vec![
            Stage::Deskew,
            Stage::Segment,
            Stage::Normalize,
            Stage::Recognize,
            Stage::Merge
        ]
    );
    assert_eq!(report.stage(Stage::Segment).unwrap().units, 6);
    // Title (30 px) and table (50 px) crops are below 56 px tall and get padded.
    assert_eq!(report.stage(Stage::Normalize).unwrap().units, 4);
    assert_eq!(report.stage(Stage::Recognize).unwrap().succeeded, 5);
    assert_eq!(report.merged_units, 6);
    assert_eq!(report.placeholders, 1);
    assert!(root.path().join("output/book/manifest.json").is_file());

    let md = std::fs::read_to_string(report.document.unwrap()).unwrap();
    let placeholder = md
        .find(
            "<!-- Error reading crop_000_000_title.md: crop_000_000_title.png: \
             recognition failed after 3 attempts: HTTP 503 on call 3 -->",
        )
        .expect("placeholder carries the recognition failure");
    let table = md.find("Text of crop_000_001_table.").unwrap();
    let second_title = md.find("Text of crop_001_000_title.").unwrap();
    assert!(placeholder < table && table < second_title);
    assert!(md.contains("<!-- Source: crop_001_002_text.md (text) -->\nText of crop_001_002_text."));
}


#[tokio::test]
async fn resume_from_merge_uses_file_names() {
    let root = tempfile::tempdir().unwrap();
    let dir = fragments_dir(root.path(), "book");
    std::fs::write(dir.join("crop_000_000_text.md"), "Body text.\n").unwrap();
    std::fs::write(dir.join("crop_000_001_title.md"), "# Chapter 1\n").unwrap();
    std::fs::write(dir.join("crop_001_000_table.md"), "| a | b |\n|---|---|\n").unwrap();

    let config = config_for(root.path(), "book", Stage::Merge);
    let report = run_pipeline(&config).await.unwrap();

    assert_eq!(report.stages.len(), 1);
    assert_eq!(report.merged_units, 3);
    assert_eq!(report.placeholders, 0);
    let doc_path = report.document.expect("document written");
    assert!(doc_path.ends_with("output/book/final_result.md"));

    let md = std::fs::read_to_string(doc_path).unwrap();
    assert!(md.starts_with("# Merged Content from "));
    let title = md.find("# Chapter 1").unwrap();
    let body = md.find("Body text.").unwrap();
    let table = md.find("| a | b |").unwrap();
    assert!(title < body && body < table);
}

#[tokio::test]
async fn natural_order_keeps_visual_order() {
    let root = tempfile::tempdir().unwrap();
    let dir = fragments_dir(root.path(), "book");
    std::fs::write(dir.join("crop_000_000_text.md"), "FRAGMENT-ONE").unwrap();
    std::fs::write(dir.join("crop_000_001_title.md"), "FRAGMENT-TWO").unwrap();

    let config = PipelineConfig::builder("book")
        .input_root(root.path().join("input"))
        .output_root(root.path().join("output"))
        .start_stage(Stage::Merge)
        .merge_order(MergeOrder::Natural)
        .build()
        .unwrap();
    run_pipeline(&config).await.unwrap();

    let md = std::fs::read_to_string(root.path().join("output/book/final_result.md")).unwrap();
    assert!(md.find("FRAGMENT-ONE").unwrap() < md.find("FRAGMENT-TWO").unwrap());
}

#[tokio::test]
async fn manifest_unit_without_fragment_gets_placeholder() {
    let root = tempfile::tempdir().unwrap();
    let dir = fragments_dir(root.path(), "book");
    std::fs::write(dir.join("crop_000_000_title.md"), "# T").unwrap();
    std::fs::write(dir.join("crop_001_000_text.md"), "page two").unwrap();

    let manifest = RunManifest {
        source_dir: root.path().join("output/book/step1_rotated"),
        pages: vec![
            PageRecord {
                source_index: 0,
                file_name: "p0.png".into(),
                units: vec![
                    UnitKey::new(0, 0, Category::Title),
                    UnitKey::new(0, 1, Category::Text),
                ],
                error: None,
            },
            PageRecord {
                source_index: 1,
                file_name: "p1.png".into(),
                units: vec![UnitKey::new(1, 0, Category::Text)],
                error: None,
            },
        ],
    };
    manifest
        .save(&root.path().join("output/book/manifest.json"))
        .unwrap();

    let config = config_for(root.path(), "book", Stage::Merge);
    let report = run_pipeline(&config).await.unwrap();

    assert_eq!(report.merged_units, 3);
    assert_eq!(report.placeholders, 1);
    let merge = report.stage(Stage::Merge).unwrap();
    assert_eq!(
        merge.failures,
        vec![UnitError::MissingArtifact {
            name: "crop_000_001_text.md".into()
        }]
    );

    let md = std::fs::read_to_string(root.path().join("output/book/final_result.md")).unwrap();
    let placeholder = md.find("<!-- Error reading crop_000_001_text.md").unwrap();
    assert!(md.find("# T").unwrap() < placeholder);
    assert!(placeholder < md.find("page two").unwrap());
}

#[tokio::test]
async fn empty_fragment_dir_writes_no_document() {
    let root = tempfile::tempdir().unwrap();
    fragments_dir(root.path(), "empty");

    let config = config_for(root.path(), "empty", Stage::Merge);
    let report = run_pipeline(&config).await.unwrap();

    assert!(report.document.is_none());
    assert_eq!(report.merged_units, 0);
    assert!(!root.path().join("output/empty/final_result.md").exists());
}

#[tokio::test]
async fn segmentation_without_layout_engine_aborts() {
    let root = tempfile::tempdir().unwrap();
    let config = config_for(root.path(), "book", Stage::Segment);
    let err = run_pipeline(&config).await.unwrap_err();
    assert!(matches!(err, PipelineError::LayoutEngineNotConfigured));
}

#[tokio::test]
async fn merge_without_fragments_dir_aborts() {
    let root = tempfile::tempdir().unwrap();
    let config = config_for(root.path(), "never-run", Stage::Merge);
    let err = run_pipeline(&config).await.unwrap_err();
    assert!(matches!(err, PipelineError::InputDirNotFound { .. }));
}

#[tokio::test]
async fn corrupt_manifest_aborts_resume() {
    let root = tempfile::tempdir().unwrap();
    fragments_dir(root.path(), "book");
    std::fs::write(root.path().join("output/book/manifest.json"), "{not json").unwrap();

    let config = config_for(root.path(), "book", Stage::Merge);
    let err = run_pipeline(&config).await.unwrap_err();
    assert!(matches!(err, PipelineError::ManifestInvalid { .. }));
}

// ── Live end-to-end ──────────────────────────────────────────────────────────

/// Skip this test if E2E_ENABLED is not set *or* the input folder is absent.
macro_rules! e2e_skip_unless_ready {
    ($path:expr) => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP: set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        if std::env::var("SCAN2MD_LAYOUT_URL").is_err() {
            println!("SKIP: set SCAN2MD_LAYOUT_URL to a layout service");
            return;
        }
        let p: PathBuf = $path;
        if !p.is_dir() {
            println!("SKIP: input folder not found: {}", p.display());
            return;
        }
        p
    }};
}

#[tokio::test]
async fn e2e_full_run() {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("test_cases");
    let _input = e2e_skip_unless_ready!(root.join("input/sample"));
    let url = std::env::var("SCAN2MD_LAYOUT_URL").unwrap();

    let config = PipelineConfig::builder("sample")
        .input_root(root.join("input"))
        .output_root(root.join("output"))
        .layout_url(url)
        .build()
        .unwrap();
    let report = run_pipeline(&config).await.expect("run should succeed");

    assert_eq!(report.stages.len(), 5);
    let doc = report.document.as_ref().expect("document written");
    let md = std::fs::read_to_string(doc).unwrap();
    assert!(md.contains("<!-- Source: crop_000_"), "no unit blocks in output");
    println!("{} units merged, {} failures", report.merged_units, report.total_failures());
}
