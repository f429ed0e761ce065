//! # edgequake-scan2md
//!
//! Rebuild Markdown documents from scanned page images with a Vision
//! Language Model.
//!
//! ## Why this crate?
//!
//! Sending a whole scanned page to a VLM loses structure on dense layouts:
//! tables bleed into body text and headings get demoted. This crate cuts each
//! page into typed regions first, recognizes every region on its own with a
//! hint for its type, and stitches the fragments back together in a
//! deterministic order derived from their names.
//!
//! ## Pipeline Overview
//!
//! ```text
//! input/<name>/*.png
//!  │
//!  ├─ 1. Deskew     estimate page skew from straight lines and rotate it away
//!  ├─ 2. Segment    layout engine → crop_{SSS}_{RRR}_{category}.png
//!  ├─ 3. Normalize  pad crops below the minimum edge length with white
//!  ├─ 4. Recognize  one VLM call per crop, with retry → .md fragments
//!  └─ 5. Merge      order by identity and concatenate → final_result.md
//! ```
//!
//! A unit that fails at any stage is recorded and skipped; the run only
//! stops on fatal errors such as a missing input folder.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_scan2md::{run_pipeline, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder("book")
//!         .layout_url("http://localhost:8866/layout")
//!         .build()?;
//!     let report = run_pipeline(&config).await?;
//!     println!("{} units merged, {} failures", report.merged_units, report.total_failures());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `scan2md` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-scan2md = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod retry;
pub mod run;
pub mod unit;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DeskewOptions, MergeOrder, PipelineConfig, PipelineConfigBuilder};
pub use error::{LayoutError, PipelineError, UnitError};
pub use output::{Document, PageRecord, RunManifest, RunReport, Stage, StageReport};
pub use pipeline::layout::{BoundingBox, LayoutEngine, LayoutRegion, RemoteLayoutEngine};
pub use pipeline::merge::merge_directory;
pub use pipeline::recognize::{
    ProviderBackend, RecognitionBackend, RecognitionRequest, Transcript,
};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Reporter};
pub use retry::{Backoff, RetryPolicy};
pub use run::{run_pipeline, run_pipeline_sync};
pub use unit::{ArtifactName, Category, UnitKey};
