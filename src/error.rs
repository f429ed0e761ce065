//! Error types for the edgequake-scan2md library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`] is **fatal**: a stage cannot run at all (input folder
//!   missing, output directory not writable, stage task crashed, provider not
//!   configured). Returned as `Err(PipelineError)` from the orchestrator,
//!   which stops the run before any later stage touches an incomplete
//!   directory.
//!
//! * [`UnitError`] is **non-fatal**: one page or one unit failed (unreadable
//!   image, layout engine error, recognition exhausted its retries). Stored in
//!   [`crate::output::StageReport::failures`] while the stage carries on with
//!   the remaining files.
//!
//! [`LayoutError`] is what a [`crate::pipeline::layout::LayoutEngine`]
//! returns; segmentation demotes it to a [`UnitError::LayoutFailed`].

use crate::output::Stage;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-scan2md library.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The run's input folder (or a stage's input directory) does not exist.
    #[error("Input directory not found: '{path}'\nCheck the folder exists under the input root.")]
    InputDirNotFound { path: PathBuf },

    /// The input directory exists but could not be listed.
    #[error("Failed to read directory '{path}': {source}")]
    ReadDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `manifest.json` exists but is not a valid manifest.
    #[error("Manifest '{path}' is invalid: {detail}")]
    ManifestInvalid { path: PathBuf, detail: String },

    // ── Collaborator errors ───────────────────────────────────────────────
    /// The recognition provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// Segmentation is part of the run but no layout engine was supplied.
    #[error(
        "No layout engine configured.\n\
Set --layout-url (or SCAN2MD_LAYOUT_URL) to a layout detection service, \
or start the run after segmentation with --from normalize."
    )]
    LayoutEngineNotConfigured,

    // ── Stage errors ──────────────────────────────────────────────────────
    /// A stage crashed or could not complete; later stages are not attempted.
    #[error("Stage '{stage}' failed: {detail}")]
    StageFailed { stage: Stage, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create a stage output directory.
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write a run-level artifact (document, manifest, log).
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single page or unit.
///
/// `name` is always the file name the failure is about, so a report can be
/// matched back to the directory listing.
#[derive(Debug, Clone, Error, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum UnitError {
    /// The image could not be opened or decoded.
    #[error("{name}: unreadable image: {detail}")]
    UnreadableImage { name: String, detail: String },

    /// The layout engine failed on this page.
    #[error("{name}: layout engine failed: {detail}")]
    LayoutFailed { name: String, detail: String },

    /// The manifest lists this unit but the stage input has no artifact for it.
    #[error("{name}: no artifact in stage input")]
    MissingArtifact { name: String },

    /// The image could not be encoded for the recognition request.
    #[error("{name}: image encoding failed: {detail}")]
    EncodeFailed { name: String, detail: String },

    /// Recognition failed on every attempt.
    #[error("{name}: recognition failed after {attempts} attempts: {detail}")]
    RecognitionFailed {
        name: String,
        attempts: u32,
        detail: String,
    },

    /// A text artifact exists but could not be read.
    #[error("{name}: read failed: {detail}")]
    ReadFailed { name: String, detail: String },

    /// The stage output for this unit could not be written.
    #[error("{name}: write failed: {detail}")]
    WriteFailed { name: String, detail: String },
}

impl UnitError {
    /// File name the failure refers to.
    pub fn name(&self) -> &str {
        match self {
            UnitError::UnreadableImage { name, .. }
            | UnitError::LayoutFailed { name, .. }
            | UnitError::MissingArtifact { name }
            | UnitError::EncodeFailed { name, .. }
            | UnitError::RecognitionFailed { name, .. }
            | UnitError::ReadFailed { name, .. }
            | UnitError::WriteFailed { name, .. } => name,
        }
    }
}

/// Failure reported by a layout engine for one page.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// Transport-level failure talking to a remote engine.
    #[error("layout request failed: {0}")]
    Request(String),

    /// The engine answered with a non-success status.
    #[error("layout engine returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The engine answered with something we could not interpret.
    #[error("invalid layout response: {0}")]
    InvalidResponse(String),

    /// The page image could not be prepared for the engine.
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_failed_display_names_stage() {
        let e = PipelineError::StageFailed {
            stage: Stage::Normalize,
            detail: "task panicked".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("normalize"), "got: {msg}");
        assert!(msg.contains("task panicked"), "got: {msg}");
    }

    #[test]
    fn recognition_failed_display() {
        let e = UnitError::RecognitionFailed {
            name: "crop_000_001_text.png".into(),
            attempts: 3,
            detail: "503".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("3 attempts"), "got: {msg}");
        assert!(msg.starts_with("crop_000_001_text.png"), "got: {msg}");
    }

    #[test]
    fn unit_error_name_accessor() {
        let e = UnitError::MissingArtifact {
            name: "crop_001_000_table".into(),
        };
        assert_eq!(e.name(), "crop_001_000_table");
    }

    #[test]
    fn unit_error_serialises() {
        let e = UnitError::UnreadableImage {
            name: "page.png".into(),
            detail: "bad header".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: UnitError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
    }

    #[test]
    fn layout_not_configured_has_hint() {
        let msg = PipelineError::LayoutEngineNotConfigured.to_string();
        assert!(msg.contains("--layout-url"), "got: {msg}");
    }
}
