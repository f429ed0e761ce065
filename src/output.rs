//! Result types: stages, per-stage reports, the run manifest and the final
//! document.
//!
//! Per-unit failures are values here, not errors: a stage always returns a
//! [`StageReport`] listing what succeeded and what did not, and the run
//! collects those into a [`RunReport`]. Only a fatal
//! [`crate::error::PipelineError`] stops a run.

use crate::error::{PipelineError, UnitError};
use crate::unit::UnitKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Deskew,
    Segment,
    Normalize,
    Recognize,
    Merge,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Deskew,
        Stage::Segment,
        Stage::Normalize,
        Stage::Recognize,
        Stage::Merge,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Deskew => "deskew",
            Stage::Segment => "segment",
            Stage::Normalize => "normalize",
            Stage::Recognize => "recognize",
            Stage::Merge => "merge",
        }
    }

    /// One-based position, used in log banners.
    pub fn number(self) -> usize {
        self as usize + 1
    }

    pub fn description(self) -> &'static str {
        match self {
            Stage::Deskew => "Image rotation & deskewing",
            Stage::Segment => "Layout analysis & segmentation",
            Stage::Normalize => "Minimum-size padding",
            Stage::Recognize => "VLM content recognition",
            Stage::Merge => "Final document merging",
        }
    }

    /// Stages from `self` to the end of the pipeline.
    pub fn remaining(self) -> impl Iterator<Item = Stage> {
        Self::ALL.into_iter().filter(move |s| *s >= self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage over its whole input directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: Stage,
    /// Files or units the stage attempted.
    pub total: usize,
    /// Artifacts written (or, for in-place normalization, already valid).
    pub succeeded: usize,
    /// Per-unit failures; each left no artifact behind.
    pub failures: Vec<UnitError>,
    /// Units created (segmentation) or merged (reassembly).
    pub units: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            total: 0,
            succeeded: 0,
            failures: Vec::new(),
            units: 0,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Failure reasons keyed by the failing file's stem.
    pub fn failures_by_stem(&self) -> HashMap<String, String> {
        self.failures
            .iter()
            .map(|e| (stem_of(e.name()).to_string(), e.to_string()))
            .collect()
    }
}

/// Summary of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub folder: String,
    pub output_dir: PathBuf,
    pub stages: Vec<StageReport>,
    /// `None` when there was nothing to merge.
    pub document: Option<PathBuf>,
    pub merged_units: usize,
    pub placeholders: usize,
    pub total_duration_ms: u64,
}

impl RunReport {
    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|r| r.stage == stage)
    }

    pub fn total_failures(&self) -> usize {
        self.stages.iter().map(StageReport::failed).sum()
    }
}

/// Per-page entry of the run manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub source_index: usize,
    pub file_name: String,
    pub units: Vec<UnitKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Typed record of every unit segmentation created.
///
/// Written to `manifest.json` so later stages (and resumed runs) know the
/// full expected unit set instead of inferring it from whichever files
/// happen to exist.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub source_dir: PathBuf,
    pub pages: Vec<PageRecord>,
}

impl RunManifest {
    /// All units, page by page in region order.
    pub fn units(&self) -> impl Iterator<Item = &UnitKey> {
        self.pages.iter().flat_map(|p| p.units.iter())
    }

    pub fn unit_count(&self) -> usize {
        self.pages.iter().map(|p| p.units.len()).sum()
    }

    /// Load a manifest; `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, PipelineError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::ManifestInvalid {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })
            }
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| PipelineError::ManifestInvalid {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Internal(format!("manifest serialisation: {e}")))?;
        write_atomic(path, json.as_bytes())
    }
}

/// The reassembled Markdown document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub markdown: String,
    /// Units emitted, placeholders included.
    pub merged: usize,
    /// Units emitted as an error placeholder.
    pub placeholders: usize,
}

/// File stem of `name` (everything before the last `.`).
pub(crate) fn stem_of(name: &str) -> &str {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(name)
}

/// Write `bytes` to `path` via a temp file in the same directory + rename,
/// so readers never observe a partially written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let write_err = |source| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(write_err)?;
    tmp.write_all(bytes).map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::Category;

    #[test]
    fn stages_are_ordered() {
        let rest: Vec<Stage> = Stage::Normalize.remaining().collect();
        assert_eq!(rest, vec![Stage::Normalize, Stage::Recognize, Stage::Merge]);
        assert_eq!(Stage::Deskew.number(), 1);
        assert_eq!(Stage::Merge.number(), 5);
    }

    #[test]
    fn failures_by_stem_strips_extension() {
        let mut report = StageReport::new(Stage::Recognize);
        report.failures.push(UnitError::RecognitionFailed {
            name: "crop_000_001_text.png".into(),
            attempts: 3,
            detail: "timeout".into(),
        });
        let map = report.failures_by_stem();
        assert!(map["crop_000_001_text"].contains("timeout"));
    }

    #[test]
    fn manifest_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = RunManifest {
            source_dir: PathBuf::from("input/book"),
            pages: vec![
                PageRecord {
                    source_index: 0,
                    file_name: "p1.png".into(),
                    units: vec![
                        UnitKey::new(0, 0, Category::Title),
                        UnitKey::new(0, 1, Category::Text),
                    ],
                    error: None,
                },
                PageRecord {
                    source_index: 1,
                    file_name: "p2.png".into(),
                    units: vec![],
                    error: Some("unreadable".into()),
                },
            ],
        };
        manifest.save(&path).unwrap();
        let loaded = RunManifest::load(&path).unwrap().unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(loaded.unit_count(), 2);
    }

    #[test]
    fn missing_manifest_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunManifest::load(&dir.path().join("nope.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn corrupt_manifest_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            RunManifest::load(&path),
            Err(PipelineError::ManifestInvalid { .. })
        ));
    }
}
