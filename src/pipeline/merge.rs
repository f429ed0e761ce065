//! Reassembly: order the Markdown fragments and concatenate them.
//!
//! Ordering is decided purely from unit identities, never from file contents:
//!
//! - [`MergeOrder::TypePriority`]: `(source_index, priority, region_index)`,
//!   which lifts titles above body text above figures and tables within a page.
//! - [`MergeOrder::Natural`]: `(source_index, region_index)`, the visual
//!   top-to-bottom order segmentation assigned.
//!
//! Names that do not follow the unit scheme sort after every unit. Each unit
//! becomes one block:
//!
//! ```text
//! <!-- Source: crop_000_000_title.md (title) -->
//! <trimmed fragment text>
//!
//! ```
//!
//! A fragment that is missing or unreadable becomes a placeholder comment
//! and reassembly continues.

use crate::config::MergeOrder;
use crate::error::{PipelineError, UnitError};
use crate::output::{stem_of, write_atomic, Document, RunManifest, Stage, StageReport};
use crate::pipeline::input::{file_name, list_files, TEXT_EXTENSION};
use crate::progress::Reporter;
use crate::unit::ArtifactName;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// One expected fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeEntry {
    pub name: ArtifactName,
    /// `{stem}.md`
    pub file_name: String,
    pub path: PathBuf,
    /// Upstream failure recorded for this unit, if any.
    pub failure: Option<String>,
}

/// Every `.md` file in `dir`, identified by its file name.
pub fn entries_from_dir(dir: &Path) -> Result<Vec<MergeEntry>, PipelineError> {
    Ok(list_files(dir, &[TEXT_EXTENSION])?
        .into_iter()
        .map(|path| {
            let file_name = file_name(&path);
            MergeEntry {
                name: ArtifactName::parse(stem_of(&file_name)),
                file_name,
                path,
                failure: None,
            }
        })
        .collect())
}

/// One entry per unit in `manifest`, whether or not its fragment exists.
///
/// `failures` maps unit stems to the reason an upstream stage gave up on them.
pub fn entries_from_manifest(
    manifest: &RunManifest,
    dir: &Path,
    failures: &HashMap<String, String>,
) -> Vec<MergeEntry> {
    manifest
        .units()
        .map(|key| {
            let stem = key.stem();
            let file_name = key.file_name(TEXT_EXTENSION);
            MergeEntry {
                name: ArtifactName::Unit(*key),
                path: dir.join(&file_name),
                failure: failures.get(&stem).cloned(),
                file_name,
            }
        })
        .collect()
}

/// Sort entries for reassembly. Ties fall back to the file name.
pub fn sort_entries(entries: &mut [MergeEntry], order: MergeOrder) {
    entries.sort_by(|a, b| {
        let primary = match order {
            MergeOrder::TypePriority => a.name.cmp_type_priority(&b.name),
            MergeOrder::Natural => a.name.cmp_natural(&b.name),
        };
        primary.then_with(|| a.file_name.cmp(&b.file_name))
    });
}

/// Document heading naming the fragment directory.
pub fn header(source: &Path) -> String {
    format!("# Merged Content from {}\n\n", source.display())
}

fn provenance(entry: &MergeEntry) -> String {
    format!("<!-- Source: {} ({}) -->\n", entry.file_name, entry.name.label())
}

fn placeholder(file_name: &str, reason: &str) -> String {
    format!("<!-- Error reading {file_name}: {reason} -->\n\n")
}

/// Concatenate `entries` in the given order.
///
/// Returns the document and the per-entry failures behind its placeholders.
/// Every entry is reported to `reporter` as complete or failed.
pub fn assemble(
    entries: &[MergeEntry],
    source: &Path,
    reporter: &Reporter,
) -> (Document, Vec<UnitError>) {
    let mut markdown = header(source);
    let mut failures = Vec::new();

    for entry in entries {
        match std::fs::read_to_string(&entry.path) {
            Ok(content) => {
                markdown.push_str(&provenance(entry));
                markdown.push_str(content.trim());
                markdown.push_str("\n\n");
                reporter.unit_complete(Stage::Merge, &entry.file_name);
            }
            Err(e) => {
                let error = if e.kind() == std::io::ErrorKind::NotFound {
                    UnitError::MissingArtifact {
                        name: entry.file_name.clone(),
                    }
                } else {
                    UnitError::ReadFailed {
                        name: entry.file_name.clone(),
                        detail: e.to_string(),
                    }
                };
                let reason = match &entry.failure {
                    Some(upstream) => upstream.clone(),
                    None => error.to_string(),
                };
                warn!("Placeholder for {}: {}", entry.file_name, reason);
                markdown.push_str(&placeholder(&entry.file_name, &reason));
                reporter.unit_error(Stage::Merge, &entry.file_name, &reason);
                failures.push(error);
            }
        }
    }

    let placeholders = failures.len();
    (
        Document {
            markdown,
            merged: entries.len(),
            placeholders,
        },
        failures,
    )
}

/// Reassemble any directory of fragments from file names alone.
///
/// Nothing is written; an empty directory yields a document with only the
/// header and zero merged units.
pub fn merge_directory(dir: &Path, order: MergeOrder) -> Result<Document, PipelineError> {
    let mut entries = entries_from_dir(dir)?;
    sort_entries(&mut entries, order);
    Ok(assemble(&entries, dir, &Reporter::default()).0)
}

/// Merge stage: reassemble `fragments_dir` into `document_path`.
///
/// With a manifest the expected set is the manifest's units, so units lost
/// upstream still get a placeholder carrying their recorded failure. An empty
/// set writes no document and returns `None`.
pub fn run(
    fragments_dir: &Path,
    document_path: &Path,
    manifest: Option<&RunManifest>,
    failures: &HashMap<String, String>,
    order: MergeOrder,
    reporter: &Reporter,
) -> Result<(StageReport, Option<Document>), PipelineError> {
    let start = Instant::now();
    let mut entries = match manifest {
        Some(m) => entries_from_manifest(m, fragments_dir, failures),
        None => entries_from_dir(fragments_dir)?,
    };

    let mut report = StageReport::new(Stage::Merge);
    report.total = entries.len();
    reporter.stage_start(Stage::Merge, entries.len());

    if entries.is_empty() {
        info!("No markdown fragments found in {}", fragments_dir.display());
        report.duration_ms = start.elapsed().as_millis() as u64;
        reporter.stage_complete(&report);
        return Ok((report, None));
    }

    sort_entries(&mut entries, order);
    info!(
        "Merging {} fragments from {} ({:?} order)",
        entries.len(),
        fragments_dir.display(),
        order
    );

    let (document, unit_failures) = assemble(&entries, fragments_dir, reporter);
    write_atomic(document_path, document.markdown.as_bytes())?;

    report.succeeded = document.merged - document.placeholders;
    report.units = document.merged;
    report.failures = unit_failures;
    report.duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Merged {} fragments into {} ({} placeholders)",
        document.merged,
        document_path.display(),
        document.placeholders
    );
    reporter.stage_complete(&report);
    Ok((report, Some(document)))
}
