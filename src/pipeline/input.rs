//! Input resolution: the run directory layout and stage input listings.
//!
//! Every stage reads one directory and writes another. Listings are sorted
//! by file name so that `source_index` (segmentation) and processing order
//! are derived only from the directory contents, never from timing.

use crate::error::{PipelineError, UnitError};
use crate::output::{stem_of, RunManifest};
use crate::unit::ArtifactName;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Raster extensions accepted at every image stage (lower-case, no dot).
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];

/// Extension of recognised text artifacts.
pub const TEXT_EXTENSION: &str = "md";

/// Directory layout of one run.
///
/// ```text
/// input/<name>/                     source pages
/// output/<name>/step1_rotated/      deskewed pages
/// output/<name>/step2_crops/        segmented units
/// output/<name>/step2_padded/       normalized units
/// output/<name>/step3_md_fragments/ recognised text
/// output/<name>/final_result.md     the document
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub rotated_dir: PathBuf,
    pub crops_dir: PathBuf,
    pub padded_dir: PathBuf,
    pub fragments_dir: PathBuf,
    pub document: PathBuf,
    pub log_file: PathBuf,
    pub manifest: PathBuf,
}

impl RunPaths {
    pub fn new(input_root: &Path, output_root: &Path, folder_name: &str) -> Self {
        let output_dir = output_root.join(folder_name);
        Self {
            input_dir: input_root.join(folder_name),
            rotated_dir: output_dir.join("step1_rotated"),
            crops_dir: output_dir.join("step2_crops"),
            padded_dir: output_dir.join("step2_padded"),
            fragments_dir: output_dir.join("step3_md_fragments"),
            document: output_dir.join("final_result.md"),
            log_file: output_dir.join("processing_log.txt"),
            manifest: output_dir.join("manifest.json"),
            output_dir,
        }
    }
}

/// Whether `path` has one of the [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn is_image(path: &Path) -> bool {
    has_extension(path, &IMAGE_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| e.eq_ignore_ascii_case(x)))
        .unwrap_or(false)
}

/// Fail unless `dir` exists and is a directory.
pub fn require_dir(dir: &Path) -> Result<(), PipelineError> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(PipelineError::InputDirNotFound {
            path: dir.to_path_buf(),
        })
    }
}

/// Create `dir` and its parents.
pub fn ensure_dir(dir: &Path) -> Result<(), PipelineError> {
    std::fs::create_dir_all(dir).map_err(|source| PipelineError::CreateDirFailed {
        path: dir.to_path_buf(),
        source,
    })
}

/// Files in `dir` with one of `extensions`, sorted by file name.
pub fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, PipelineError> {
    require_dir(dir)?;
    let read_err = |source| PipelineError::ReadDirFailed {
        path: dir.to_path_buf(),
        source,
    };
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_err)? {
        let path = entry.map_err(read_err)?.path();
        if path.is_file() && has_extension(&path, extensions) {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    debug!("Listed {} files in {}", files.len(), dir.display());
    Ok(files)
}

/// Raster images in `dir`, sorted by file name.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    list_files(dir, &IMAGE_EXTENSIONS)
}

/// File name of `path` as UTF-8 (lossy).
pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// One unit image handed to recognition.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitInput {
    pub name: ArtifactName,
    pub stem: String,
    pub path: PathBuf,
}

/// Resolve the unit images of a stage directory.
///
/// With a manifest, the expected set is the manifest's units: each is looked
/// up by stem, and units without a file come back as
/// [`UnitError::MissingArtifact`]. Files not in the manifest are ignored.
/// Without one, every image in `dir` is a unit and its identity is parsed
/// from the file name.
///
/// Inputs are returned in natural `(source_index, region_index)` order.
pub fn unit_inputs(
    dir: &Path,
    manifest: Option<&RunManifest>,
) -> Result<(Vec<UnitInput>, Vec<UnitError>), PipelineError> {
    let files = list_images(dir)?;

    let Some(manifest) = manifest else {
        let mut inputs: Vec<UnitInput> = files
            .into_iter()
            .map(|path| {
                let stem = stem_of(&file_name(&path)).to_string();
                UnitInput {
                    name: ArtifactName::parse(&stem),
                    stem,
                    path,
                }
            })
            .collect();
        inputs.sort_by(|a, b| a.name.cmp_natural(&b.name).then_with(|| a.stem.cmp(&b.stem)));
        return Ok((inputs, Vec::new()));
    };

    let mut by_stem: HashMap<String, PathBuf> = HashMap::with_capacity(files.len());
    for path in files {
        // First match in name order wins when two extensions share a stem.
        by_stem
            .entry(stem_of(&file_name(&path)).to_string())
            .or_insert(path);
    }

    let mut inputs = Vec::with_capacity(manifest.unit_count());
    let mut missing = Vec::new();
    for key in manifest.units() {
        let stem = key.stem();
        match by_stem.remove(&stem) {
            Some(path) => inputs.push(UnitInput {
                name: ArtifactName::Unit(*key),
                stem,
                path,
            }),
            None => missing.push(UnitError::MissingArtifact { name: stem }),
        }
    }
    inputs.sort_by(|a, b| a.name.cmp_natural(&b.name));
    Ok((inputs, missing))
}
