//! Batch identification: recognise the people in every photo of a flat
//! directory and rename each photo after them.

use anyhow::Context;
use image::DynamicImage;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::engine::EngineSlot;
use crate::error::{Error, Result};
use crate::gallery::Gallery;
use crate::matcher;
use crate::rename::{self, RenameOutcome};
use crate::runner::RunContext;
use crate::scan;
use facetag_vision::FaceEngine;

/// A progress line is reported before every `PROGRESS_EVERY`-th file.
pub const PROGRESS_EVERY: usize = 5;

/// A photo in which at least one face was detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedRecord {
    /// Path after any rename.
    pub path: PathBuf,
    pub labels: BTreeSet<String>,
    pub renamed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentifyReport {
    /// Image files found in the directory.
    pub files: usize,
    /// Images that decoded successfully.
    pub processed: usize,
    pub renamed: usize,
    pub skipped_no_face: usize,
    pub skipped_decode: usize,
    /// Images where detection or extraction failed.
    pub skipped_errors: usize,
    pub rename_failures: usize,
    pub records: Vec<ProcessedRecord>,
}

impl IdentifyReport {
    /// Write the report as pretty JSON for later review.
    pub fn write_json(&self, path: &Path) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}

/// Labels accepted for the faces of one image, or `None` without faces.
pub fn recognise<E: FaceEngine>(
    engine: &mut E,
    img: &DynamicImage,
    gallery: &Gallery,
    threshold: f32,
) -> anyhow::Result<Option<BTreeSet<String>>> {
    let detections = engine.detect(img)?;
    if detections.is_empty() {
        return Ok(None);
    }

    let mut found = BTreeSet::new();
    for detection in &detections {
        let probe = engine.extract(img, detection)?;
        if let Some(dim) = gallery.dim() {
            anyhow::ensure!(
                probe.len() == dim,
                "probe has {} values, gallery uses {}",
                probe.len(),
                dim
            );
        }
        let result = matcher::best_match(&probe, gallery, threshold);
        debug!("face at {:?}: {}", detection.bbox, result);
        if let Some(label) = result.label {
            found.insert(label);
        }
    }
    Ok(Some(found))
}

/// Identify every image in `dir` against `gallery` and rename matches.
pub fn identify<E: FaceEngine>(
    engine: &mut EngineSlot<E>,
    dir: &Path,
    gallery: &Gallery,
    threshold: f32,
    ctx: RunContext<'_>,
) -> Result<IdentifyReport> {
    if gallery.is_empty() {
        ctx.report("Error: no signatures loaded. Run enrollment first.");
        return Err(Error::EmptyGallery);
    }

    if !dir.is_dir() {
        ctx.report(format!("Error: directory {} not found.", dir.display()));
        return Err(Error::DirectoryNotFound(dir.to_path_buf()));
    }

    let engine = match engine.get() {
        Ok(engine) => engine,
        Err(e) => {
            ctx.report(format!("Error: {e}"));
            return Err(e);
        }
    };

    let files = scan::list_images(dir).map_err(|cause| Error::Scan {
        path: dir.to_path_buf(),
        cause,
    })?;

    let mut report = IdentifyReport {
        files: files.len(),
        ..IdentifyReport::default()
    };

    for (idx, path) in files.iter().enumerate() {
        ctx.check_cancelled()?;
        if idx % PROGRESS_EVERY == 0 {
            ctx.report(format!("Processing {}/{}...", idx + 1, files.len()));
        }

        let img = match image::open(path) {
            Ok(img) => img,
            Err(e) => {
                warn!("cannot decode {}: {}", path.display(), e);
                ctx.report(format!("Skipped unreadable image {}", path.display()));
                report.skipped_decode += 1;
                continue;
            }
        };
        report.processed += 1;

        let labels = match recognise(engine, &img, gallery, threshold) {
            Ok(Some(labels)) => labels,
            Ok(None) => {
                report.skipped_no_face += 1;
                continue;
            }
            Err(e) => {
                warn!("recognition failed for {}: {:#}", path.display(), e);
                ctx.report(format!("Skipped {}: {:#}", path.display(), e));
                report.skipped_errors += 1;
                continue;
            }
        };

        let mut record = ProcessedRecord {
            path: path.clone(),
            labels,
            renamed: false,
        };

        if !record.labels.is_empty() {
            let old_name = display_name(path);
            match rename::rename_for_labels(path, &record.labels) {
                RenameOutcome::Renamed(new_path) => {
                    ctx.report(format!("Renamed: {} -> {}", old_name, display_name(&new_path)));
                    report.renamed += 1;
                    record.path = new_path;
                    record.renamed = true;
                }
                RenameOutcome::AlreadyNamed => {
                    debug!("{} already named", old_name);
                }
                RenameOutcome::Failed(e) => {
                    warn!("cannot rename {}: {}", path.display(), e);
                    ctx.report(format!("Error: could not rename {}: {}", old_name, e));
                    report.rename_failures += 1;
                }
            }
        }

        report.records.push(record);
    }

    info!(
        "identified {} of {} image(s), {} renamed",
        report.records.iter().filter(|r| !r.labels.is_empty()).count(),
        report.files,
        report.renamed
    );
    ctx.report(format!(
        "Processing finished. {} images renamed out of {} ({} processed).",
        report.renamed, report.files, report.processed
    ));
    Ok(report)
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
