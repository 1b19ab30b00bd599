//! Enrollment: turn `<root>/<label>/<images>` into a fresh gallery.
//!
//! Only the first face the detector returns is enrolled for each photo, and
//! photos without any detected face contribute nothing. Both cases are
//! counted in the [`EnrollReport`].

use log::{debug, info, warn};
use serde::Serialize;
use std::path::Path;

use crate::engine::EngineSlot;
use crate::error::{Error, Result};
use crate::gallery::{Gallery, GalleryStore};
use crate::runner::RunContext;
use crate::scan;
use facetag_vision::FaceEngine;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrollReport {
    /// Label directories visited.
    pub labels: usize,
    /// Image files considered.
    pub images: usize,
    /// Entries in the new gallery.
    pub embeddings: usize,
    pub skipped_no_face: usize,
    pub skipped_decode: usize,
    /// Images where detection or extraction failed.
    pub skipped_errors: usize,
}

/// Rebuild the gallery from `known_root` and persist it.
///
/// `gallery` is replaced only once every photo has been processed and the
/// new gallery is saved; on any error it is left as it was.
pub fn enroll<E: FaceEngine>(
    engine: &mut EngineSlot<E>,
    known_root: &Path,
    store: &GalleryStore,
    gallery: &mut Gallery,
    ctx: RunContext<'_>,
) -> Result<EnrollReport> {
    if !known_root.is_dir() {
        ctx.report(format!(
            "Error: directory {} not found.",
            known_root.display()
        ));
        return Err(Error::DirectoryNotFound(known_root.to_path_buf()));
    }

    let engine = match engine.get() {
        Ok(engine) => engine,
        Err(e) => {
            ctx.report(format!("Error: {e}"));
            return Err(e);
        }
    };

    let label_dirs = scan::list_label_dirs(known_root).map_err(|cause| Error::Scan {
        path: known_root.to_path_buf(),
        cause,
    })?;

    let mut fresh = Gallery::new();
    let mut report = EnrollReport {
        labels: label_dirs.len(),
        ..EnrollReport::default()
    };

    for (idx, (label, dir)) in label_dirs.iter().enumerate() {
        ctx.check_cancelled()?;
        ctx.report(format!("Analysing {} ({}/{})", label, idx + 1, label_dirs.len()));

        let files = match scan::list_images(dir) {
            Ok(files) => files,
            Err(e) => {
                warn!("cannot list {}: {}", dir.display(), e);
                ctx.report(format!("Skipped unreadable folder {}: {}", dir.display(), e));
                continue;
            }
        };

        for path in files {
            ctx.check_cancelled()?;
            report.images += 1;

            let img = match image::open(&path) {
                Ok(img) => img,
                Err(e) => {
                    warn!("cannot decode {}: {}", path.display(), e);
                    ctx.report(format!("Skipped unreadable image {}", path.display()));
                    report.skipped_decode += 1;
                    continue;
                }
            };

            let embedding = match engine.extract_first(&img) {
                Ok(Some(embedding)) => embedding,
                Ok(None) => {
                    debug!("no face in {}", path.display());
                    report.skipped_no_face += 1;
                    continue;
                }
                Err(e) => {
                    warn!("face extraction failed for {}: {:#}", path.display(), e);
                    ctx.report(format!("Skipped {}: {:#}", path.display(), e));
                    report.skipped_errors += 1;
                    continue;
                }
            };

            if let Err(e) = fresh.push(label.as_str(), embedding) {
                warn!("{}: {}", path.display(), e);
                ctx.report(format!("Skipped {}: {}", path.display(), e));
                report.skipped_errors += 1;
            }
        }
    }

    ctx.check_cancelled()?;
    report.embeddings = fresh.len();

    if report.skipped_no_face > 0 {
        ctx.report(format!(
            "Warning: {} photo(s) without a detectable face were not enrolled.",
            report.skipped_no_face
        ));
    }

    if let Err(e) = store.save(&fresh) {
        ctx.report(format!("Error: could not save gallery: {e:#}"));
        return Err(Error::Save {
            path: store.path().to_path_buf(),
            cause: e,
        });
    }

    *gallery = fresh;
    info!(
        "enrolled {} signature(s) for {} label(s)",
        report.embeddings, report.labels
    );
    ctx.report(format!(
        "Enrollment finished. {} signatures saved.",
        report.embeddings
    ));
    Ok(report)
}
