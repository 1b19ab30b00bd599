//! Deterministic, collision-safe renaming of identified photos.
//!
//! A photo showing `{"Bob", "Aimine"}` becomes `Aimine_Bob.<ext>`, or
//! `Aimine_Bob_2.<ext>`, `Aimine_Bob_3.<ext>`, ... when that name is taken by
//! another file. A file that already carries its target name is left alone,
//! which makes repeated runs over the same directory a no-op.

use std::collections::BTreeSet;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum RenameOutcome {
    Renamed(PathBuf),
    AlreadyNamed,
    Failed(io::Error),
}

/// Labels in lexicographic order joined with `_`.
pub fn base_name(labels: &BTreeSet<String>) -> String {
    labels.iter().map(String::as_str).collect::<Vec<_>>().join("_")
}

fn file_name(base: &str, suffix: Option<u32>, ext: Option<&std::ffi::OsStr>) -> OsString {
    let mut name = OsString::from(base);
    if let Some(n) = suffix {
        name.push(format!("_{n}"));
    }
    if let Some(ext) = ext {
        name.push(".");
        name.push(ext);
    }
    name
}

/// Final path `source` should carry for `labels`.
///
/// Returns `source` itself when it already has the target name.
pub fn target_path(source: &Path, labels: &BTreeSet<String>) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new(""));
    let ext = source.extension();
    let base = base_name(labels);

    let mut candidate = dir.join(file_name(&base, None, ext));
    let mut counter = 2;
    while candidate != source && candidate.exists() {
        candidate = dir.join(file_name(&base, Some(counter), ext));
        counter += 1;
    }
    candidate
}

/// Rename `source` after `labels`, which must not be empty.
pub fn rename_for_labels(source: &Path, labels: &BTreeSet<String>) -> RenameOutcome {
    debug_assert!(!labels.is_empty());
    let target = target_path(source, labels);
    if target == source {
        return RenameOutcome::AlreadyNamed;
    }
    match std::fs::rename(source, &target) {
        Ok(()) => RenameOutcome::Renamed(target),
        Err(e) => RenameOutcome::Failed(e),
    }
}
