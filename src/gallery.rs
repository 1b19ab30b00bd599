//! Gallery of enrolled face signatures and its on-disk store.
//!
//! The persisted record holds two index-aligned sequences, embeddings and
//! labels, encoded with postcard. Saving goes through a sibling temporary
//! file that is renamed over the destination, so a reader sees either the
//! previous gallery or the new one.

use anyhow::{Context, Result};
use facetag_vision::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GalleryError {
    #[error("gallery label must not be empty")]
    EmptyLabel,
    #[error("embedding has {actual} values, gallery uses {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Ordered (label, embedding) pairs. A label may appear several times.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; every embedding must have the length of the first.
    pub fn push(
        &mut self,
        label: impl Into<String>,
        embedding: Embedding,
    ) -> Result<(), GalleryError> {
        let label = label.into();
        if label.is_empty() {
            return Err(GalleryError::EmptyLabel);
        }
        if let Some(expected) = self.dim() {
            if embedding.len() != expected {
                return Err(GalleryError::DimensionMismatch {
                    expected,
                    actual: embedding.len(),
                });
            }
        }
        self.entries.push(GalleryEntry { label, embedding });
        Ok(())
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding length shared by all entries.
    pub fn dim(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    pub fn labels(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GalleryRecord {
    embeddings: Vec<Vec<f32>>,
    labels: Vec<String>,
}

impl From<&Gallery> for GalleryRecord {
    fn from(gallery: &Gallery) -> Self {
        Self {
            embeddings: gallery.entries.iter().map(|e| e.embedding.to_vec()).collect(),
            labels: gallery.entries.iter().map(|e| e.label.clone()).collect(),
        }
    }
}

impl TryFrom<GalleryRecord> for Gallery {
    type Error = anyhow::Error;

    fn try_from(record: GalleryRecord) -> Result<Self> {
        if record.embeddings.len() != record.labels.len() {
            anyhow::bail!(
                "{} embeddings but {} labels",
                record.embeddings.len(),
                record.labels.len()
            );
        }
        let mut gallery = Gallery::new();
        for (embedding, label) in record.embeddings.into_iter().zip(record.labels) {
            gallery.push(label, Embedding::from_vec(embedding))?;
        }
        Ok(gallery)
    }
}

/// Result of reading the persisted gallery.
#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(Gallery),
    Missing,
    Corrupt(anyhow::Error),
}

impl LoadOutcome {
    /// `(ok, entry count)`; anything but a successful read is `(false, 0)`.
    pub fn status(&self) -> (bool, usize) {
        match self {
            LoadOutcome::Loaded(gallery) => (true, gallery.len()),
            _ => (false, 0),
        }
    }

    pub fn into_gallery(self) -> Option<Gallery> {
        match self {
            LoadOutcome::Loaded(gallery) => Some(gallery),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GalleryStore {
    path: PathBuf,
}

impl GalleryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the gallery. Never fails: problems are folded into the outcome.
    pub fn load(&self) -> LoadOutcome {
        if !self.path.exists() {
            return LoadOutcome::Missing;
        }
        match self.read() {
            Ok(gallery) => {
                log::debug!(
                    "loaded {} gallery entries from {}",
                    gallery.len(),
                    self.path.display()
                );
                LoadOutcome::Loaded(gallery)
            }
            Err(e) => {
                log::warn!("unreadable gallery {}: {:#}", self.path.display(), e);
                LoadOutcome::Corrupt(e)
            }
        }
    }

    fn read(&self) -> Result<Gallery> {
        let data = std::fs::read(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        let record: GalleryRecord = postcard::from_bytes(&data)
            .with_context(|| format!("decoding {}", self.path.display()))?;
        Gallery::try_from(record)
    }

    /// Replace the persisted gallery with `gallery`.
    pub fn save(&self, gallery: &Gallery) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;

        let data = postcard::to_allocvec(&GalleryRecord::from(gallery))?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("creating temporary file in {}", parent.display()))?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;

        log::info!(
            "saved {} gallery entries to {}",
            gallery.len(),
            self.path.display()
        );
        Ok(())
    }
}
