use std::path::PathBuf;
use thiserror::Error;

/// Failures that abort a whole enrollment or identification run.
///
/// Per-file problems (undecodable images, rename failures) never show up
/// here; they are reported and counted instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("models are not available: {0:#}")]
    Provisioning(anyhow::Error),
    #[error("directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),
    #[error("no gallery loaded, run enrollment first")]
    EmptyGallery,
    #[error("another run is already active")]
    Busy,
    #[error("run cancelled")]
    Cancelled,
    #[error("listing {}: {cause}", path.display())]
    Scan {
        path: PathBuf,
        cause: std::io::Error,
    },
    #[error("saving gallery to {}: {cause:#}", path.display())]
    Save {
        path: PathBuf,
        cause: anyhow::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
