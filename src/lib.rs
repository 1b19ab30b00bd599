pub mod config;
pub mod engine;
pub mod enroll;
pub mod error;
pub mod gallery;
pub mod identify;
pub mod matcher;
pub mod progress;
pub mod rename;
pub mod runner;
pub mod scan;

pub use error::{Error, Result};

// Re-export vision types for convenience
pub use facetag_vision::{face, model, pipeline, Detection, Embedding, FaceEngine, Pipeline};
