use anyhow::{Context, Result};
use image::DynamicImage;
use ort::session::Session;

use crate::face::{self, Detection, DetectorParams, Embedding};
use crate::model::{self, ModelPaths};

/// Detector plus signature extractor, as seen by the enrollment and
/// identification pipelines.
pub trait FaceEngine {
    /// Locate faces, best score first. An empty result is not an error.
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>>;

    /// Signature of one detected face.
    fn extract(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding>;

    /// Signature of the first detected face only; any other face is ignored.
    fn extract_first(&mut self, img: &DynamicImage) -> Result<Option<Embedding>> {
        let detections = self.detect(img)?;
        match detections.first() {
            Some(first) => self.extract(img, first).map(Some),
            None => Ok(None),
        }
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    pub params: DetectorParams,
}

impl Pipeline {
    pub fn load(paths: &ModelPaths, params: DetectorParams) -> Result<Self> {
        Ok(Self {
            detector: model::detector_session(paths)?,
            encoder: model::recog_session(paths)?,
            params,
        })
    }
}

impl FaceEngine for Pipeline {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        face::detect_faces(&mut self.detector, img, &self.params).context("detecting faces")
    }

    fn extract(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let face_img = face::align_face(img, detection).context("aligning face")?;
        face::encode_face(&mut self.encoder, &face_img).context("encoding face")
    }
}
