use anyhow::{anyhow, Context, Result};
#[cfg(any(feature = "openvino", feature = "cuda"))]
use ort::ep::{self, ExecutionProvider};
use ort::session::{
    builder::{GraphOptimizationLevel, SessionBuilder},
    Session,
};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

pub const DETECTOR_FILE: &str = "face_detection_yunet_2023mar.onnx";
pub const RECOGNIZER_FILE: &str = "face_recognition_sface_2021dec.onnx";

pub const DETECTOR_URL: &str = "https://github.com/opencv/opencv_zoo/blob/main/models/face_detection_yunet/face_detection_yunet_2023mar.onnx?raw=true";
pub const RECOGNIZER_URL: &str = "https://github.com/opencv/opencv_zoo/blob/main/models/face_recognition_sface/face_recognition_sface_2021dec.onnx?raw=true";

/// Locations of the two model artifacts inside a model directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelPaths {
    pub detector: PathBuf,
    pub recognizer: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            detector: dir.join(DETECTOR_FILE),
            recognizer: dir.join(RECOGNIZER_FILE),
        }
    }

    pub fn exist(&self) -> bool {
        self.detector.is_file() && self.recognizer.is_file()
    }

    fn artifacts(&self) -> [(&Path, &'static str); 2] {
        [
            (self.detector.as_path(), DETECTOR_URL),
            (self.recognizer.as_path(), RECOGNIZER_URL),
        ]
    }
}

/// Make sure both models exist in `dir`, downloading the missing ones.
///
/// `report` receives one human-readable line per step.
pub fn ensure_models(dir: &Path, report: &mut dyn FnMut(String)) -> Result<ModelPaths> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("creating model directory {}", dir.display()))?;

    report("Checking models...".to_string());
    let paths = ModelPaths::in_dir(dir);
    for (path, url) in paths.artifacts() {
        if path.is_file() {
            log::debug!("model present: {}", path.display());
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        report(format!("Downloading {name}..."));
        if let Err(e) = download(url, path) {
            report(format!("Download of {name} failed: {e:#}"));
            return Err(e);
        }
    }
    report("All models ready.".to_string());

    Ok(paths)
}

fn download(url: &str, destination: &Path) -> Result<()> {
    let client = reqwest::blocking::Client::new();
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("requesting {url}"))?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "failed to download {}: {}",
            destination.display(),
            response.status()
        ));
    }

    // Partial downloads stay under `.part`.
    let tmp_path = destination.with_extension("part");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        response
            .copy_to(&mut writer)
            .with_context(|| format!("writing {}", tmp_path.display()))?;
    }
    std::fs::rename(&tmp_path, destination)?;
    log::info!("downloaded {}", destination.display());
    Ok(())
}

pub fn session_builder() -> Result<SessionBuilder> {
    #[allow(unused_mut)]
    let mut builder =
        Session::builder()?.with_optimization_level(GraphOptimizationLevel::Level3)?;

    #[cfg(feature = "openvino")]
    {
        let ep = ep::OpenVINO::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("openvino feature is enabled, onnx runtime not compiled with openvino")
        }
    }

    #[cfg(feature = "cuda")]
    {
        let ep = ep::CUDA::default();
        if ep.is_available()? {
            ep.register(&mut builder)?;
        } else {
            log::warn!("cuda feature is enabled, onnx runtime not compiled with cuda")
        }
    }

    Ok(builder)
}

pub fn recog_session(paths: &ModelPaths) -> Result<Session> {
    session_builder()?
        .commit_from_file(&paths.recognizer)
        .with_context(|| format!("load recognition model {}", paths.recognizer.display()))
}

pub fn detector_session(paths: &ModelPaths) -> Result<Session> {
    session_builder()?
        .commit_from_file(&paths.detector)
        .with_context(|| format!("load detector model {}", paths.detector.display()))
}
