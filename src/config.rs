use anyhow::{Context, Result};
use directories::ProjectDirs;
use facetag_vision::DetectorParams;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Accepted range for the similarity threshold.
pub const THRESHOLD_RANGE: std::ops::RangeInclusive<f32> = 0.1..=0.9;

static PROJECT_DIRS: Lazy<Option<ProjectDirs>> =
    Lazy::new(|| ProjectDirs::from("", "", "facetag"));

pub static CONFIG_PATH: Lazy<PathBuf> = Lazy::new(|| {
    if let Some(path) = std::env::var_os("FACETAG_CONFIG_PATH") {
        return PathBuf::from(path);
    }
    PROJECT_DIRS
        .as_ref()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("facetag.toml"))
});

pub static DATA_DIR: Lazy<PathBuf> = Lazy::new(|| {
    PROJECT_DIRS
        .as_ref()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("facetag_data"))
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of `<label>/<images>` enrollment photos.
    pub known_dir: PathBuf,
    /// Flat directory of photos to identify and rename.
    pub unknown_dir: PathBuf,
    /// Cosine similarity a match must exceed.
    pub threshold: f32,
    pub model_dir: PathBuf,
    pub gallery_path: PathBuf,
    pub detector: DetectorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            known_dir: PathBuf::from("known_faces"),
            unknown_dir: PathBuf::from("unknown_faces"),
            threshold: 0.4,
            model_dir: DATA_DIR.join("models"),
            gallery_path: DATA_DIR.join("known_faces.bin"),
            detector: DetectorConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let params = DetectorParams::default();
        Self {
            score_threshold: params.score_threshold,
            nms_threshold: params.nms_threshold,
            top_k: params.top_k,
        }
    }
}

impl From<&DetectorConfig> for DetectorParams {
    fn from(cfg: &DetectorConfig) -> Self {
        Self {
            score_threshold: cfg.score_threshold,
            nms_threshold: cfg.nms_threshold,
            top_k: cfg.top_k,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !THRESHOLD_RANGE.contains(&self.threshold) {
            anyhow::bail!(
                "threshold {} outside of {}..={}",
                self.threshold,
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            );
        }
        if !(0.0..=1.0).contains(&self.detector.score_threshold)
            || !(0.0..=1.0).contains(&self.detector.nms_threshold)
        {
            anyhow::bail!("detector thresholds must lie within 0..=1");
        }
        Ok(())
    }
}

pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.unwrap_or(&CONFIG_PATH);
    if !path.exists() {
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config at {}", path.display()))?;
    let cfg: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

pub fn save_config(cfg: &Config, path: Option<&Path>) -> Result<()> {
    let path = path.unwrap_or(&CONFIG_PATH);
    let data = toml::to_string_pretty(cfg)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, data)?;
    Ok(())
}
