use anyhow::Result;
use facetag_vision::{face, DetectorParams, FaceEngine, ModelPaths, Pipeline};
use std::path::{Path, PathBuf};

fn model_paths() -> Option<ModelPaths> {
    let dir = std::env::var_os("FACETAG_MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("models"));
    let paths = ModelPaths::in_dir(&dir);
    if paths.exist() {
        Some(paths)
    } else {
        eprintln!("Skipping: models not found in {}", dir.display());
        None
    }
}

#[test]
fn test_pipeline_initialization() -> Result<()> {
    let Some(paths) = model_paths() else {
        return Ok(());
    };
    let _pipeline = Pipeline::load(&paths, DetectorParams::default())?;
    Ok(())
}

#[test]
fn test_blank_image_has_no_faces() -> Result<()> {
    env_logger::try_init().ok();
    let Some(paths) = model_paths() else {
        return Ok(());
    };
    let mut pipeline = Pipeline::load(&paths, DetectorParams::default())?;

    // Two different sizes in a row: the grid must follow each image.
    for (w, h) in [(320, 240), (173, 411)] {
        let img = image::DynamicImage::new_rgb8(w, h);
        assert!(pipeline.detect(&img)?.is_empty());
        assert!(pipeline.extract_first(&img)?.is_none());
    }
    Ok(())
}

#[test]
fn test_same_image_same_embedding() -> Result<()> {
    let Some(paths) = model_paths() else {
        return Ok(());
    };
    let img_path = Path::new("test_faces/face.jpg");
    if !img_path.exists() {
        eprintln!("Skipping: {} not found", img_path.display());
        return Ok(());
    }

    let mut pipeline = Pipeline::load(&paths, DetectorParams::default())?;
    let img = image::open(img_path)?;
    let Some(first) = pipeline.extract_first(&img)? else {
        eprintln!("No faces detected");
        return Ok(());
    };
    let again = pipeline.extract_first(&img)?.expect("face detected twice");

    assert_eq!(first.len(), 128);
    assert!((face::match_embedding(&first, &again) - 1.0).abs() < 1e-5);
    Ok(())
}
