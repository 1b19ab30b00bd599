//! Enrollment and identification end to end, with a scripted face engine in
//! place of the ONNX models.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use facetag::engine::EngineSlot;
use facetag::enroll::{self, EnrollReport};
use facetag::gallery::{Gallery, GalleryStore};
use facetag::identify;
use facetag::progress::{self, Event};
use facetag::runner::{CancelToken, RunContext, Runner};
use facetag::{Detection, Embedding, Error, FaceEngine};
use image::DynamicImage;

/// Image width selects the faces "seen" in a photo; each face yields the
/// scripted embedding at its index.
#[derive(Default)]
struct ScriptedEngine {
    faces: HashMap<u32, Vec<Vec<f32>>>,
    /// Files deleted while an image of that width is being detected.
    vanish: HashMap<u32, PathBuf>,
}

impl ScriptedEngine {
    fn with(mut self, width: u32, faces: &[&[f32]]) -> Self {
        self.faces
            .insert(width, faces.iter().map(|f| f.to_vec()).collect());
        self
    }

    fn removing(mut self, width: u32, path: &Path) -> Self {
        self.vanish.insert(width, path.to_path_buf());
        self
    }
}

impl FaceEngine for ScriptedEngine {
    fn detect(&mut self, img: &DynamicImage) -> Result<Vec<Detection>> {
        if let Some(path) = self.vanish.get(&img.width()) {
            std::fs::remove_file(path)?;
        }
        let count = self.faces.get(&img.width()).map_or(0, Vec::len);
        Ok((0..count)
            .map(|i| Detection {
                bbox: [i as f32, 0.0, 1.0, 1.0],
                score: 0.99 - i as f32 * 0.01,
                landmarks: [0.0; 10],
            })
            .collect())
    }

    fn extract(&mut self, img: &DynamicImage, detection: &Detection) -> Result<Embedding> {
        let faces = &self.faces[&img.width()];
        Ok(Embedding::from_vec(faces[detection.bbox[0] as usize].clone()))
    }
}

const AIMINE: &[f32] = &[1.0, 0.0, 0.0];
const BOB: &[f32] = &[0.0, 1.0, 0.0];
const STRANGER: &[f32] = &[0.0, 0.0, 1.0];
// cos(AIMINE_PROBE, AIMINE) = 0.9, cos(AIMINE_PROBE, BOB) ~ 0.436
const AIMINE_PROBE: &[f32] = &[0.9, 0.435_889_9, 0.0];
const BOB_PROBE: &[f32] = &[0.435_889_9, 0.9, 0.0];

fn engine() -> ScriptedEngine {
    ScriptedEngine::default()
        .with(10, &[AIMINE])
        .with(11, &[BOB])
        .with(12, &[AIMINE, BOB])
        .with(20, &[AIMINE_PROBE, BOB_PROBE])
        .with(21, &[BOB_PROBE])
        .with(22, &[STRANGER])
        .with(23, &[AIMINE_PROBE, AIMINE_PROBE])
}

fn write_image(path: &Path, width: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    image::RgbImage::new(width, 4).save(path).unwrap();
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    names.sort();
    names
}

fn labels(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn collect_messages(rx: &crossbeam_channel::Receiver<Event>) -> Vec<String> {
    rx.try_iter()
        .filter_map(|e| match e {
            Event::Progress(m) => Some(m),
            Event::Done => None,
        })
        .collect()
}

/// Known faces: Aimine and Bob with one usable photo each, plus noise.
fn known_tree(root: &Path) {
    write_image(&root.join("Aimine").join("a1.jpg"), 10);
    write_image(&root.join("Bob").join("b1.png"), 11);
    // no face detected
    write_image(&root.join("Bob").join("b2.png"), 99);
    // not an image extension
    std::fs::write(root.join("Bob").join("notes.txt"), b"hello").unwrap();
    // image extension but undecodable
    std::fs::write(root.join("Aimine").join("broken.jpg"), b"not a jpeg").unwrap();
    // stray file at the root is not a label
    std::fs::write(root.join("readme.png"), b"").unwrap();
}

fn enroll_fixture(root: &Path, store: &GalleryStore) -> (Gallery, EnrollReport) {
    let cancel = CancelToken::default();
    let (observer, _rx) = progress::channel();
    let mut slot = EngineSlot::ready(engine());
    let mut gallery = Gallery::new();
    let report = enroll::enroll(
        &mut slot,
        root,
        store,
        &mut gallery,
        RunContext::new(&observer, &cancel),
    )
    .unwrap();
    (gallery, report)
}

#[test]
fn test_enroll_builds_and_saves_gallery() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("known");
    known_tree(&root);
    let store = GalleryStore::new(tmp.path().join("data").join("gallery.bin"));

    let (observer, rx) = progress::channel();
    let cancel = CancelToken::default();
    let mut slot = EngineSlot::ready(engine());
    let mut gallery = Gallery::new();
    let report = enroll::enroll(
        &mut slot,
        &root,
        &store,
        &mut gallery,
        RunContext::new(&observer, &cancel),
    )
    .unwrap();

    assert_eq!(
        report,
        EnrollReport {
            labels: 2,
            images: 4,
            embeddings: 2,
            skipped_no_face: 1,
            skipped_decode: 1,
            skipped_errors: 0,
        }
    );
    let entries: Vec<_> = gallery
        .entries()
        .iter()
        .map(|e| (e.label.as_str(), e.embedding.to_vec()))
        .collect();
    assert_eq!(entries, vec![("Aimine", AIMINE.to_vec()), ("Bob", BOB.to_vec())]);
    assert_eq!(store.load().into_gallery().unwrap(), gallery);

    let messages = collect_messages(&rx);
    assert_eq!(messages[0], "Analysing Aimine (1/2)");
    assert!(messages.iter().any(|m| m == "Analysing Bob (2/2)"));
    assert_eq!(
        messages.last().map(String::as_str),
        Some("Enrollment finished. 2 signatures saved.")
    );
}

#[test]
fn test_enroll_uses_first_face_only() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("known");
    write_image(&root.join("Group").join("both.jpg"), 12);
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));

    let (gallery, report) = enroll_fixture(&root, &store);
    assert_eq!(report.embeddings, 1);
    assert_eq!(gallery.entries()[0].embedding.to_vec(), AIMINE.to_vec());
}

#[test]
fn test_enroll_replaces_previous_gallery() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("known");
    write_image(&root.join("Bob").join("b1.png"), 11);
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));

    let cancel = CancelToken::default();
    let (observer, _rx) = progress::channel();
    let mut gallery = Gallery::new();
    gallery.push("Old", Embedding::from_vec(STRANGER.to_vec())).unwrap();
    gallery.push("Old", Embedding::from_vec(STRANGER.to_vec())).unwrap();

    enroll::enroll(
        &mut EngineSlot::ready(engine()),
        &root,
        &store,
        &mut gallery,
        RunContext::new(&observer, &cancel),
    )
    .unwrap();
    assert_eq!(gallery.len(), 1);
    assert_eq!(gallery.entries()[0].label, "Bob");
}

#[test]
fn test_enroll_missing_root_leaves_gallery_untouched() {
    let tmp = tempfile::tempdir().unwrap();
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));

    let cancel = CancelToken::default();
    let (observer, rx) = progress::channel();
    let mut gallery = Gallery::new();
    gallery.push("Kept", Embedding::from_vec(AIMINE.to_vec())).unwrap();
    let before = gallery.clone();

    let err = enroll::enroll(
        &mut EngineSlot::ready(engine()),
        &tmp.path().join("nope"),
        &store,
        &mut gallery,
        RunContext::new(&observer, &cancel),
    )
    .unwrap_err();

    assert!(matches!(err, Error::DirectoryNotFound(_)));
    assert_eq!(gallery, before);
    assert!(!store.path().exists());
    assert!(collect_messages(&rx)[0].contains("not found"));
}

#[test]
fn test_enroll_missing_root_does_not_load_models() {
    let tmp = tempfile::tempdir().unwrap();
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));
    let cancel = CancelToken::default();
    let (observer, _rx) = progress::channel();

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut slot: EngineSlot<ScriptedEngine> = EngineSlot::lazy(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Err(anyhow::anyhow!("download refused"))
    });

    let err = enroll::enroll(
        &mut slot,
        &tmp.path().join("typo"),
        &store,
        &mut Gallery::new(),
        RunContext::new(&observer, &cancel),
    )
    .unwrap_err();
    assert!(matches!(err, Error::DirectoryNotFound(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_enroll_reports_skipped_files() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("known");
    known_tree(&root);
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));
    let cancel = CancelToken::default();
    let (observer, rx) = progress::channel();

    // Removing a file that is not there fails detection for b1.png.
    let mut slot = EngineSlot::ready(engine().removing(11, &root.join("missing")));
    let report = enroll::enroll(
        &mut slot,
        &root,
        &store,
        &mut Gallery::new(),
        RunContext::new(&observer, &cancel),
    )
    .unwrap();
    assert_eq!(report.skipped_errors, 1);
    assert_eq!(report.embeddings, 1);

    let messages = collect_messages(&rx);
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Skipped unreadable image") && m.ends_with("broken.jpg")));
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Skipped") && m.contains("b1.png")));
}

#[test]
fn test_enroll_tries_loading_models_once() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("known");
    known_tree(&root);
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));

    let cancel = CancelToken::default();
    let (observer, _rx) = progress::channel();
    let mut gallery = Gallery::new();

    let mut failing: EngineSlot<ScriptedEngine> =
        EngineSlot::lazy(|| Err(anyhow::anyhow!("download refused")));
    let err = enroll::enroll(
        &mut failing,
        &root,
        &store,
        &mut gallery,
        RunContext::new(&observer, &cancel),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Provisioning(_)));
    assert!(gallery.is_empty());

    let mut lazy = EngineSlot::lazy(|| Ok(engine()));
    let report = enroll::enroll(
        &mut lazy,
        &root,
        &store,
        &mut gallery,
        RunContext::new(&observer, &cancel),
    )
    .unwrap();
    assert!(lazy.is_ready());
    assert_eq!(report.embeddings, 2);
}

#[test]
fn test_cancelled_enroll_does_not_save() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("known");
    known_tree(&root);
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));

    let (observer, _rx) = progress::channel();
    let cancel = CancelToken::default();
    cancel.cancel();
    let mut gallery = Gallery::new();
    let err = enroll::enroll(
        &mut EngineSlot::ready(engine()),
        &root,
        &store,
        &mut gallery,
        RunContext::new(&observer, &cancel),
    )
    .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(!store.path().exists());
}

fn identify_dir(
    dir: &Path,
    gallery: &Gallery,
    threshold: f32,
) -> (facetag::Result<identify::IdentifyReport>, Vec<String>) {
    let cancel = CancelToken::default();
    let (observer, rx) = progress::channel();
    let result = identify::identify(
        &mut EngineSlot::ready(engine()),
        dir,
        gallery,
        threshold,
        RunContext::new(&observer, &cancel),
    );
    (result, collect_messages(&rx))
}

#[test]
fn test_end_to_end_rename_and_idempotence() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("known");
    known_tree(&root);
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));
    let (gallery, _) = enroll_fixture(&root, &store);
    assert_eq!(gallery.len(), 2);

    let photos = tmp.path().join("photos");
    write_image(&photos.join("IMG_0001.png"), 20);

    let (report, messages) = identify_dir(&photos, &gallery, 0.4);
    let report = report.unwrap();
    assert_eq!(names(&photos), vec!["Aimine_Bob.png"]);
    assert_eq!(report.renamed, 1);
    assert_eq!(report.records.len(), 1);
    assert_eq!(report.records[0].path, photos.join("Aimine_Bob.png"));
    assert_eq!(report.records[0].labels, labels(&["Aimine", "Bob"]));
    assert!(messages.contains(&"Renamed: IMG_0001.png -> Aimine_Bob.png".to_string()));

    // Second pass over unchanged content renames nothing.
    let (again, _) = identify_dir(&photos, &gallery, 0.4);
    let again = again.unwrap();
    assert_eq!(again.renamed, 0);
    assert_eq!(again.records.len(), 1);
    assert!(!again.records[0].renamed);
    assert_eq!(names(&photos), vec!["Aimine_Bob.png"]);
}

#[test]
fn test_identify_batch_counts_and_collisions() {
    let tmp = tempfile::tempdir().unwrap();
    let mut gallery = Gallery::new();
    gallery.push("Aimine", Embedding::from_vec(AIMINE.to_vec())).unwrap();
    gallery.push("Bob", Embedding::from_vec(BOB.to_vec())).unwrap();

    let photos = tmp.path().join("photos");
    write_image(&photos.join("Bob.jpg"), 50); // existing file, no face
    write_image(&photos.join("p1.jpg"), 21); // Bob -> collides with Bob.jpg
    write_image(&photos.join("p2.jpg"), 22); // stranger, detected but unknown
    write_image(&photos.join("p3.jpg"), 23); // Aimine twice -> one label
    write_image(&photos.join("p4.png"), 99); // no face
    std::fs::write(photos.join("p5.jpg"), b"garbage").unwrap();
    std::fs::write(photos.join("p6.gif"), b"ignored").unwrap();

    let (report, messages) = identify_dir(&photos, &gallery, 0.4);
    let report = report.unwrap();

    assert_eq!(report.files, 6);
    assert_eq!(report.processed, 5);
    assert_eq!(report.skipped_decode, 1);
    assert_eq!(report.skipped_no_face, 2);
    assert_eq!(report.renamed, 2);
    assert_eq!(report.rename_failures, 0);
    assert_eq!(
        names(&photos),
        vec!["Aimine.jpg", "Bob.jpg", "Bob_2.jpg", "p2.jpg", "p4.png", "p5.jpg", "p6.gif"]
    );

    let recorded: Vec<_> = report
        .records
        .iter()
        .map(|r| (r.path.file_name().unwrap().to_str().unwrap(), r.labels.len()))
        .collect();
    assert_eq!(recorded, vec![("Bob_2.jpg", 1), ("p2.jpg", 0), ("Aimine.jpg", 1)]);

    // progress before files 1 and 6, then the summary
    assert_eq!(messages[0], "Processing 1/6...");
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Skipped unreadable image") && m.ends_with("p5.jpg")));
    assert!(messages.contains(&"Processing 6/6...".to_string()));
    assert_eq!(
        messages.last().map(String::as_str),
        Some("Processing finished. 2 images renamed out of 6 (5 processed).")
    );
}

#[test]
fn test_higher_threshold_renames_less() {
    let tmp = tempfile::tempdir().unwrap();
    let mut gallery = Gallery::new();
    gallery.push("Aimine", Embedding::from_vec(AIMINE.to_vec())).unwrap();
    gallery.push("Bob", Embedding::from_vec(BOB.to_vec())).unwrap();

    let photos = tmp.path().join("photos");
    write_image(&photos.join("p.png"), 20);

    let (report, _) = identify_dir(&photos, &gallery, 0.95);
    let report = report.unwrap();
    assert_eq!(report.renamed, 0);
    assert_eq!(report.records[0].labels, BTreeSet::new());
    assert_eq!(names(&photos), vec!["p.png"]);
}

#[test]
fn test_identify_refuses_empty_gallery() {
    let tmp = tempfile::tempdir().unwrap();
    let photos = tmp.path().join("photos");
    write_image(&photos.join("p.png"), 20);

    let (result, messages) = identify_dir(&photos, &Gallery::new(), 0.4);
    assert!(matches!(result, Err(Error::EmptyGallery)));
    assert!(messages[0].contains("Run enrollment first"));
    assert_eq!(names(&photos), vec!["p.png"]);
}

#[test]
fn test_identify_missing_directory() {
    let tmp = tempfile::tempdir().unwrap();
    let mut gallery = Gallery::new();
    gallery.push("Aimine", Embedding::from_vec(AIMINE.to_vec())).unwrap();

    let missing: PathBuf = tmp.path().join("nowhere");
    let (result, _) = identify_dir(&missing, &gallery, 0.4);
    assert!(matches!(result, Err(Error::DirectoryNotFound(p)) if p == missing));
}

#[test]
fn test_runner_drives_enroll_then_identify() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("known");
    known_tree(&root);
    let photos = tmp.path().join("photos");
    write_image(&photos.join("IMG_0001.png"), 20);
    let store = GalleryStore::new(tmp.path().join("gallery.bin"));

    let runner = Runner::new();
    let job_root = root.clone();
    let job_photos = photos.clone();
    let handle = runner
        .spawn(move |ctx| {
            let mut engine = EngineSlot::ready(engine());
            let mut gallery = Gallery::new();
            enroll::enroll(&mut engine, &job_root, &store, &mut gallery, ctx)?;
            identify::identify(&mut engine, &job_photos, &gallery, 0.4, ctx)
        })
        .unwrap();

    let events: Vec<Event> = handle.events().iter().collect();
    assert_eq!(events.last(), Some(&Event::Done));
    let report = handle.join().unwrap();
    assert_eq!(report.renamed, 1);
    assert_eq!(names(&photos), vec!["Aimine_Bob.png"]);

    let review = tmp.path().join("review").join("report.json");
    report.write_json(&review).unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&review).unwrap()).unwrap();
    assert_eq!(json["renamed"], 1);
    assert_eq!(json["records"][0]["labels"][0], "Aimine");
    assert_eq!(json["records"][0]["labels"][1], "Bob");
}

#[test]
fn test_rename_failure_does_not_stop_batch() {
    let tmp = tempfile::tempdir().unwrap();
    let mut gallery = Gallery::new();
    gallery.push("Aimine", Embedding::from_vec(AIMINE.to_vec())).unwrap();
    gallery.push("Bob", Embedding::from_vec(BOB.to_vec())).unwrap();

    let photos = tmp.path().join("photos");
    let first = photos.join("a.png");
    write_image(&first, 21);
    write_image(&photos.join("b.png"), 20);

    // a.png disappears after decoding, so its rename fails.
    let cancel = CancelToken::default();
    let (observer, rx) = progress::channel();
    let report = identify::identify(
        &mut EngineSlot::ready(engine().removing(21, &first)),
        &photos,
        &gallery,
        0.4,
        RunContext::new(&observer, &cancel),
    )
    .unwrap();

    assert_eq!(report.rename_failures, 1);
    assert_eq!(report.renamed, 1);
    assert_eq!(report.processed, 2);
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.records[0].path, first);
    assert!(!report.records[0].renamed);
    assert_eq!(report.records[0].labels, labels(&["Bob"]));
    assert_eq!(names(&photos), vec!["Aimine_Bob.png"]);

    let messages = collect_messages(&rx);
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Error: could not rename a.png")));
}
