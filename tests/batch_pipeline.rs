//! End-to-end batch runs against a SQLite store.
//!
//! The stub detector is scripted per image size, so each test image gets a
//! known candidate list.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::tempdir;

use wildlife_detect::{
    BatchOrchestrator, BoundingBox, DetectionCandidate, FailureReason, ImageId, ImageResult,
    ImageStore, KnownClass, ObjectCounts, PipelineSettings, ResultCollection, ResultStore,
    SharedDetector, SqliteStore, Status, StubBackend,
};

fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb([90, 120, 60]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format).expect("encode test image");
    out.into_inner()
}

fn cand(confidence: f32, class_id: u32) -> DetectionCandidate {
    DetectionCandidate::new(BoundingBox::new(4.0, 4.0, 20.0, 18.0), confidence, class_id)
}

fn scripted_detector() -> SharedDetector {
    let backend = StubBackend::new()
        // deer 0.95 + pig 0.5
        .with_script(32, 24, vec![cand(0.95, 0), cand(0.5, 1)])
        // nothing at all
        .with_script(24, 24, vec![])
        // one weak deer
        .with_script(40, 30, vec![cand(0.3, 0)])
        // mixed herd
        .with_script(
            48,
            32,
            vec![cand(0.91, 2), cand(0.85, 1), cand(0.82, 2), cand(0.79, 0)],
        );
    Arc::new(Mutex::new(backend))
}

fn open_store(dir: &std::path::Path) -> Result<SqliteStore> {
    SqliteStore::open(&dir.join("images.db").to_string_lossy())
}

#[test]
fn reference_examples_are_classified_and_routed() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path())?;
    let deer = store.insert_image("deer.jpg", &encoded(32, 24, ImageFormat::Jpeg))?;
    let empty = store.insert_image("empty.png", &encoded(24, 24, ImageFormat::Png))?;
    let weak = store.insert_image("weak.png", &encoded(40, 30, ImageFormat::Png))?;

    let ids = [deer.as_str(), empty.as_str(), weak.as_str()];
    let summary =
        BatchOrchestrator::new(&mut store, scripted_detector(), PipelineSettings::default())
            .run(&ids)?;

    assert_eq!(summary.image_count, 3);
    assert_eq!(summary.success_count(), 1);

    let ImageResult::Success(ok) = &summary.results[0] else {
        panic!("deer image should succeed");
    };
    assert_eq!(ok.filename, "deer.jpg");
    assert_eq!(ok.detections.len(), 1);
    assert_eq!(ok.detections[0].class_name, "deer");
    assert!((ok.detections[0].confidence_percent - 95.0).abs() < 1e-4);
    assert_eq!(
        ok.object_counts,
        ObjectCounts {
            deer: 1,
            pig: 0,
            racoon: 0
        }
    );
    assert!(!ok.annotated_image.is_empty());

    assert_eq!(
        summary.results[1].failure_reason(),
        Some(FailureReason::NoObjectsDetected)
    );
    assert!(summary.results[1].object_counts().is_empty());
    assert_eq!(
        summary.results[2].failure_reason(),
        Some(FailureReason::BelowThreshold)
    );
    assert!(summary.results[2].detections().is_empty());

    let stored_ok = store.results(ResultCollection::Success, 10)?;
    let stored_failed = store.results(ResultCollection::Failure, 10)?;
    assert_eq!(stored_ok.len(), 1);
    assert_eq!(stored_failed.len(), 2);
    assert!(stored_ok.iter().all(|r| r.status() == Status::Success));
    assert!(stored_failed.iter().all(|r| r.status() == Status::Failed));
    Ok(())
}

#[test]
fn persisted_results_round_trip_exactly() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path())?;
    let herd = store.insert_image("herd.png", &encoded(48, 32, ImageFormat::Png))?;

    // Caller spelling is upper case; it must come back verbatim.
    let requested = herd.as_str().to_ascii_uppercase();
    let summary =
        BatchOrchestrator::new(&mut store, scripted_detector(), PipelineSettings::default())
            .run(&[requested.as_str()])?;

    let produced = &summary.results[0];
    assert_eq!(produced.image_id(), requested);
    let names: Vec<&str> = produced
        .detections()
        .iter()
        .map(|d| d.class_name.as_str())
        .collect();
    assert_eq!(names, vec!["racoon", "pig", "racoon"]);
    assert_eq!(produced.object_counts().get(KnownClass::Racoon), 2);
    assert_eq!(produced.object_counts().get(KnownClass::Pig), 1);
    assert_eq!(produced.object_counts().get(KnownClass::Deer), 0);

    drop(store);
    let reopened = open_store(dir.path())?;
    let stored = reopened.results(ResultCollection::Success, 10)?;
    assert_eq!(stored.len(), 1);
    assert_eq!(&stored[0], produced);
    Ok(())
}

#[test]
fn only_found_images_are_counted() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path())?;
    let a = store.insert_image("a.jpg", &encoded(32, 24, ImageFormat::Jpeg))?;
    let absent = ImageId::parse("678def6f3d9346a8a2d5302d")?;
    assert!(store.find_image(&absent)?.is_none());

    let summary =
        BatchOrchestrator::new(&mut store, scripted_detector(), PipelineSettings::default())
            .run(&[a.as_str(), absent.as_str(), "garbage"])?;

    assert_eq!(summary.requested, 3);
    assert_eq!(summary.image_count, 1);
    assert_eq!(summary.results.len(), 1);
    assert_eq!(summary.results[0].image_id(), a.as_str());
    assert_eq!(summary.skipped.len(), 2);

    let total = store.results(ResultCollection::Success, 10)?.len()
        + store.results(ResultCollection::Failure, 10)?.len();
    assert_eq!(total, 1);
    Ok(())
}

#[test]
fn lower_threshold_accepts_weaker_candidates() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path())?;
    let weak = store.insert_image("weak.png", &encoded(40, 30, ImageFormat::Png))?;

    let settings = PipelineSettings {
        confidence_threshold: 0.25,
        ..PipelineSettings::default()
    };
    let summary =
        BatchOrchestrator::new(&mut store, scripted_detector(), settings).run(&[weak.as_str()])?;

    assert_eq!(summary.results[0].status(), Status::Success);
    assert_eq!(summary.results[0].object_counts().deer, 1);
    Ok(())
}

#[test]
fn every_result_satisfies_status_invariants() -> Result<()> {
    let dir = tempdir()?;
    let mut store = open_store(dir.path())?;
    let mut ids = Vec::new();
    for (w, h) in [(32, 24), (24, 24), (40, 30), (48, 32)] {
        ids.push(store.insert_image("img.png", &encoded(w, h, ImageFormat::Png))?);
    }
    ids.push(store.insert_image("broken.jpg", b"not really a jpeg")?);

    let id_strs: Vec<&str> = ids.iter().map(|id| id.as_str()).collect();
    let summary =
        BatchOrchestrator::new(&mut store, scripted_detector(), PipelineSettings::default())
            .run(&id_strs)?;

    // The undecodable image is persisted but not counted.
    assert_eq!(summary.image_count, 4);
    assert_eq!(summary.results.len(), 5);
    for result in &summary.results {
        let success = result.status() == Status::Success;
        assert_eq!(success, !result.detections().is_empty());
        assert_eq!(success, result.failure_reason().is_none());
        for class in KnownClass::ALL {
            let listed = result
                .detections()
                .iter()
                .filter(|d| d.class_name == class.as_str())
                .count() as u32;
            assert_eq!(result.object_counts().get(class), listed);
        }
    }
    assert_eq!(
        summary.results[4].failure_reason(),
        Some(FailureReason::DecodeError)
    );
    Ok(())
}
