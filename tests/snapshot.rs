//! Snapshot files and sidecars on a real filesystem.

mod common;

use common::{frame, result, TEST_FORMAT};
use cropcam::knowledge::BuiltinKnowledgeBase;
use cropcam::snapshot::{DeviceSettings, SnapshotWorker, SnapshotWriter};
use cropcam::{OverlayPolicy, SnapshotError};
use std::collections::HashSet;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

fn writer(dir: &Path) -> SnapshotWriter {
    SnapshotWriter::new(dir, DeviceSettings::new(2, TEST_FORMAT))
}

fn advising_writer(dir: &Path) -> SnapshotWriter {
    writer(dir).with_knowledge(Arc::new(BuiltinKnowledgeBase), OverlayPolicy::default())
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[test]
fn rapid_saves_never_collide() {
    let dir = tempfile::tempdir().unwrap();
    let writer = writer(dir.path());
    let frame = frame(0);

    let paths: HashSet<_> = (0..100)
        .map(|_| writer.save(&frame, None).unwrap().image_path)
        .collect();

    assert_eq!(paths.len(), 100);
    assert!(paths.iter().all(|p| p.exists()));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 100);
}

#[test]
fn sidecar_only_written_with_classification() {
    let dir = tempfile::tempdir().unwrap();
    let writer = writer(dir.path());

    let bare = writer.save(&frame(1), None).unwrap();
    assert!(bare.metadata_path.is_none());
    assert!(!bare.image_path.with_extension("json").exists());

    let classified = writer.save(&frame(2), Some(&result("healthy", 0.93))).unwrap();
    let metadata_path = classified.metadata_path.clone().unwrap();
    assert_eq!(metadata_path, classified.image_path.with_extension("json"));

    let metadata = read_json(&metadata_path);
    assert_eq!(metadata["frame_sequence"], 2);
    assert_eq!(metadata["classification"]["label"], "healthy");
    assert!((metadata["classification"]["confidence"].as_f64().unwrap() - 0.93).abs() < 1e-6);
    assert_eq!(metadata["device_settings"]["device_index"], 2);
    assert_eq!(metadata["device_settings"]["fps"], 30);
    assert!(metadata.get("remediation").is_none());
    assert!(metadata.get("metadata_path").is_none());
}

#[test]
fn flagged_results_carry_remediation() {
    let dir = tempfile::tempdir().unwrap();
    let writer = advising_writer(dir.path());

    let flagged = writer.save(&frame(1), Some(&result("whitefly", 0.95))).unwrap();
    let metadata = read_json(flagged.metadata_path.as_ref().unwrap());
    assert_eq!(metadata["remediation"]["name"], "Whitefly");
    assert_eq!(metadata["remediation"]["urgency"], "High");
    assert!(!metadata["remediation"]["treatment"].as_array().unwrap().is_empty());

    // Healthy and low-confidence results get no advice
    let healthy = writer.save(&frame(2), Some(&result("healthy", 0.95))).unwrap();
    assert!(healthy.remediation.is_none());
    let unsure = writer.save(&frame(3), Some(&result("whitefly", 0.4))).unwrap();
    assert!(unsure.remediation.is_none());
    assert!(read_json(unsure.metadata_path.as_ref().unwrap()).get("remediation").is_none());
}

#[test]
fn unwritable_directory_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let err = writer(&blocker.join("captures")).save(&frame(0), None).unwrap_err();

    assert!(matches!(err, SnapshotError::Io(_)));
}

#[test]
fn worker_answers_every_request() {
    let dir = tempfile::tempdir().unwrap();
    let mut worker = SnapshotWorker::spawn(advising_writer(dir.path())).unwrap();

    let (tx, rx) = mpsc::channel();
    worker.submit(frame(0), Some(result("leaf_spot", 0.8)), tx.clone());
    worker.submit(frame(1), None, tx);

    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    let second = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
    worker.shutdown();

    // Saves complete in submission order
    assert_eq!(first.frame_sequence, 0);
    assert!(first.remediation.is_some());
    assert_eq!(second.frame_sequence, 1);
    assert!(second.metadata_path.is_none());
}
