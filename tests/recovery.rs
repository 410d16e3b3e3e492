//! Restart and recovery tests.
//!
//! These tests persist reconciliation state to a temp dir, tamper with the
//! target map between runs, and check that startup pruning plus replay
//! repairs the mirror without duplicating anything.

use std::path::Path;

use map_mirror::error::MirrorError;
use map_mirror::feature::{
    AssignmentProps, EventKind, Feature, FeatureClass, FeatureEvent, FeatureKind, Geometry,
    ShapeStyle,
};
use map_mirror::reconcile::{Mirror, MirrorSettings, StateStore};
use map_mirror::session::{JournalEvents, MapSession, MemorySession, SessionError};

type TestMirror = Mirror<MemorySession, MemorySession>;

fn settings() -> MirrorSettings {
    MirrorSettings {
        crop_beyond: 0.5,
        ..Default::default()
    }
}

fn assignment(id: &str, title: &str) -> Feature {
    Feature {
        id: id.into(),
        title: title.into(),
        folder_id: None,
        geometry: Some(Geometry::Polygon(vec![vec![
            vec![0.0, 0.0],
            vec![10.0, 0.0],
            vec![10.0, 10.0],
            vec![0.0, 10.0],
            vec![0.0, 0.0],
        ]])),
        kind: FeatureKind::Assignment(AssignmentProps::default()),
    }
}

fn track(id: &str, title: &str) -> Feature {
    let points = [
        (-5.0, 2.0),
        (2.0, 2.0),
        (8.0, 2.0),
        (15.0, 2.0),
        (15.0, 8.0),
        (8.0, 8.0),
        (2.0, 8.0),
        (-5.0, 8.0),
    ];
    Feature {
        id: id.into(),
        title: title.into(),
        folder_id: None,
        geometry: Some(Geometry::LineString(
            points.iter().map(|&(x, y)| vec![x, y]).collect(),
        )),
        kind: FeatureKind::Shape(ShapeStyle::default()),
    }
}

fn marker(id: &str) -> Feature {
    Feature {
        id: id.into(),
        title: "CP".into(),
        folder_id: None,
        geometry: Some(Geometry::Point(vec![1.0, 1.0])),
        kind: FeatureKind::Marker(Default::default()),
    }
}

fn restart(source: MemorySession, target: MemorySession, state: &Path) -> TestMirror {
    Mirror::new(source, target, StateStore::open(state).unwrap(), settings())
}

#[test]
fn replay_after_restart_creates_nothing() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    let source = MemorySession::with_features(
        "SRC",
        [track("t1", "AA101a"), marker("m1"), assignment("a1", "AA101")],
    );

    let mut m = restart(source, MemorySession::new("TGT"), &state);
    let first = m.start().unwrap();
    assert_eq!(first.replayed, 3);
    assert_eq!(first.created, 3);
    assert_eq!(first.failed, 0);
    // Assignments replay first, so the track never needed a speculative outing.
    assert_eq!(m.store().outings().count(), 1);
    assert!(m.store().outing("AA101").unwrap().uncropped_track_ids.is_empty());

    let (source, target, _) = m.into_parts();
    let count = target.len();

    let mut m = restart(source, target, &state);
    let second = m.start().unwrap();
    assert_eq!(second.created, 0);
    assert_eq!(second.skipped, 3);
    assert!(second.pruned.is_empty());
    assert_eq!(m.target().len(), count);
}

#[test]
fn lost_target_id_is_pruned_without_duplicates() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    let source = MemorySession::with_features("SRC", [assignment("a1", "AA101"), track("t1", "AA101a")]);

    let mut m = restart(source, MemorySession::new("TGT"), &state);
    m.start().unwrap();
    let pieces = m.store().lookup(&"t1".into()).to_vec();
    assert_eq!(pieces.len(), 2);

    // The target lost one piece while we were down.
    let (source, mut target, _) = m.into_parts();
    target.delete(FeatureClass::Shape, &pieces[1]).unwrap();
    let count = target.len();

    let mut m = restart(source, target, &state);
    let report = m.start().unwrap();
    assert_eq!(report.pruned.target_ids_dropped, 1);
    assert_eq!(report.pruned.correspondence_dropped, 0);
    assert_eq!(report.created, 0);
    assert_eq!(m.target().len(), count);

    let reloaded = StateStore::open(&state).unwrap();
    assert_eq!(reloaded.lookup(&"t1".into()), &pieces[..1]);
    let outing = reloaded.outing("AA101").unwrap();
    assert!(!outing.references(&pieces[1]));
    assert!(outing.references(&pieces[0]));
}

#[test]
fn lost_boundary_is_redrawn_in_the_same_outing() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    let source = MemorySession::with_features("SRC", [assignment("a1", "AA101")]);

    let mut m = restart(source, MemorySession::new("TGT"), &state);
    m.start().unwrap();
    let outing = m.store().outing("AA101").unwrap().clone();
    let boundary = outing.boundary_id.clone().unwrap();

    let (source, mut target, _) = m.into_parts();
    target.delete(FeatureClass::Shape, &boundary).unwrap();

    let mut m = restart(source, target, &state);
    let report = m.start().unwrap();
    assert_eq!(report.pruned.outings_dropped, 0);
    assert_eq!(report.pruned.outing_refs_dropped, 1);
    assert_eq!(report.created, 1);

    assert_eq!(m.store().outings().count(), 1);
    let repaired = m.store().outing("AA101").unwrap();
    assert_eq!(repaired.serial, outing.serial);
    assert_eq!(repaired.folder_id, outing.folder_id);
    let redrawn = repaired.boundary_id.clone().unwrap();
    assert_ne!(redrawn, boundary);
    assert!(m.target().contains(&redrawn).unwrap());
}

#[test]
fn outing_with_no_live_refs_is_dropped() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    let source = MemorySession::with_features("SRC", [assignment("a1", "AA101")]);

    let mut m = restart(source, MemorySession::new("TGT"), &state);
    m.start().unwrap();

    // Both maps were wiped.
    let mut m = restart(MemorySession::new("SRC"), MemorySession::new("TGT"), &state);
    let report = m.start().unwrap();
    assert_eq!(report.pruned.outings_dropped, 1);
    assert_eq!(report.replayed, 0);
    assert_eq!(StateStore::open(&state).unwrap().outings().count(), 0);
}

#[test]
fn pending_tracks_are_cropped_when_assignment_appears_across_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let state = dir.path().join("state.json");
    let source = MemorySession::with_features("SRC", [track("t1", "AA101a")]);

    let mut m = restart(source, MemorySession::new("TGT"), &state);
    m.start().unwrap();
    assert_eq!(m.store().outing("AA 101").unwrap().uncropped_track_ids.len(), 1);

    let (mut source, target, _) = m.into_parts();
    source.apply(&FeatureEvent {
        event: EventKind::New,
        feature: assignment("a1", "AA101"),
    });

    let mut m = restart(source, target, &state);
    let report = m.start().unwrap();
    assert_eq!(report.failed, 0);

    let outing = m.store().outing("AA 101").unwrap();
    assert_eq!(outing.source_assignment_id, Some("a1".into()));
    assert!(outing.uncropped_track_ids.is_empty());
    assert_eq!(outing.cropped_track_groups.len(), 1);
    assert_eq!(
        m.store().lookup(&"t1".into()),
        outing.cropped_track_groups[0].as_slice()
    );
}

#[test]
fn journal_events_drive_snapshot_sessions() {
    let dir = tempfile::TempDir::new().unwrap();
    let source_path = dir.path().join("source.json");
    let target_path = dir.path().join("target.json");
    let journal = dir.path().join("events.jsonl");
    std::fs::write(&source_path, "[]").unwrap();

    let source = MemorySession::open("SRC", &source_path).unwrap();
    let target = MemorySession::open_or_create("TGT", &target_path).unwrap();
    let store = StateStore::open(&dir.path().join("state.json")).unwrap();
    let mut m = Mirror::new(source, target, store, settings());
    m.start().unwrap();

    let lines: Vec<String> = [
        FeatureEvent {
            event: EventKind::New,
            feature: assignment("a1", "AA101"),
        },
        FeatureEvent {
            event: EventKind::New,
            feature: marker("m1"),
        },
    ]
    .iter()
    .map(|e| serde_json::to_string(e).unwrap())
    .collect();
    std::fs::write(&journal, lines.join("\n") + "\n").unwrap();

    let mut events = JournalEvents::new(&journal);
    assert_eq!(m.poll_once(&mut events).unwrap(), 2);
    assert_eq!(m.poll_once(&mut events).unwrap(), 0);
    assert!(m.source().contains(&"m1".into()).unwrap());

    let saved_target = MemorySession::open("TGT", &target_path).unwrap();
    assert_eq!(saved_target.len(), m.target().len());
    let saved_source = MemorySession::open("SRC", &source_path).unwrap();
    assert_eq!(saved_source.len(), 2);
}

#[test]
fn missing_source_snapshot_is_fatal() {
    let dir = tempfile::TempDir::new().unwrap();
    let err: MirrorError = MemorySession::open("SRC", &dir.path().join("missing.json"))
        .unwrap_err()
        .into();
    assert!(matches!(err, MirrorError::Session(SessionError::Open { .. })));
}
