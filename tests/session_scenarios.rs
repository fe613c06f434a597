//! End-to-end behaviour of the session coordinator over the synthetic source.

use hqastrocam::config::{CameraConfig, Resolution, VideoConfig};
use hqastrocam::controls::{ControlValue, AE_ENABLE, ANALOGUE_GAIN, AWB_ENABLE, EXPOSURE_TIME};
use hqastrocam::session::{Phase, SessionError};
use hqastrocam::{CapturePipeline, ControlRegistry, PresetTable, SessionCoordinator, SyntheticSource};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

fn session() -> (SessionCoordinator, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let camera = CameraConfig {
        preview_size: Resolution::new(64, 48),
        still_size: Resolution::new(128, 96),
        video_size: Resolution::new(64, 48),
        ..CameraConfig::default()
    };
    let registry = ControlRegistry::hq_camera();
    let presets = PresetTable::load(&registry, &[]).unwrap();
    let pipeline = CapturePipeline::new(dir.path(), VideoConfig::default()).unwrap();
    let session = SessionCoordinator::new(
        registry,
        presets,
        Box::new(SyntheticSource::new(&camera)),
        pipeline,
    );
    (session, dir)
}

fn updates(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn visible_files(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

#[test]
fn deep_sky_changes_only_its_overrides() {
    let (session, _dir) = session();
    let defaults = session.registry().defaults();
    assert_eq!(defaults[EXPOSURE_TIME], ControlValue::Int(10_000));
    assert_eq!(defaults[ANALOGUE_GAIN], ControlValue::Float(1.0));

    let state = session.apply_preset("deep_sky").unwrap();

    assert_eq!(state.values[EXPOSURE_TIME], ControlValue::Int(30_000_000));
    assert_eq!(state.values[ANALOGUE_GAIN], ControlValue::Float(8.0));
    assert_eq!(state.values[AE_ENABLE], ControlValue::Bool(false));

    let changed: Vec<&String> = state
        .values
        .iter()
        .filter(|(id, value)| defaults.get(*id) != Some(value))
        .map(|(id, _)| id)
        .collect();
    assert_eq!(changed, vec![ANALOGUE_GAIN, EXPOSURE_TIME]);
    assert_eq!(state.values.len(), defaults.len());
}

#[test]
fn every_preset_disables_auto_modes() {
    let (session, _dir) = session();
    let ids: Vec<String> = session.presets().iter().map(|p| p.id.clone()).collect();

    for id in ids {
        session
            .apply_settings(&updates(&[(AE_ENABLE, json!(true)), (AWB_ENABLE, json!(true))]))
            .unwrap();
        let state = session.apply_preset(&id).unwrap();
        assert_eq!(state.values[AE_ENABLE], ControlValue::Bool(false), "{id}");
        assert_eq!(state.values[AWB_ENABLE], ControlValue::Bool(false), "{id}");
    }
}

#[test]
fn out_of_range_gain_is_rejected_without_side_effects() {
    let (session, _dir) = session();
    session.apply_preset("planetary").unwrap();
    let before = session.snapshot().state;

    let err = session
        .apply_settings(&updates(&[(ANALOGUE_GAIN, json!(999))]))
        .unwrap_err();

    assert!(matches!(err, SessionError::OutOfRange(_)));
    assert_eq!(err.kind(), "out_of_range");
    assert_eq!(session.snapshot().state, before);
}

#[test]
fn recording_lifecycle() {
    let (session, dir) = session();
    let started = session.start_recording(30).unwrap();
    assert_eq!(session.phase(), Phase::Recording);

    let err = session.start_recording(15).unwrap_err();
    assert!(matches!(err, SessionError::Busy(_)));

    std::thread::sleep(Duration::from_millis(100));
    let summary = session.stop_recording().unwrap();

    assert_eq!(summary.path, started.path);
    assert_eq!(summary.fps, 30);
    assert_eq!(session.phase(), Phase::Idle);
    assert!(summary.path.exists());
    assert_eq!(visible_files(dir.path()).len(), 1);
}

#[test]
fn capture_during_recording_leaves_recording_untouched() {
    let (session, dir) = session();
    let started = session.start_recording(30).unwrap();
    std::thread::sleep(Duration::from_millis(100));
    let before = session.snapshot().recording.unwrap();

    let err = session.capture(false).unwrap_err();
    assert!(matches!(err, SessionError::Busy(_)));

    std::thread::sleep(Duration::from_millis(150));
    let after = session.snapshot().recording.unwrap();
    assert_eq!(after.session.path, started.path);
    assert!(after.frames > before.frames);

    session.stop_recording().unwrap();
    let files = visible_files(dir.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].starts_with("video_"));
}

#[test]
fn stop_while_idle_creates_nothing() {
    let (session, dir) = session();
    let err = session.stop_recording().unwrap_err();

    assert!(matches!(err, SessionError::NotRecording));
    assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
}

#[test]
fn back_to_back_captures_get_distinct_names() {
    let (session, dir) = session();
    let first = session.capture(false).unwrap();
    let second = session.capture(false).unwrap();

    assert_eq!(first.files.len(), 1);
    assert_eq!(second.files.len(), 1);
    assert_ne!(first.files[0], second.files[0]);
    assert_eq!(visible_files(dir.path()).len(), 2);
}

#[test]
fn storage_failure_reports_and_returns_to_idle() {
    let (session, dir) = session();
    std::fs::remove_dir_all(dir.path()).unwrap();

    let err = session.capture(true).unwrap_err();
    assert_eq!(err.kind(), "storage_error");
    assert_eq!(session.phase(), Phase::Idle);
    assert!(!dir.path().exists());
}
