//! Persistence round-trips for the tuning facade
//!
//! Verifies:
//! - Named states survive a save / mutate / load cycle
//! - Committed parameters survive a disk round-trip into a fresh store
//! - Legacy `calibrationLift` files convert to `targetRms` on load
//! - The calibration multiplier row never leaks through tuning files

use std::fs;
use std::sync::Arc;

use ht_core::{NoteParam, STRING_COUNT};
use ht_state::{ConfigPaths, DetectionStore, TuningFacade};

fn facade_in(dir: &tempfile::TempDir) -> TuningFacade {
    TuningFacade::with_store(
        Arc::new(DetectionStore::new()),
        ConfigPaths::with_root(dir.path()),
    )
}

#[test]
fn named_state_round_trip_restores_active_values() {
    let dir = tempfile::tempdir().unwrap();
    let facade = facade_in(&dir);

    facade.set_parameter_value("gateRatio", 1, 0.42);
    facade.save_state("stage");
    facade.set_parameter_value("gateRatio", 1, 7.0);

    assert!(facade.load_state("stage"));
    assert_eq!(facade.parameter_value("gateRatio", 1), 0.42);
    assert_eq!(facade.store().active_value(NoteParam::GateRatio, 1), 0.42);
}

#[test]
fn committed_set_survives_disk_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    {
        let facade = facade_in(&dir);
        facade.set_parameter_value("envelopeFloor", 4, 0.004);
        facade.set_parameter_value("pitchTolerance", 0, 0.9);
        facade.commit();
    }

    // A fresh store restores the committed values from disk.
    let facade = facade_in(&dir);
    assert!((facade.baseline_value("envelopeFloor", 4) - 0.004).abs() < 1e-7);
    assert!((facade.baseline_value("pitchTolerance", 0) - 0.9).abs() < 1e-7);
    assert!(
        (facade.store().active_value(NoteParam::EnvelopeFloor, 4) - 0.004).abs() < 1e-7
    );
}

#[test]
fn named_states_persist_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    {
        let facade = facade_in(&dir);
        facade.set_parameter_value("sustainFloorScale", 2, 1.75);
        facade.save_state("loose release");
    }

    let facade = facade_in(&dir);
    assert!(facade.saved_states().contains(&"loose release".to_string()));
    assert!(facade.load_state("loose release"));
    assert!((facade.parameter_value("sustainFloorScale", 2) - 1.75).abs() < 1e-7);
}

#[test]
fn snapshot_files_are_pruned_on_delete() {
    let dir = tempfile::tempdir().unwrap();
    let facade = facade_in(&dir);
    facade.save_state("one");
    facade.save_state("two");

    let snapshots = || {
        fs::read_dir(dir.path().join("note_detection/snapshots"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    };
    assert_eq!(snapshots(), 2);

    assert!(facade.delete_state("one"));
    assert_eq!(snapshots(), 1);
}

#[test]
fn legacy_calibration_lift_converts_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let config_dir = dir.path().join("note_detection");
    fs::create_dir_all(&config_dir).unwrap();
    fs::write(
        config_dir.join("committed.json"),
        r#"{"calibrationLift": [50.0, 100.0, 150.0, 200.0, 10.0, 1.0]}"#,
    )
    .unwrap();

    let facade = facade_in(&dir);
    let lifts = [50.0f32, 100.0, 150.0, 200.0, 10.0, 1.0];
    for (s, lift) in lifts.iter().enumerate() {
        let expected = 0.0018 * lift;
        assert!(
            (facade.baseline_value("targetRms", s) - expected).abs() < 1e-6,
            "string {s}"
        );
    }
}

#[test]
fn multiplier_row_survives_disk_load_untouched() {
    let dir = tempfile::tempdir().unwrap();
    {
        let facade = facade_in(&dir);
        facade.commit();
    }

    let store = Arc::new(DetectionStore::new());
    // Pretend the calibration profile installed multipliers before the
    // tuning state loads.
    for s in 0..STRING_COUNT {
        store.set_value(NoteParam::CalibrationGainMultiplier, s, 2.5);
    }
    let facade = TuningFacade::with_store(store, ConfigPaths::with_root(dir.path()));
    for s in 0..STRING_COUNT {
        assert_eq!(facade.parameter_value("calibrationGainMultiplier", s), 2.5);
    }
}
