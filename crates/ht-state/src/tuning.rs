//! Tuning facade
//!
//! Editor-facing wrapper over the detection store: slider categories,
//! revision tracking for UI refresh, named states, and JSON persistence.
//!
//! Persistence layout (under the config root):
//! - `note_detection/committed.json`: the committed parameter set
//! - `note_detection/states.json`: all named states in one object
//! - `note_detection/snapshots/{name}_{sha1[..8]}.json`: one file per
//!   named state, pruned when states are deleted
//!
//! The calibration gain multiplier row is owned by the calibration profile
//! and is never written to or restored from tuning files. Legacy files
//! carrying `calibrationLift` convert on read via
//! `targetRms = 0.0018 * lift`.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Map, Value};
use sha1::{Digest, Sha1};

use ht_core::{
    parameter_descriptors, NoteParam, ParamDescriptor, ParameterSet, StringId, STRING_COUNT,
};

use crate::{ConfigPaths, DetectionStore};

/// Conversion factor for legacy `calibrationLift` rows.
pub const LEGACY_LIFT_TO_TARGET_RMS: f32 = 0.0018;

/// One slider group in the tuning UI.
#[derive(Debug, Clone)]
pub struct TuningCategory {
    pub id: &'static str,
    pub title: &'static str,
    pub parameters: Vec<&'static ParamDescriptor>,
}

const CATEGORY_DEFS: [(&str, &str, &[NoteParam]); 3] = [
    (
        "envelope",
        "Envelope & Gate",
        &[
            NoteParam::OnsetThresholdScale,
            NoteParam::BaselineFloor,
            NoteParam::EnvelopeFloor,
            NoteParam::GateRatio,
            NoteParam::SustainFloorScale,
            NoteParam::RetriggerGateScale,
            NoteParam::PeakReleaseRatio,
        ],
    ),
    (
        "pitch",
        "Pitch Tracking",
        &[
            NoteParam::PitchTolerance,
            NoteParam::AubioThresholdScale,
            NoteParam::OnsetSilenceDb,
            NoteParam::PitchSilenceDb,
        ],
    ),
    (
        "filters",
        "Calibration & Filters",
        &[
            NoteParam::TargetRms,
            NoteParam::CalibrationGainMultiplier,
            NoteParam::LowCutMultiplier,
            NoteParam::HighCutMultiplier,
        ],
    ),
];

/// Editor-facing operations on the detection store.
pub struct TuningFacade {
    store: Arc<DetectionStore>,
    paths: ConfigPaths,
    revision: AtomicU64,
}

impl TuningFacade {
    /// Facade over the process-wide store and default config paths,
    /// restoring persisted state from disk.
    pub fn new() -> Self {
        Self::with_store(DetectionStore::global(), ConfigPaths::resolve_default())
    }

    /// Facade over an explicit store and config root (tests, embedding).
    pub fn with_store(store: Arc<DetectionStore>, paths: ConfigPaths) -> Self {
        let facade = Self {
            store,
            paths,
            revision: AtomicU64::new(0),
        };
        facade.load_from_disk();
        facade
    }

    pub fn store(&self) -> &Arc<DetectionStore> {
        &self.store
    }

    /// Bumped on every edit so a UI can cheaply poll for refresh.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Relaxed)
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::Relaxed);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Schema access
    // ─────────────────────────────────────────────────────────────────────

    pub fn categories(&self) -> Vec<TuningCategory> {
        CATEGORY_DEFS
            .iter()
            .map(|(id, title, params)| TuningCategory {
                id,
                title,
                parameters: params
                    .iter()
                    .map(|p| &parameter_descriptors()[p.index()])
                    .collect(),
            })
            .collect()
    }

    pub fn string_labels(&self) -> [&'static str; STRING_COUNT] {
        let mut labels = [""; STRING_COUNT];
        for (slot, string) in labels.iter_mut().zip(StringId::all()) {
            *slot = string.label();
        }
        labels
    }

    // ─────────────────────────────────────────────────────────────────────
    // Value access and edits
    // ─────────────────────────────────────────────────────────────────────

    /// Current (in-edit) value by key; unknown keys read 0.
    pub fn parameter_value(&self, key: &str, string_idx: usize) -> f32 {
        self.store.current_value_from_key(key, string_idx)
    }

    /// Committed (revert target) value by key.
    pub fn baseline_value(&self, key: &str, string_idx: usize) -> f32 {
        self.store.committed_value_from_key(key, string_idx)
    }

    pub fn set_parameter_value(&self, key: &str, string_idx: usize, value: f32) {
        self.store.set_value_from_key(key, string_idx, value);
        self.bump_revision();
    }

    pub fn begin_batch_edit(&self) {
        self.store.begin_batch();
    }

    pub fn end_batch_edit(&self) {
        self.store.end_batch();
    }

    pub fn undo(&self) {
        self.store.undo();
        self.bump_revision();
    }

    pub fn redo(&self) {
        self.store.redo();
        self.bump_revision();
    }

    pub fn revert(&self) {
        self.store.revert();
        self.bump_revision();
    }

    pub fn reset_to_defaults(&self) {
        self.store.reset_to_defaults();
        self.bump_revision();
    }

    /// Commit and persist both the committed set and the named states.
    pub fn commit(&self) {
        self.store.commit();
        self.persist_committed();
        self.persist_saved_states();
        self.bump_revision();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Named states
    // ─────────────────────────────────────────────────────────────────────

    pub fn saved_states(&self) -> Vec<String> {
        self.store.list_states()
    }

    pub fn save_state(&self, name: &str) {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return;
        }
        self.store.save_state(trimmed);
        self.persist_saved_states();
        self.bump_revision();
    }

    pub fn load_state(&self, name: &str) -> bool {
        if self.store.load_state(name) {
            self.bump_revision();
            true
        } else {
            false
        }
    }

    pub fn delete_state(&self, name: &str) -> bool {
        if self.store.delete_state(name) {
            self.persist_saved_states();
            self.bump_revision();
            true
        } else {
            false
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Persistence
    // ─────────────────────────────────────────────────────────────────────

    /// Restore committed parameters and named states from disk. The
    /// calibration multiplier row is captured before the load and written
    /// back afterwards; only the calibration profile may change it.
    pub fn load_from_disk(&self) {
        let saved_multipliers: [f32; STRING_COUNT] = std::array::from_fn(|s| {
            self.store
                .current_value(NoteParam::CalibrationGainMultiplier, s)
        });

        if let Some(value) = read_json(&self.paths.committed_file()) {
            let set = parameter_set_from_value(&value);
            self.store.apply_committed_snapshot(&set);
        }

        self.store.begin_batch();
        for (s, &mult) in saved_multipliers.iter().enumerate() {
            self.store
                .set_value(NoteParam::CalibrationGainMultiplier, s, mult);
        }
        self.store.end_batch();

        let mut states: BTreeMap<String, ParameterSet> = BTreeMap::new();
        if let Some(Value::Object(root)) = read_json(&self.paths.states_file()) {
            for (name, value) in &root {
                states.insert(name.clone(), parameter_set_from_value(value));
            }
        }
        self.load_snapshots_from_directory(&mut states);
        self.store.replace_saved_states(states);
        self.bump_revision();
    }

    fn load_snapshots_from_directory(&self, states: &mut BTreeMap<String, ParameterSet>) {
        let dir = self.paths.snapshots_dir();
        let Ok(entries) = fs::read_dir(&dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                let Some(value) = read_json(&path) else {
                    continue;
                };
                let label = value
                    .get("label")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| {
                        path.file_stem()
                            .and_then(|s| s.to_str())
                            .map(str::to_string)
                    });
                if let Some(label) = label {
                    states.insert(label, parameter_set_from_value(&value));
                }
            }
        }
    }

    fn persist_committed(&self) {
        let set = self.store.snapshot_committed();
        let path = self.paths.committed_file();
        if !write_json(&path, &parameter_set_to_tuning_value(&set)) {
            log::warn!("failed to persist committed parameters to {path:?}");
        }
    }

    fn persist_saved_states(&self) {
        let snapshot = self.store.saved_states_snapshot();
        self.persist_snapshots_to_directory(&snapshot);
        self.persist_states_file(&snapshot);
    }

    fn persist_snapshots_to_directory(&self, snapshot: &BTreeMap<String, ParameterSet>) {
        let dir = self.paths.snapshots_dir();
        if fs::create_dir_all(&dir).is_err() {
            return;
        }

        let mut retained: Vec<String> = Vec::with_capacity(snapshot.len());
        for (label, set) in snapshot {
            let file_name = snapshot_file_name_for_label(label);
            let mut value = parameter_set_to_tuning_value(set);
            if let Some(obj) = value.as_object_mut() {
                obj.insert("label".to_string(), json!(label));
            }
            if !write_json(&dir.join(&file_name), &value) {
                log::warn!("failed to write snapshot {file_name}");
                continue;
            }
            retained.push(file_name);
        }

        // Prune snapshot files for states that no longer exist.
        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(str::to_string);
                if let (true, Some(name)) = (is_json, name) {
                    if !retained.contains(&name) {
                        let _ = fs::remove_file(&path);
                    }
                }
            }
        }
    }

    fn persist_states_file(&self, snapshot: &BTreeMap<String, ParameterSet>) {
        let mut root = Map::new();
        for (name, set) in snapshot {
            root.insert(name.clone(), parameter_set_to_tuning_value(set));
        }
        let path = self.paths.states_file();
        if !write_json(&path, &Value::Object(root)) {
            log::warn!("failed to persist named states to {path:?}");
        }
    }
}

impl Default for TuningFacade {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────
// JSON helpers
// ─────────────────────────────────────────────────────────────────────────

fn read_json(path: &Path) -> Option<Value> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&text) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("failed to parse {path:?}: {err}");
            None
        }
    }
}

fn write_json(path: &Path, value: &Value) -> bool {
    if let Some(parent) = path.parent() {
        if fs::create_dir_all(parent).is_err() {
            return false;
        }
    }
    match serde_json::to_string_pretty(value) {
        Ok(text) => fs::write(path, text).is_ok(),
        Err(_) => false,
    }
}

fn float_row(value: &Value) -> Option<[f32; STRING_COUNT]> {
    let arr = value.as_array()?;
    if arr.len() != STRING_COUNT {
        return None;
    }
    let mut row = [0.0f32; STRING_COUNT];
    for (slot, v) in row.iter_mut().zip(arr) {
        *slot = v.as_f64()? as f32;
    }
    Some(row)
}

/// Build a parameter set from a tuning JSON object: defaults overlaid with
/// present rows, legacy `calibrationLift` converted, and the calibration
/// multiplier row defaulting to unity when absent.
fn parameter_set_from_value(value: &Value) -> ParameterSet {
    let mut set: ParameterSet = serde_json::from_value(value.clone()).unwrap_or_default();

    if value.get("targetRms").is_none() {
        if let Some(lift) = value.get("calibrationLift").and_then(float_row) {
            for (target, l) in set.target_rms.iter_mut().zip(lift) {
                *target = LEGACY_LIFT_TO_TARGET_RMS * l;
            }
        }
    }

    if value.get("calibrationGainMultiplier").is_none() {
        set.calibration_gain_multiplier = [1.0; STRING_COUNT];
    }

    set
}

/// Serialize a parameter set for tuning files; the calibration multiplier
/// row is owned by the calibration profile and stays out.
fn parameter_set_to_tuning_value(set: &ParameterSet) -> Value {
    let mut value = serde_json::to_value(set).unwrap_or_else(|_| json!({}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("calibrationGainMultiplier");
    }
    value
}

fn sanitize_snapshot_name(raw: &str) -> String {
    let normalized = raw.trim().to_lowercase();
    let mut result = String::with_capacity(normalized.len());
    for ch in normalized.chars() {
        if ch.is_alphanumeric() {
            result.push(ch);
        } else if ch.is_whitespace() {
            result.push('_');
        } else if ch == '-' || ch == '_' {
            result.push(ch);
        }
    }
    if result.is_empty() {
        result = "snapshot".to_string();
    }
    while result.contains("__") {
        result = result.replace("__", "_");
    }
    result.chars().take(48).collect()
}

/// Snapshot file name: sanitized label plus the first eight hex digits of
/// the label's SHA-1, so renames that collide after sanitizing stay unique.
pub fn snapshot_file_name_for_label(label: &str) -> String {
    let digest = Sha1::digest(label.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    format!("{}_{}.json", sanitize_snapshot_name(label), &hex[..8])
}
