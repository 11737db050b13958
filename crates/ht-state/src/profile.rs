//! Calibration profile persistence
//!
//! One JSON file under the config root records the last calibration run:
//! per-string average and peak RMS, the derived gain multipliers, and a
//! timestamp. Profiles written before the multiplier field existed derive
//! multipliers from `targetRms / avg` on load.

use std::fs;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};

use ht_core::{CalibrationProfile, STRING_COUNT};

use crate::ConfigPaths;

/// Reads and writes `calibration_profile.json`.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    pub fn new(paths: &ConfigPaths) -> Self {
        Self {
            path: paths.calibration_profile_file(),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Load the persisted profile. `target_rms` supplies the per-string
    /// targets used to derive multipliers from legacy files. Returns `None`
    /// when the file is missing, malformed, or marked invalid.
    pub fn load(&self, target_rms: &[f32; STRING_COUNT]) -> Option<CalibrationProfile> {
        let text = fs::read_to_string(&self.path).ok()?;
        let value: Value = match serde_json::from_str(&text) {
            Ok(v) => v,
            Err(err) => {
                log::warn!("calibration profile parse failed: {err}");
                return None;
            }
        };

        let avg = float_row(value.get("avg")?)?;
        let peak = float_row(value.get("peak")?)?;
        if !value.get("valid").and_then(Value::as_bool).unwrap_or(true) {
            return None;
        }

        let multipliers = match value.get("multipliers").and_then(float_row) {
            Some(multipliers) => multipliers,
            None => {
                let mut derived = [1.0f32; STRING_COUNT];
                for (s, slot) in derived.iter_mut().enumerate() {
                    if avg[s] > 0.0 {
                        *slot = target_rms[s] / avg[s];
                    }
                }
                derived
            }
        };

        Some(CalibrationProfile {
            avg_rms: avg,
            peak_rms: peak,
            multipliers,
            valid: true,
        })
    }

    /// Persist a valid profile; invalid profiles are not written.
    pub fn save(&self, profile: &CalibrationProfile) -> bool {
        if !profile.valid {
            return false;
        }
        if let Some(parent) = self.path.parent() {
            if fs::create_dir_all(parent).is_err() {
                return false;
            }
        }

        let value = json!({
            "valid": true,
            "avg": profile.avg_rms.to_vec(),
            "peak": profile.peak_rms.to_vec(),
            "multipliers": profile.multipliers.to_vec(),
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        });

        match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                let ok = fs::write(&self.path, text).is_ok();
                if !ok {
                    log::warn!("failed to write calibration profile to {:?}", self.path);
                }
                ok
            }
            Err(_) => false,
        }
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
