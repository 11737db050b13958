//! Per-string input calibration profile

use serde::{Deserialize, Serialize};

use crate::STRING_COUNT;

/// Lower clamp for calibration gain multipliers.
pub const CALIBRATION_GAIN_MIN: f32 = 0.2;
/// Upper clamp for calibration gain multipliers.
pub const CALIBRATION_GAIN_MAX: f32 = 8.0;

/// Measured input levels and derived gain multipliers for the six strings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationProfile {
    /// Average RMS observed during the capture window
    #[serde(rename = "avg")]
    pub avg_rms: [f32; STRING_COUNT],
    /// Peak RMS observed during the capture window
    #[serde(rename = "peak")]
    pub peak_rms: [f32; STRING_COUNT],
    /// Gain multipliers, `targetRms / avgRms` clamped to 0.2..8.0
    pub multipliers: [f32; STRING_COUNT],
    pub valid: bool,
}

impl Default for CalibrationProfile {
    fn default() -> Self {
        Self {
            avg_rms: [0.0; STRING_COUNT],
            peak_rms: [0.0; STRING_COUNT],
            multipliers: [1.0; STRING_COUNT],
            valid: false,
        }
    }
}

impl CalibrationProfile {
    /// Derive the multiplier for one string from a target level and a
    /// measured average.
    pub fn derive_multiplier(target_rms: f32, avg_rms: f32) -> f32 {
        if avg_rms > 0.0 {
            (target_rms / avg_rms).clamp(CALIBRATION_GAIN_MIN, CALIBRATION_GAIN_MAX)
        } else {
            1.0
        }
    }
}
