//! Detection parameter schema
//!
//! The 15 per-string detection parameters: typed identifiers, slider
//! descriptors (label, range, step), the tabulated per-string defaults, and
//! the atomic view published to the audio thread.

use serde::{Deserialize, Serialize};

use crate::{AtomicF32, STRING_COUNT};

/// Number of detection parameters.
pub const PARAM_COUNT: usize = 15;

/// Identifier for one detection parameter (a row of six per-string floats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoteParam {
    OnsetThresholdScale,
    BaselineFloor,
    EnvelopeFloor,
    GateRatio,
    SustainFloorScale,
    RetriggerGateScale,
    PeakReleaseRatio,
    PitchTolerance,
    TargetRms,
    CalibrationGainMultiplier,
    LowCutMultiplier,
    HighCutMultiplier,
    AubioThresholdScale,
    OnsetSilenceDb,
    PitchSilenceDb,
}

impl NoteParam {
    pub fn all() -> [NoteParam; PARAM_COUNT] {
        [
            NoteParam::OnsetThresholdScale,
            NoteParam::BaselineFloor,
            NoteParam::EnvelopeFloor,
            NoteParam::GateRatio,
            NoteParam::SustainFloorScale,
            NoteParam::RetriggerGateScale,
            NoteParam::PeakReleaseRatio,
            NoteParam::PitchTolerance,
            NoteParam::TargetRms,
            NoteParam::CalibrationGainMultiplier,
            NoteParam::LowCutMultiplier,
            NoteParam::HighCutMultiplier,
            NoteParam::AubioThresholdScale,
            NoteParam::OnsetSilenceDb,
            NoteParam::PitchSilenceDb,
        ]
    }

    #[inline]
    pub fn index(&self) -> usize {
        Self::all().iter().position(|p| p == self).unwrap_or(0)
    }

    /// Stable key used in JSON files and the tuning UI.
    pub fn key(&self) -> &'static str {
        match self {
            NoteParam::OnsetThresholdScale => "onsetThresholdScale",
            NoteParam::BaselineFloor => "baselineFloor",
            NoteParam::EnvelopeFloor => "envelopeFloor",
            NoteParam::GateRatio => "gateRatio",
            NoteParam::SustainFloorScale => "sustainFloorScale",
            NoteParam::RetriggerGateScale => "retriggerGateScale",
            NoteParam::PeakReleaseRatio => "peakReleaseRatio",
            NoteParam::PitchTolerance => "pitchTolerance",
            NoteParam::TargetRms => "targetRms",
            NoteParam::CalibrationGainMultiplier => "calibrationGainMultiplier",
            NoteParam::LowCutMultiplier => "lowCutMultiplier",
            NoteParam::HighCutMultiplier => "highCutMultiplier",
            NoteParam::AubioThresholdScale => "aubioThresholdScale",
            NoteParam::OnsetSilenceDb => "onsetSilenceDb",
            NoteParam::PitchSilenceDb => "pitchSilenceDb",
        }
    }

    /// Resolve a JSON/UI key; unknown keys return `None`.
    pub fn from_key(key: &str) -> Option<NoteParam> {
        NoteParam::all().into_iter().find(|p| p.key() == key)
    }
}

/// Slider-facing description of one parameter.
#[derive(Debug, Clone)]
pub struct ParamDescriptor {
    pub param: NoteParam,
    pub key: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub min_value: f32,
    pub max_value: f32,
    pub step: f32,
    pub use_decibels: bool,
}

const DESCRIPTORS: [ParamDescriptor; PARAM_COUNT] = [
    ParamDescriptor {
        param: NoteParam::OnsetThresholdScale,
        key: "onsetThresholdScale",
        label: "Onset Threshold",
        description: "Onset detection threshold (spectral flux).",
        min_value: 0.02,
        max_value: 4.0,
        step: 0.001,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::BaselineFloor,
        key: "baselineFloor",
        label: "Baseline Floor",
        description: "Adaptive noise floor estimate.",
        min_value: 0.00002,
        max_value: 0.0100,
        step: 0.00001,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::EnvelopeFloor,
        key: "envelopeFloor",
        label: "Envelope Floor",
        description: "Minimum RMS before envelope resets to zero.",
        min_value: 0.00005,
        max_value: 0.0080,
        step: 0.00005,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::GateRatio,
        key: "gateRatio",
        label: "Gate Ratio",
        description: "Multiplier applied to baseline floor for note-on decisions.",
        min_value: 0.005,
        max_value: 10.0,
        step: 0.005,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::SustainFloorScale,
        key: "sustainFloorScale",
        label: "Sustain Floor Scale",
        description: "Multiplier applied to envelope floor for note-off decisions.",
        min_value: 0.10,
        max_value: 2.5,
        step: 0.01,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::RetriggerGateScale,
        key: "retriggerGateScale",
        label: "Retrigger Gate Scale",
        description: "Threshold multiplier used to retrigger open strings.",
        min_value: 0.20,
        max_value: 3.0,
        step: 0.01,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::PeakReleaseRatio,
        key: "peakReleaseRatio",
        label: "Peak Release Ratio",
        description: "Envelope decay target expressed as fraction of recent peak.",
        min_value: 0.02,
        max_value: 0.60,
        step: 0.005,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::PitchTolerance,
        key: "pitchTolerance",
        label: "Pitch Tolerance",
        description: "Maximum cents deviation allowed per hop before smoothing.",
        min_value: 0.2,
        max_value: 1.0,
        step: 0.01,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::TargetRms,
        key: "targetRms",
        label: "Target RMS",
        description: "Target RMS level for normalized signal.",
        min_value: 0.0001,
        max_value: 0.35,
        step: 0.0001,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::CalibrationGainMultiplier,
        key: "calibrationGainMultiplier",
        label: "Gain Multiplier",
        description: "Fine-tune multiplier applied to calculated calibration gain.",
        min_value: 0.2,
        max_value: 8.0,
        step: 0.01,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::LowCutMultiplier,
        key: "lowCutMultiplier",
        label: "Low Cut Multiplier",
        description: "Multiplier applied to open-string pitch to derive HPF cutoff.",
        min_value: 0.3,
        max_value: 0.9,
        step: 0.01,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::HighCutMultiplier,
        key: "highCutMultiplier",
        label: "High Cut Multiplier",
        description: "Multiplier applied to 24th-fret pitch to derive LPF cutoff.",
        min_value: 0.8,
        max_value: 1.8,
        step: 0.02,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::AubioThresholdScale,
        key: "aubioThresholdScale",
        label: "Onset Threshold (aubio)",
        description: "Scaling factor for the onset detector threshold.",
        min_value: 0.5,
        max_value: 3.0,
        step: 0.05,
        use_decibels: false,
    },
    ParamDescriptor {
        param: NoteParam::OnsetSilenceDb,
        key: "onsetSilenceDb",
        label: "Onset Silence (dB)",
        description: "Silence level fed to the onset detector.",
        min_value: -120.0,
        max_value: -30.0,
        step: 1.0,
        use_decibels: true,
    },
    ParamDescriptor {
        param: NoteParam::PitchSilenceDb,
        key: "pitchSilenceDb",
        label: "Pitch Silence (dB)",
        description: "Silence level fed to the pitch tracker.",
        min_value: -120.0,
        max_value: -30.0,
        step: 1.0,
        use_decibels: true,
    },
];

/// Descriptor table in parameter order.
pub fn parameter_descriptors() -> &'static [ParamDescriptor; PARAM_COUNT] {
    &DESCRIPTORS
}

/// Look up the descriptor for one parameter.
pub fn descriptor_for(param: NoteParam) -> &'static ParamDescriptor {
    &DESCRIPTORS[param.index()]
}

/// A full 15 x 6 parameter matrix.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterSet {
    #[serde(rename = "onsetThresholdScale")]
    pub onset_threshold_scale: [f32; STRING_COUNT],
    #[serde(rename = "baselineFloor")]
    pub baseline_floor: [f32; STRING_COUNT],
    #[serde(rename = "envelopeFloor")]
    pub envelope_floor: [f32; STRING_COUNT],
    #[serde(rename = "gateRatio")]
    pub gate_ratio: [f32; STRING_COUNT],
    #[serde(rename = "sustainFloorScale")]
    pub sustain_floor_scale: [f32; STRING_COUNT],
    #[serde(rename = "retriggerGateScale")]
    pub retrigger_gate_scale: [f32; STRING_COUNT],
    #[serde(rename = "peakReleaseRatio")]
    pub peak_release_ratio: [f32; STRING_COUNT],
    #[serde(rename = "pitchTolerance")]
    pub pitch_tolerance: [f32; STRING_COUNT],
    #[serde(rename = "targetRms")]
    pub target_rms: [f32; STRING_COUNT],
    #[serde(rename = "calibrationGainMultiplier")]
    pub calibration_gain_multiplier: [f32; STRING_COUNT],
    #[serde(rename = "lowCutMultiplier")]
    pub low_cut_multiplier: [f32; STRING_COUNT],
    #[serde(rename = "highCutMultiplier")]
    pub high_cut_multiplier: [f32; STRING_COUNT],
    #[serde(rename = "aubioThresholdScale")]
    pub aubio_threshold_scale: [f32; STRING_COUNT],
    #[serde(rename = "onsetSilenceDb")]
    pub onset_silence_db: [f32; STRING_COUNT],
    #[serde(rename = "pitchSilenceDb")]
    pub pitch_silence_db: [f32; STRING_COUNT],
}

impl Default for ParameterSet {
    fn default() -> Self {
        Self {
            onset_threshold_scale: [0.006, 0.009, 0.0116, 0.014, 0.016, 0.018],
            baseline_floor: [0.00018, 0.00022, 0.00026, 0.00032, 0.00037, 0.00042],
            envelope_floor: [0.00045, 0.00055, 0.00065, 0.00078, 0.00090, 0.00105],
            gate_ratio: [0.055, 0.10, 0.13, 0.17, 0.21, 0.25],
            sustain_floor_scale: [0.58, 0.70, 0.82, 1.0, 1.0, 1.0],
            retrigger_gate_scale: [1.40, 1.25, 1.10, 1.0, 1.0, 1.0],
            peak_release_ratio: [0.12, 0.13, 0.14, 0.16, 0.18, 0.20],
            pitch_tolerance: [0.40, 0.40, 0.45, 0.44, 0.50, 0.55],
            target_rms: [0.25; STRING_COUNT],
            calibration_gain_multiplier: [5.0; STRING_COUNT],
            low_cut_multiplier: [0.45, 0.50, 0.58, 0.65, 0.65, 0.65],
            high_cut_multiplier: [1.35, 1.28, 1.18, 1.10, 1.10, 1.10],
            aubio_threshold_scale: [1.2, 1.35, 1.6, 1.8, 1.8, 1.8],
            onset_silence_db: [-85.0, -85.0, -75.0, -75.0, -75.0, -75.0],
            pitch_silence_db: [-90.0, -90.0, -80.0, -80.0, -80.0, -80.0],
        }
    }
}

impl ParameterSet {
    fn row(&self, param: NoteParam) -> &[f32; STRING_COUNT] {
        match param {
            NoteParam::OnsetThresholdScale => &self.onset_threshold_scale,
            NoteParam::BaselineFloor => &self.baseline_floor,
            NoteParam::EnvelopeFloor => &self.envelope_floor,
            NoteParam::GateRatio => &self.gate_ratio,
            NoteParam::SustainFloorScale => &self.sustain_floor_scale,
            NoteParam::RetriggerGateScale => &self.retrigger_gate_scale,
            NoteParam::PeakReleaseRatio => &self.peak_release_ratio,
            NoteParam::PitchTolerance => &self.pitch_tolerance,
            NoteParam::TargetRms => &self.target_rms,
            NoteParam::CalibrationGainMultiplier => &self.calibration_gain_multiplier,
            NoteParam::LowCutMultiplier => &self.low_cut_multiplier,
            NoteParam::HighCutMultiplier => &self.high_cut_multiplier,
            NoteParam::AubioThresholdScale => &self.aubio_threshold_scale,
            NoteParam::OnsetSilenceDb => &self.onset_silence_db,
            NoteParam::PitchSilenceDb => &self.pitch_silence_db,
        }
    }

    fn row_mut(&mut self, param: NoteParam) -> &mut [f32; STRING_COUNT] {
        match param {
            NoteParam::OnsetThresholdScale => &mut self.onset_threshold_scale,
            NoteParam::BaselineFloor => &mut self.baseline_floor,
            NoteParam::EnvelopeFloor => &mut self.envelope_floor,
            NoteParam::GateRatio => &mut self.gate_ratio,
            NoteParam::SustainFloorScale => &mut self.sustain_floor_scale,
            NoteParam::RetriggerGateScale => &mut self.retrigger_gate_scale,
            NoteParam::PeakReleaseRatio => &mut self.peak_release_ratio,
            NoteParam::PitchTolerance => &mut self.pitch_tolerance,
            NoteParam::TargetRms => &mut self.target_rms,
            NoteParam::CalibrationGainMultiplier => &mut self.calibration_gain_multiplier,
            NoteParam::LowCutMultiplier => &mut self.low_cut_multiplier,
            NoteParam::HighCutMultiplier => &mut self.high_cut_multiplier,
            NoteParam::AubioThresholdScale => &mut self.aubio_threshold_scale,
            NoteParam::OnsetSilenceDb => &mut self.onset_silence_db,
            NoteParam::PitchSilenceDb => &mut self.pitch_silence_db,
        }
    }

    /// Value for one parameter on one string; out-of-range strings return
    /// `None`.
    pub fn get(&self, param: NoteParam, string_idx: usize) -> Option<f32> {
        self.row(param).get(string_idx).copied()
    }

    /// Set one cell; out-of-range strings are a no-op.
    pub fn set(&mut self, param: NoteParam, string_idx: usize, value: f32) {
        if let Some(slot) = self.row_mut(param).get_mut(string_idx) {
            *slot = value;
        }
    }

    /// All six values of one parameter.
    pub fn values(&self, param: NoteParam) -> [f32; STRING_COUNT] {
        *self.row(param)
    }

    /// Replace all six values of one parameter.
    pub fn set_values(&mut self, param: NoteParam, values: [f32; STRING_COUNT]) {
        *self.row_mut(param) = values;
    }
}

/// The audio-thread view of the parameter matrix: one atomic cell per value.
pub struct ActiveParameterSet {
    cells: [[AtomicF32; STRING_COUNT]; PARAM_COUNT],
}

impl ActiveParameterSet {
    pub fn new(initial: &ParameterSet) -> Self {
        let set = Self {
            cells: std::array::from_fn(|_| std::array::from_fn(|_| AtomicF32::new(0.0))),
        };
        set.publish(initial);
        set
    }

    /// Publish a full parameter set (release stores).
    pub fn publish(&self, source: &ParameterSet) {
        for param in NoteParam::all() {
            let row = &self.cells[param.index()];
            for (cell, value) in row.iter().zip(source.values(param)) {
                cell.store(value);
            }
        }
    }

    /// Wait-free, allocation-free read of one cell. Out-of-range strings
    /// read as 0.
    #[inline]
    pub fn value(&self, param: NoteParam, string_idx: usize) -> f32 {
        match self.cells[param.index()].get(string_idx) {
            Some(cell) => cell.load(),
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_round_trip() {
        for param in NoteParam::all() {
            assert_eq!(NoteParam::from_key(param.key()), Some(param));
        }
        assert_eq!(NoteParam::from_key("nope"), None);
    }

    #[test]
    fn test_descriptor_order_matches_params() {
        for (i, desc) in parameter_descriptors().iter().enumerate() {
            assert_eq!(desc.param.index(), i);
            assert_eq!(desc.key, desc.param.key());
            assert!(desc.min_value < desc.max_value);
        }
    }

    #[test]
    fn test_defaults_table() {
        let set = ParameterSet::default();
        assert_eq!(set.get(NoteParam::OnsetThresholdScale, 0), Some(0.006));
        assert_eq!(set.get(NoteParam::GateRatio, 5), Some(0.25));
        assert_eq!(set.get(NoteParam::OnsetSilenceDb, 2), Some(-75.0));
        assert_eq!(set.get(NoteParam::CalibrationGainMultiplier, 3), Some(5.0));
        assert_eq!(set.get(NoteParam::TargetRms, 6), None);
    }

    #[test]
    fn test_set_get() {
        let mut set = ParameterSet::default();
        set.set(NoteParam::PitchTolerance, 2, 0.9);
        assert_eq!(set.get(NoteParam::PitchTolerance, 2), Some(0.9));
        // out of range is a no-op
        set.set(NoteParam::PitchTolerance, 9, 0.1);
        assert_eq!(set.values(NoteParam::PitchTolerance)[2], 0.9);
    }

    #[test]
    fn test_active_view_publish() {
        let mut set = ParameterSet::default();
        set.set(NoteParam::TargetRms, 1, 0.125);
        let active = ActiveParameterSet::new(&set);
        assert_eq!(active.value(NoteParam::TargetRms, 1), 0.125);
        assert_eq!(active.value(NoteParam::TargetRms, 6), 0.0);
    }

    #[test]
    fn test_serde_partial_overlay() {
        let json = r#"{"gateRatio": [1.0, 1.0, 1.0, 1.0, 1.0, 1.0]}"#;
        let set: ParameterSet = serde_json::from_str(json).unwrap();
        assert_eq!(set.gate_ratio, [1.0; STRING_COUNT]);
        // missing rows keep their defaults
        assert_eq!(set.target_rms, ParameterSet::default().target_rms);
    }
}
