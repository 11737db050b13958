//! Per-hop frame analysis
//!
//! `FrameDetector` is the seam between a string tracker and its DSP: one
//! call per hop, two numbers back. `HopAnalyzer` is the production
//! implementation, owning a spectral-flux onset detector and a YIN-family
//! pitch detector plus the input normalization both expect.

use ht_core::{HtResult, Sample};

use crate::{
    block_peak, OnsetConfig, PitchAlgorithm, PitchConfig, PitchDetector, SpectralFluxOnset,
};

/// Pitch search floor in Hz.
pub const PITCH_MIN_HZ: f32 = 60.0;
/// Pitch search ceiling in Hz.
pub const PITCH_MAX_HZ: f32 = 6000.0;

/// Onset inputs are peak-normalized to this level before analysis.
const ONSET_NORM_PEAK: f32 = 0.35;
/// Pitch inputs are peak-normalized to this level before analysis.
const PITCH_NORM_PEAK: f32 = 0.45;

/// Detector configuration derived by the tracker each time the sample rate,
/// hop, or parameter generation changes.
#[derive(Debug, Clone, Copy)]
pub struct AnalyzerConfig {
    pub sample_rate: f32,
    pub hop: usize,
    pub fft_size: usize,
    pub onset_silence_db: f32,
    /// Already clamped to 0.01..0.18 by the caller
    pub onset_threshold: f32,
    pub pitch_silence_db: f32,
    pub pitch_tolerance: f32,
    pub pitch_algorithm: PitchAlgorithm,
}

/// One analysis step per hop: onset strength and pitch.
pub trait FrameDetector: Send {
    /// (Re)build internal state for a new configuration.
    fn configure(&mut self, config: &AnalyzerConfig) -> HtResult<()>;

    /// Analyze one hop. `onset_hop` and `pitch_hop` are the two signal
    /// conditioning paths the tracker prepared (they may alias the same
    /// buffer). Returns `(onset_strength, pitch_hz)` with `pitch_hz < 0`
    /// meaning unvoiced.
    fn feed(&mut self, onset_hop: &[Sample], pitch_hop: &[Sample]) -> (f32, f32);

    /// Drop rolling state without reconfiguring.
    fn reset(&mut self);
}

/// Production detector pair.
#[derive(Default)]
pub struct HopAnalyzer {
    onset: Option<SpectralFluxOnset>,
    pitch: Option<PitchDetector>,
    onset_scratch: Vec<Sample>,
    pitch_scratch: Vec<Sample>,
}

impl HopAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn boxed() -> Box<dyn FrameDetector> {
        Box::new(Self::new())
    }

    fn normalize_into(input: &[Sample], target_peak: f32, scratch: &mut Vec<Sample>) {
        scratch.clear();
        scratch.extend_from_slice(input);
        let peak = block_peak(input);
        if peak > 1.0e-5 {
            let gain = (target_peak / peak).min(1.0);
            if gain < 1.0 {
                for s in scratch.iter_mut() {
                    *s *= gain;
                }
            }
        }
    }
}

impl FrameDetector for HopAnalyzer {
    fn configure(&mut self, config: &AnalyzerConfig) -> HtResult<()> {
        self.onset = None;
        self.pitch = None;

        let onset = SpectralFluxOnset::new(&OnsetConfig {
            sample_rate: config.sample_rate,
            hop: config.hop,
            fft_size: config.fft_size,
            silence_db: config.onset_silence_db,
            threshold: config.onset_threshold,
        })?;
        let pitch = PitchDetector::new(&PitchConfig {
            sample_rate: config.sample_rate,
            hop: config.hop,
            fft_size: config.fft_size,
            silence_db: config.pitch_silence_db,
            tolerance: config.pitch_tolerance,
            min_hz: PITCH_MIN_HZ,
            max_hz: PITCH_MAX_HZ,
            algorithm: config.pitch_algorithm,
        })?;

        self.onset = Some(onset);
        self.pitch = Some(pitch);
        Ok(())
    }

    fn feed(&mut self, onset_hop: &[Sample], pitch_hop: &[Sample]) -> (f32, f32) {
        let (Some(onset), Some(pitch)) = (self.onset.as_mut(), self.pitch.as_mut()) else {
            return (0.0, -1.0);
        };

        Self::normalize_into(onset_hop, ONSET_NORM_PEAK, &mut self.onset_scratch);
        let strength = onset.feed(&self.onset_scratch);

        Self::normalize_into(pitch_hop, PITCH_NORM_PEAK, &mut self.pitch_scratch);
        let mut hz = pitch.feed(&self.pitch_scratch);
        if hz > 0.0 && !(PITCH_MIN_HZ..=PITCH_MAX_HZ).contains(&hz) {
            hz = -1.0;
        }
        (strength, hz)
    }

    fn reset(&mut self) {
        if let Some(onset) = self.onset.as_mut() {
            onset.reset();
        }
        if let Some(pitch) = self.pitch.as_mut() {
            pitch.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyzer_config() -> AnalyzerConfig {
        AnalyzerConfig {
            sample_rate: 48000.0,
            hop: 512,
            fft_size: 4096,
            onset_silence_db: -85.0,
            onset_threshold: 0.024,
            pitch_silence_db: -90.0,
            pitch_tolerance: 0.40,
            pitch_algorithm: PitchAlgorithm::Yin,
        }
    }

    fn sine(freq: f32, sr: f32, n: usize, amp: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    #[test]
    fn test_unconfigured_is_inert() {
        let mut analyzer = HopAnalyzer::new();
        let hop = vec![0.1; 512];
        assert_eq!(analyzer.feed(&hop, &hop), (0.0, -1.0));
    }

    #[test]
    fn test_attack_then_steady_pitch() {
        let mut analyzer = HopAnalyzer::new();
        analyzer.configure(&analyzer_config()).unwrap();

        let silence = vec![0.0; 512];
        for _ in 0..8 {
            analyzer.feed(&silence, &silence);
        }

        let tone = sine(110.0, 48000.0, 512 * 16, 0.2);
        let mut saw_onset = false;
        let mut last_hz = -1.0;
        for hop in tone.chunks(512) {
            let (strength, hz) = analyzer.feed(hop, hop);
            if strength > 0.0 {
                saw_onset = true;
            }
            last_hz = hz;
        }
        assert!(saw_onset, "no onset strength during attack");
        assert!((last_hz - 110.0).abs() < 3.0, "pitch settled at {last_hz}");
    }

    #[test]
    fn test_reconfigure_replaces_detectors() {
        let mut analyzer = HopAnalyzer::new();
        analyzer.configure(&analyzer_config()).unwrap();
        let mut cfg = analyzer_config();
        cfg.fft_size = 100; // invalid, configure must fail and disarm
        assert!(analyzer.configure(&cfg).is_err());
        let hop = vec![0.1; 512];
        assert_eq!(analyzer.feed(&hop, &hop), (0.0, -1.0));
    }
}
