//! Spectral-flux onset detection

use ht_core::{HtError, HtResult};
use realfft::{RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::sync::Arc;

use crate::{amplitude_db, block_rms};

/// Configuration for [`SpectralFluxOnset`].
#[derive(Debug, Clone, Copy)]
pub struct OnsetConfig {
    pub sample_rate: f32,
    /// Samples fed per call
    pub hop: usize,
    /// Analysis window, power of two, >= hop
    pub fft_size: usize,
    /// Frames whose RMS falls below this level report zero strength
    pub silence_db: f32,
    /// Normalized flux below this level reports zero strength
    pub threshold: f32,
}

/// Spectral-flux onset detector.
///
/// Keeps a sliding window of the most recent `fft_size` samples, fed one hop
/// at a time. Strength per hop is the half-wave-rectified spectral flux
/// against the previous hop's magnitude spectrum, normalized by the current
/// magnitude sum, so a fresh attack from silence reads close to 1.0 and a
/// steady tone reads 0.
pub struct SpectralFluxOnset {
    fft: Arc<dyn RealToComplex<f32>>,
    hop: usize,
    fft_size: usize,
    silence_db: f32,
    threshold: f32,
    window: Vec<f32>,
    sliding: Vec<f32>,
    fft_input: Vec<f32>,
    fft_output: Vec<Complex<f32>>,
    magnitudes: Vec<f32>,
    prev_magnitudes: Vec<f32>,
}

impl SpectralFluxOnset {
    pub fn new(config: &OnsetConfig) -> HtResult<Self> {
        if config.sample_rate <= 0.0 {
            return Err(HtError::InvalidSampleRate(config.sample_rate));
        }
        if config.hop == 0 || config.fft_size < config.hop || !config.fft_size.is_power_of_two() {
            return Err(HtError::DetectorInit(format!(
                "bad onset sizes hop={} fft={}",
                config.hop, config.fft_size
            )));
        }

        let mut planner = RealFftPlanner::new();
        let fft = planner.plan_fft_forward(config.fft_size);
        let bins = config.fft_size / 2 + 1;

        let window = (0..config.fft_size)
            .map(|i| {
                0.5 * (1.0
                    - (2.0 * std::f32::consts::PI * i as f32 / config.fft_size as f32).cos())
            })
            .collect();

        Ok(Self {
            fft,
            hop: config.hop,
            fft_size: config.fft_size,
            silence_db: config.silence_db,
            threshold: config.threshold,
            window,
            sliding: vec![0.0; config.fft_size],
            fft_input: vec![0.0; config.fft_size],
            fft_output: vec![Complex::new(0.0, 0.0); bins],
            magnitudes: vec![0.0; bins],
            prev_magnitudes: vec![0.0; bins],
        })
    }

    /// Feed one hop (shorter slices are zero-padded) and return the onset
    /// strength for this frame.
    pub fn feed(&mut self, hop_samples: &[f32]) -> f32 {
        let n = hop_samples.len().min(self.hop);
        self.sliding.copy_within(self.hop.., 0);
        let tail_start = self.fft_size - self.hop;
        let tail = &mut self.sliding[tail_start..];
        tail[..n].copy_from_slice(&hop_samples[..n]);
        tail[n..].fill(0.0);

        for (dst, (&s, &w)) in self
            .fft_input
            .iter_mut()
            .zip(self.sliding.iter().zip(self.window.iter()))
        {
            *dst = s * w;
        }
        if self.fft.process(&mut self.fft_input, &mut self.fft_output).is_err() {
            return 0.0;
        }

        let mut flux = 0.0f32;
        let mut total = 0.0f32;
        for (i, c) in self.fft_output.iter().enumerate() {
            let mag = (c.re * c.re + c.im * c.im).sqrt();
            self.magnitudes[i] = mag;
            total += mag;
            let rise = mag - self.prev_magnitudes[i];
            if rise > 0.0 {
                flux += rise;
            }
        }
        std::mem::swap(&mut self.magnitudes, &mut self.prev_magnitudes);

        let silent = amplitude_db(block_rms(&hop_samples[..n])) < self.silence_db;
        if silent || total < 1.0e-9 {
            return 0.0;
        }

        let strength = flux / total;
        if strength >= self.threshold {
            strength
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        self.sliding.fill(0.0);
        self.prev_magnitudes.fill(0.0);
        self.magnitudes.fill(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(hop: usize, fft: usize) -> OnsetConfig {
        OnsetConfig {
            sample_rate: 48000.0,
            hop,
            fft_size: fft,
            silence_db: -85.0,
            threshold: 0.024,
        }
    }

    fn sine(freq: f32, sr: f32, n: usize, amp: f32) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    #[test]
    fn test_rejects_bad_sizes() {
        assert!(SpectralFluxOnset::new(&config(0, 1024)).is_err());
        assert!(SpectralFluxOnset::new(&config(512, 100)).is_err());
        assert!(SpectralFluxOnset::new(&config(512, 256)).is_err());
    }

    #[test]
    fn test_silence_reports_zero() {
        let mut det = SpectralFluxOnset::new(&config(512, 4096)).unwrap();
        for _ in 0..16 {
            assert_eq!(det.feed(&vec![0.0; 512]), 0.0);
        }
    }

    #[test]
    fn test_attack_spikes_then_settles() {
        let mut det = SpectralFluxOnset::new(&config(512, 4096)).unwrap();
        for _ in 0..8 {
            det.feed(&vec![0.0; 512]);
        }

        let tone = sine(220.0, 48000.0, 512 * 24, 0.2);
        let first = det.feed(&tone[..512]);
        assert!(first > 0.5, "attack strength {first}");

        // Once the window is saturated with the steady tone the flux drops
        // below the report threshold.
        let mut last = first;
        for hop in tone[512..].chunks(512) {
            last = det.feed(hop);
        }
        assert_eq!(last, 0.0, "steady-state strength {last}");
    }

    #[test]
    fn test_quiet_attack_gated_by_silence_db() {
        let mut cfg = config(512, 4096);
        cfg.silence_db = -30.0;
        let mut det = SpectralFluxOnset::new(&cfg).unwrap();
        let tone = sine(220.0, 48000.0, 512, 0.001);
        assert_eq!(det.feed(&tone), 0.0);
    }
}
