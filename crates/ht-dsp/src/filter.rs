//! One-pole band-pass conditioning filter

use ht_core::Sample;

/// One-pole high-pass followed by a one-pole low-pass.
///
/// Pole placement is `exp(-2π·fc/sr)` for both sections; the high cut is
/// kept at least 10 Hz above the low cut.
#[derive(Debug, Clone, Default)]
pub struct OnePoleBandpass {
    hp_alpha: f32,
    lp_beta: f32,
    hp_state: f32,
    hp_prev_input: f32,
    lp_state: f32,
}

impl OnePoleBandpass {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.hp_state = 0.0;
        self.hp_prev_input = 0.0;
        self.lp_state = 0.0;
    }

    /// Configure both sections. A non-positive sample rate degrades to a
    /// pass-through with cleared state.
    pub fn configure(&mut self, sample_rate: f32, low_cut_hz: f32, high_cut_hz: f32) {
        self.reset();
        if sample_rate <= 0.0 {
            self.hp_alpha = 0.0;
            self.lp_beta = 1.0;
            return;
        }

        let low = low_cut_hz.max(1.0);
        let high = high_cut_hz.max(low + 10.0);

        self.hp_alpha = (-2.0 * std::f32::consts::PI * low / sample_rate).exp();
        self.lp_beta = (-2.0 * std::f32::consts::PI * high / sample_rate).exp();
    }

    #[inline]
    pub fn process(&mut self, x: Sample) -> Sample {
        let hp = self.hp_alpha * (self.hp_state + x - self.hp_prev_input);
        self.hp_prev_input = x;
        self.hp_state = hp;

        let lp = (1.0 - self.lp_beta) * hp + self.lp_beta * self.lp_state;
        self.lp_state = lp;
        lp
    }

    /// Filter a block into `out` (lengths must match).
    pub fn process_block(&mut self, input: &[Sample], out: &mut [Sample]) {
        debug_assert_eq!(input.len(), out.len());
        for (o, &x) in out.iter_mut().zip(input.iter()) {
            *o = self.process(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, sr: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / sr).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>() / x.len() as f64).sqrt() as f32
    }

    #[test]
    fn test_passband_keeps_most_energy() {
        let sr = 48000.0;
        let mut filter = OnePoleBandpass::new();
        filter.configure(sr, 37.0, 445.0);

        let input = sine(82.41, sr, 9600);
        let mut out = vec![0.0; input.len()];
        filter.process_block(&input, &mut out);

        // Skip the settling transient, then expect better than -3 dB.
        let settled = rms(&out[2400..]);
        assert!(settled > 0.5, "passband rms {settled}");
    }

    #[test]
    fn test_stopband_attenuates() {
        let sr = 48000.0;
        let mut filter = OnePoleBandpass::new();
        filter.configure(sr, 37.0, 445.0);

        let input = sine(8000.0, sr, 9600);
        let mut out = vec![0.0; input.len()];
        filter.process_block(&input, &mut out);

        let settled = rms(&out[2400..]);
        assert!(settled < 0.2, "stopband rms {settled}");
    }

    #[test]
    fn test_dc_blocked() {
        let mut filter = OnePoleBandpass::new();
        filter.configure(48000.0, 40.0, 400.0);
        let mut out = vec![0.0; 48000];
        filter.process_block(&vec![1.0; 48000], &mut out);
        assert!(out.last().unwrap().abs() < 0.01);
    }
}
