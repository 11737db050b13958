//! Live input meters

use ht_core::{AtomicF32, STRING_COUNT};
use ht_dsp::MeterEma;

/// Per-string EMA mix factors. The two lowest strings are smoothed harder
/// so their slow fundamentals do not flutter the display.
const METER_MIX: [f32; STRING_COUNT] = [0.35, 0.45, 1.0, 1.0, 1.0, 1.0];

/// Audio-side meter smoothing state.
#[derive(Debug, Clone)]
pub struct MeterSmoother {
    emas: [MeterEma; STRING_COUNT],
}

impl MeterSmoother {
    pub fn new() -> Self {
        Self {
            emas: std::array::from_fn(|s| MeterEma::new(METER_MIX[s])),
        }
    }

    /// Smooth one block's RMS levels in place and return the result.
    pub fn update(&mut self, levels: &[f32; STRING_COUNT]) -> [f32; STRING_COUNT] {
        let mut out = [0.0; STRING_COUNT];
        for (s, slot) in out.iter_mut().enumerate() {
            *slot = self.emas[s].update(levels[s].max(0.0));
        }
        out
    }

    pub fn levels(&self) -> [f32; STRING_COUNT] {
        std::array::from_fn(|s| self.emas[s].value())
    }

    pub fn reset(&mut self) {
        for ema in &mut self.emas {
            ema.reset();
        }
    }
}

impl Default for MeterSmoother {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free meter cells shared between the audio thread and consumers.
#[derive(Debug, Default)]
pub struct MeterBank {
    cells: [AtomicF32; STRING_COUNT],
}

impl MeterBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, levels: &[f32; STRING_COUNT]) {
        for (cell, &level) in self.cells.iter().zip(levels) {
            cell.store_relaxed(level);
        }
    }

    pub fn snapshot(&self) -> [f32; STRING_COUNT] {
        std::array::from_fn(|s| self.cells[s].load_relaxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_low_strings_smooth_slower() {
        let mut smoother = MeterSmoother::new();
        let levels = smoother.update(&[1.0; STRING_COUNT]);
        assert!((levels[0] - 0.35).abs() < 1e-6);
        assert!((levels[1] - 0.45).abs() < 1e-6);
        assert_eq!(levels[2], 1.0);
        assert_eq!(levels[5], 1.0);
    }

    #[test]
    fn test_bank_round_trip() {
        let bank = MeterBank::new();
        bank.publish(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        assert_eq!(bank.snapshot(), [0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
    }
}
