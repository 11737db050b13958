//! MIDI and pitch math helpers

/// Convert a frequency to the nearest MIDI note number. Returns -1 for
/// non-positive frequencies.
#[inline]
pub fn hz_to_midi(hz: f32) -> i32 {
    if hz <= 0.0 {
        return -1;
    }
    (69.0 + 12.0 * (hz as f64 / 440.0).log2()).round() as i32
}

/// Convert a MIDI note number to frequency in Hz.
#[inline]
pub fn midi_to_hz(midi: i32) -> f32 {
    440.0 * 2.0f32.powf((midi as f32 - 69.0) / 12.0)
}

/// Signed cents between two frequencies (positive when `hz_a` is sharp of
/// `hz_b`). Zero when either frequency is non-positive.
#[inline]
pub fn cents_between(hz_a: f32, hz_b: f32) -> f32 {
    if hz_a <= 0.0 || hz_b <= 0.0 {
        return 0.0;
    }
    1200.0 * (hz_a / hz_b).log2()
}

/// Fret for a MIDI pitch relative to the open string.
#[inline]
pub fn midi_to_fret(midi: i32, open_midi: i32) -> i32 {
    midi - open_midi
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hz_to_midi_reference_points() {
        assert_eq!(hz_to_midi(440.0), 69);
        assert_eq!(hz_to_midi(82.41), 40);
        assert_eq!(hz_to_midi(-1.0), -1);
    }

    #[test]
    fn test_midi_hz_round_trip() {
        for midi in 28..100 {
            assert_eq!(hz_to_midi(midi_to_hz(midi)), midi);
        }
    }

    #[test]
    fn test_cents() {
        assert!((cents_between(440.0, 440.0)).abs() < 1e-4);
        assert!((cents_between(880.0, 440.0) - 1200.0).abs() < 1e-2);
        assert_eq!(cents_between(0.0, 440.0), 0.0);
    }

    #[test]
    fn test_fret() {
        assert_eq!(midi_to_fret(40, 40), 0);
        assert_eq!(midi_to_fret(64, 40), 24);
        assert_eq!(midi_to_fret(39, 40), -1);
    }
}
