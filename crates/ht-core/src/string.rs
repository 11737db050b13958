//! String identifiers and tuning

use serde::{Deserialize, Serialize};

use crate::{midi_to_hz, STRING_COUNT};

/// One of the six strings, low E (index 0) to high E (index 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(usize)]
pub enum StringId {
    LowE = 0,
    A = 1,
    D = 2,
    G = 3,
    B = 4,
    HighE = 5,
}

impl StringId {
    pub fn all() -> [StringId; STRING_COUNT] {
        [
            StringId::LowE,
            StringId::A,
            StringId::D,
            StringId::G,
            StringId::B,
            StringId::HighE,
        ]
    }

    /// Construct from a raw index; out-of-range values return `None`.
    pub fn from_index(index: usize) -> Option<StringId> {
        Self::all().get(index).copied()
    }

    #[inline]
    pub fn index(&self) -> usize {
        *self as usize
    }

    /// Calibration prompt name ("Low E", "A", ..., "High e").
    pub fn display_name(&self) -> &'static str {
        match self {
            StringId::LowE => "Low E",
            StringId::A => "A",
            StringId::D => "D",
            StringId::G => "G",
            StringId::B => "B",
            StringId::HighE => "High e",
        }
    }

    /// Short slider label ("E", "A", "D", "G", "B", "e").
    pub fn label(&self) -> &'static str {
        match self {
            StringId::LowE => "E",
            StringId::A => "A",
            StringId::D => "D",
            StringId::G => "G",
            StringId::B => "B",
            StringId::HighE => "e",
        }
    }
}

/// Open-string MIDI pitches, low to high. Default is standard tuning
/// E2 A2 D3 G3 B3 E4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tuning {
    pub string_midi: [i32; STRING_COUNT],
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            string_midi: [40, 45, 50, 55, 59, 64],
        }
    }
}

const NOTE_NAMES: [&str; 12] = [
    "C", "Cs", "D", "Ds", "E", "F", "Fs", "G", "Gs", "A", "As", "B",
];

impl Tuning {
    #[inline]
    pub fn open_midi(&self, string: StringId) -> i32 {
        self.string_midi[string.index()]
    }

    #[inline]
    pub fn open_hz(&self, string: StringId) -> f32 {
        midi_to_hz(self.open_midi(string))
    }

    /// File-name token for a string: the open-string note name, with the
    /// octave appended when another string shares the same note base
    /// (standard tuning: `E2 A D G B E4`).
    pub fn note_token(&self, string: StringId) -> String {
        let midi = self.open_midi(string);
        let note = ((midi % 12) + 12) % 12;
        let octave = midi / 12 - 1;
        let base = NOTE_NAMES[note as usize];

        let duplicate = StringId::all().iter().any(|&other| {
            other != string && ((self.open_midi(other) % 12) + 12) % 12 == note
        });
        if duplicate {
            format!("{base}{octave}")
        } else {
            base.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_indices() {
        for (i, s) in StringId::all().iter().enumerate() {
            assert_eq!(s.index(), i);
            assert_eq!(StringId::from_index(i), Some(*s));
        }
        assert_eq!(StringId::from_index(6), None);
    }

    #[test]
    fn test_default_tuning() {
        let t = Tuning::default();
        assert_eq!(t.open_midi(StringId::LowE), 40);
        assert_eq!(t.open_midi(StringId::HighE), 64);
        assert!((t.open_hz(StringId::LowE) - 82.41).abs() < 0.01);
    }

    #[test]
    fn test_note_tokens_disambiguate_duplicates() {
        let t = Tuning::default();
        // Both E strings share the note base, so they carry octaves.
        assert_eq!(t.note_token(StringId::LowE), "E2");
        assert_eq!(t.note_token(StringId::HighE), "E4");
        // The others are unique.
        assert_eq!(t.note_token(StringId::A), "A");
        assert_eq!(t.note_token(StringId::D), "D");
        assert_eq!(t.note_token(StringId::G), "G");
        assert_eq!(t.note_token(StringId::B), "B");
    }
}
