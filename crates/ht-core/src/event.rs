//! Note events and per-frame features

use serde::{Deserialize, Serialize};

/// Articulation label attached to a finished note by the fusion pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Articulation {
    /// No articulation detected
    #[default]
    #[serde(rename = "")]
    None,
    /// Fret shift of two or more between adjacent notes
    #[serde(rename = "slide")]
    Slide,
    /// Ascending one- or two-fret legato
    #[serde(rename = "hammer")]
    Hammer,
    /// Descending one- or two-fret legato
    #[serde(rename = "pull")]
    Pull,
    /// Short, low-velocity chug
    #[serde(rename = "pm")]
    PalmMute,
}

impl Articulation {
    #[inline]
    pub fn is_none(&self) -> bool {
        matches!(self, Articulation::None)
    }

    /// Wire string used in events.json ("", "slide", "hammer", "pull", "pm").
    pub fn as_str(&self) -> &'static str {
        match self {
            Articulation::None => "",
            Articulation::Slide => "slide",
            Articulation::Hammer => "hammer",
            Articulation::Pull => "pull",
            Articulation::PalmMute => "pm",
        }
    }
}

/// One detected note on one string.
///
/// `end_sec` tracks the current frame time while the note is open and is
/// finalized on close; the fusion pass labels `articulation` afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEvent {
    /// String index, 0..5
    #[serde(rename = "string")]
    pub string_idx: usize,
    /// Fret, 0..24
    pub fret: i32,
    /// Absolute MIDI pitch
    pub midi: i32,
    /// Onset time in seconds
    #[serde(rename = "start")]
    pub start_sec: f32,
    /// Release time in seconds (equals start until closed)
    #[serde(rename = "end")]
    pub end_sec: f32,
    /// Relative loudness, 0..1
    pub velocity: f32,
    /// Articulation label, empty until fused
    pub articulation: Articulation,
}

impl NoteEvent {
    /// A note is finished once its end has moved past its start.
    #[inline]
    pub fn is_finished(&self) -> bool {
        self.end_sec > self.start_sec
    }

    #[inline]
    pub fn duration_sec(&self) -> f32 {
        (self.end_sec - self.start_sec).max(0.0)
    }
}

/// Rolling per-hop features inside a tracker.
#[derive(Debug, Clone, Copy)]
pub struct FrameFeatures {
    /// Frame center time in seconds
    pub t_sec: f32,
    /// Detected pitch in Hz, negative when unvoiced
    pub pitch_hz: f32,
    /// Cents relative to the open string
    pub pitch_cents: f32,
    /// Onset detector output, non-negative
    pub onset_strength: f32,
    /// Envelope RMS of the band-filtered frame
    pub envelope_rms: f32,
}

impl Default for FrameFeatures {
    fn default() -> Self {
        Self {
            t_sec: 0.0,
            pitch_hz: -1.0,
            pitch_cents: 0.0,
            onset_strength: 0.0,
            envelope_rms: 0.0,
        }
    }
}

/// Engine-wide tracker configuration (the per-string knobs live in the
/// detection parameter store).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Base onset threshold scaled per string by `onsetThresholdScale`
    pub onset_threshold: f32,
    /// Minimum note duration in seconds
    pub min_note_dur_sec: f32,
    /// Nominal analysis hop in seconds
    pub hop_sec: f32,
    /// Cents delta treated as a slide by downstream consumers
    pub slide_delta_cents: f32,
    /// Cents delta treated as a bend by downstream consumers
    pub bend_delta_cents: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            onset_threshold: 0.020,
            min_note_dur_sec: 0.045,
            hop_sec: 0.010,
            slide_delta_cents: 120.0,
            bend_delta_cents: 35.0,
        }
    }
}
