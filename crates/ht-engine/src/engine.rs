//! Tab engine
//!
//! Owns the six string trackers, the shared event vector, and the
//! per-string active-index table. Each block runs the trackers in string
//! order and then the articulation fusion pass over finished events.

use std::sync::Arc;

use ht_core::{
    cents_between, midi_to_hz, Articulation, CalibrationProfile, ChannelBlock, NoteEvent,
    StringId, TrackerConfig, Tuning, STRING_COUNT,
};
use ht_state::DetectionStore;

use crate::StringTracker;

/// Adjacent notes closer than this are candidates for legato labels.
const FUSION_MAX_GAP_SEC: f32 = 0.12;
/// Same-fret follow-ups inside this gap with a soft attack read as chugs.
const FUSION_PM_GAP_SEC: f32 = 0.06;
/// Short...
const FUSION_PM_MAX_DUR_SEC: f32 = 0.18;
/// ...and quiet notes are palm mutes even without a neighbor.
const FUSION_PM_MAX_VELOCITY: f32 = 0.30;

/// Six trackers in lockstep over a shared event vector.
pub struct TabEngine {
    tuning: Tuning,
    cfg: TrackerConfig,
    store: Arc<DetectionStore>,
    calibration: CalibrationProfile,
    events: Vec<NoteEvent>,
    active_idx: [Option<usize>; STRING_COUNT],
    trackers: Vec<StringTracker>,
}

impl TabEngine {
    pub fn new(tuning: Tuning, cfg: TrackerConfig, store: Arc<DetectionStore>) -> Self {
        let calibration = CalibrationProfile::default();
        let trackers = StringId::all()
            .into_iter()
            .map(|string| {
                let mut tracker = StringTracker::new(string, tuning, cfg, store.clone());
                tracker.set_calibration(&calibration);
                tracker
            })
            .collect();

        Self {
            tuning,
            cfg,
            store,
            calibration,
            events: Vec::new(),
            active_idx: [None; STRING_COUNT],
            trackers,
        }
    }

    pub fn tuning(&self) -> &Tuning {
        &self.tuning
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.cfg
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    /// Process one six-channel block and run the fusion pass. The parameter
    /// generation is captured once here so every tracker in the block
    /// observes the same published set.
    pub fn process_block(&mut self, channels: &ChannelBlock, sample_rate: f32, t0: f32) {
        let store_gen = self.store.generation();
        for (s, tracker) in self.trackers.iter_mut().enumerate() {
            tracker.process_block(
                channels[s],
                sample_rate,
                t0,
                store_gen,
                &mut self.events,
                &mut self.active_idx,
            );
        }
        self.fuse_events();
    }

    /// Label articulations on finished events. Existing labels are never
    /// overwritten; slides propagate to the previous note as well.
    fn fuse_events(&mut self) {
        let mut last_finished: [Option<usize>; STRING_COUNT] = [None; STRING_COUNT];

        for i in 0..self.events.len() {
            let ev = self.events[i].clone();
            if ev.string_idx >= STRING_COUNT {
                continue;
            }
            if !ev.is_finished() {
                continue;
            }

            if let Some(prev_idx) = last_finished[ev.string_idx] {
                let prev = self.events[prev_idx].clone();
                if prev.is_finished() {
                    let gap = ev.start_sec - prev.end_sec;
                    if (0.0..FUSION_MAX_GAP_SEC).contains(&gap) {
                        let delta = ev.fret - prev.fret;
                        let abs_delta = delta.abs();

                        if abs_delta >= 2 {
                            if self.events[i].articulation.is_none() {
                                self.events[i].articulation = Articulation::Slide;
                            }
                            if self.events[prev_idx].articulation.is_none() {
                                self.events[prev_idx].articulation = Articulation::Slide;
                            }
                        } else if delta == 1 || delta == 2 {
                            if self.events[i].articulation.is_none() {
                                self.events[i].articulation = Articulation::Hammer;
                            }
                        } else if delta == -1 || delta == -2 {
                            if self.events[i].articulation.is_none() {
                                self.events[i].articulation = Articulation::Pull;
                            }
                        } else if abs_delta == 0
                            && gap < FUSION_PM_GAP_SEC
                            && ev.velocity < prev.velocity * 0.7
                            && self.events[i].articulation.is_none()
                        {
                            self.events[i].articulation = Articulation::PalmMute;
                        }
                    }
                }
            }

            if self.events[i].articulation.is_none() {
                let duration = ev.end_sec - ev.start_sec;
                if duration < FUSION_PM_MAX_DUR_SEC && ev.velocity < FUSION_PM_MAX_VELOCITY {
                    self.events[i].articulation = Articulation::PalmMute;
                }
            }

            last_finished[ev.string_idx] = Some(i);
        }
    }

    /// Replace the event vector wholesale. An empty import also resets the
    /// trackers' rolling state.
    pub fn import_events(&mut self, events: Vec<NoteEvent>) {
        let reset_trackers = events.is_empty();
        self.events = events;
        self.active_idx = [None; STRING_COUNT];
        if reset_trackers {
            for tracker in &mut self.trackers {
                tracker.reset_state();
            }
        }
    }

    pub fn apply_calibration(&mut self, profile: &CalibrationProfile) {
        self.calibration = *profile;
        for tracker in &mut self.trackers {
            tracker.set_calibration(profile);
        }
    }

    pub fn calibration(&self) -> &CalibrationProfile {
        &self.calibration
    }

    /// Cents between each tracker's last observed pitch and its open
    /// string; 0 where no pitch has been seen.
    pub fn tuning_deviation_cents(&self) -> [f32; STRING_COUNT] {
        let mut deviations = [0.0f32; STRING_COUNT];
        for (s, tracker) in self.trackers.iter().enumerate() {
            let pitch_hz = tracker.last_pitch_hz();
            let target_hz = midi_to_hz(self.tuning.string_midi[s]);
            if pitch_hz > 0.0 && target_hz > 0.0 {
                deviations[s] = cents_between(pitch_hz, target_hz);
            }
        }
        deviations
    }

    /// Events as a JSON array (the `events.json` wire format).
    pub fn events_to_json(&self, only_finished: bool) -> String {
        let filtered: Vec<&NoteEvent> = self
            .events
            .iter()
            .filter(|e| !only_finished || e.is_finished())
            .collect();
        serde_json::to_string(&filtered).unwrap_or_else(|_| "[]".to_string())
    }
}
