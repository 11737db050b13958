//! Calibration sequencer
//!
//! A small state machine advanced on the audio thread. For each string in
//! the requested sequence it arms, waits for the smoothed meter to cross
//! the trigger level, then accumulates average and peak RMS across a fixed
//! capture window. Strings not in the sequence report -1 so a partial run
//! leaves their previous measurements alone.

use std::sync::atomic::{AtomicI32, Ordering};

use ht_core::STRING_COUNT;

/// Meter level that counts as a pluck while armed.
pub const CALIBRATION_TRIGGER_LEVEL: f32 = 0.008;
/// Capture window per string, in seconds.
pub const CALIBRATION_CAPTURE_SEC_PER_STRING: f32 = 1.25;

/// Mailbox value meaning "no pending request".
const REQUEST_EMPTY: i32 = -2;
/// Request value meaning "all six strings".
pub const CALIBRATE_ALL: i32 = -1;

/// Notifications emitted while the sequencer runs. Drained by the bridge
/// into its staging queue for the consumer thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CalibrationEvent {
    Started { partial: bool, target: i32 },
    /// `string_idx` is -1 once the whole sequence is done.
    Step { string_idx: i32, capturing: bool },
    Finished {
        averages: [f32; STRING_COUNT],
        peaks: [f32; STRING_COUNT],
    },
}

#[derive(Debug, Default)]
struct RunState {
    active: bool,
    capturing: bool,
    partial: bool,
    current_string: usize,
    sequence_index: usize,
    sequence_count: usize,
    frames_remaining: i64,
    capture_frames_per_string: i64,
    sequence: [usize; STRING_COUNT],
    updated: [bool; STRING_COUNT],
    sum_rms: [f64; STRING_COUNT],
    samples: [u32; STRING_COUNT],
    peak_rms: [f32; STRING_COUNT],
}

/// Audio-thread calibration state machine with an atomic request mailbox.
pub struct CalibrationSequencer {
    pending_target: AtomicI32,
    state: RunState,
}

impl CalibrationSequencer {
    pub fn new() -> Self {
        Self {
            pending_target: AtomicI32::new(REQUEST_EMPTY),
            state: RunState::default(),
        }
    }

    /// Queue a calibration run: [`CALIBRATE_ALL`] or a string index 0..5.
    /// Callable from any thread; picked up at the next audio block.
    pub fn request(&self, target: i32) {
        let target = if (0..STRING_COUNT as i32).contains(&target) {
            target
        } else {
            CALIBRATE_ALL
        };
        self.pending_target.store(target, Ordering::Release);
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    /// Abandon a run in progress (audio stream stopped).
    pub fn abort(&mut self) {
        self.state = RunState::default();
    }

    /// Advance one audio block. `levels` are the smoothed per-string
    /// meters, `frames` the block length. Notifications are appended to
    /// `out` (pre-allocated by the caller; at most three per block).
    pub fn advance(
        &mut self,
        levels: &[f32; STRING_COUNT],
        frames: usize,
        sample_rate: f32,
        out: &mut Vec<CalibrationEvent>,
    ) {
        let pending = self.pending_target.swap(REQUEST_EMPTY, Ordering::AcqRel);
        if pending != REQUEST_EMPTY {
            self.begin(pending, sample_rate, out);
        }

        if !self.state.active {
            return;
        }

        let state = &mut self.state;
        if state.current_string >= STRING_COUNT {
            state.active = false;
            out.push(CalibrationEvent::Step {
                string_idx: -1,
                capturing: false,
            });
            return;
        }

        let idx = state.current_string;
        let level = levels[idx].max(0.0);

        if !state.capturing {
            if level >= CALIBRATION_TRIGGER_LEVEL {
                state.capturing = true;
                state.frames_remaining = state.capture_frames_per_string;
                state.sum_rms[idx] = 0.0;
                state.samples[idx] = 0;
                state.peak_rms[idx] = 0.0;
                out.push(CalibrationEvent::Step {
                    string_idx: idx as i32,
                    capturing: true,
                });
            }
            return;
        }

        state.sum_rms[idx] += level as f64;
        state.samples[idx] += 1;
        state.peak_rms[idx] = state.peak_rms[idx].max(level);
        state.frames_remaining -= frames as i64;

        if state.frames_remaining > 0 {
            return;
        }

        state.capturing = false;
        state.frames_remaining = 0;
        state.updated[idx] = true;
        state.sequence_index += 1;

        if state.sequence_index >= state.sequence_count {
            state.active = false;
            out.push(CalibrationEvent::Step {
                string_idx: -1,
                capturing: false,
            });

            let mut averages = [0.0f32; STRING_COUNT];
            let mut peaks = [0.0f32; STRING_COUNT];
            for s in 0..STRING_COUNT {
                if state.updated[s] {
                    let count = state.samples[s];
                    averages[s] = if count > 0 {
                        (state.sum_rms[s] / count as f64) as f32
                    } else {
                        0.0
                    };
                    peaks[s] = state.peak_rms[s];
                } else {
                    averages[s] = -1.0;
                    peaks[s] = -1.0;
                }
            }
            out.push(CalibrationEvent::Finished { averages, peaks });
            self.state = RunState::default();
            return;
        }

        state.current_string = state.sequence[state.sequence_index];
        out.push(CalibrationEvent::Step {
            string_idx: state.current_string as i32,
            capturing: false,
        });
    }

    fn begin(&mut self, target: i32, sample_rate: f32, out: &mut Vec<CalibrationEvent>) {
        if self.state.active {
            return;
        }
        let sr = sample_rate.max(1.0);
        let partial = (0..STRING_COUNT as i32).contains(&target);

        let mut state = RunState {
            active: true,
            partial,
            sequence_count: if partial { 1 } else { STRING_COUNT },
            capture_frames_per_string: ((sr * CALIBRATION_CAPTURE_SEC_PER_STRING) as i64).max(1),
            ..RunState::default()
        };
        for i in 0..state.sequence_count {
            state.sequence[i] = if partial { target as usize } else { i };
        }
        state.current_string = state.sequence[0];
        self.state = state;

        out.push(CalibrationEvent::Started { partial, target });
        out.push(CalibrationEvent::Step {
            string_idx: self.state.current_string as i32,
            capturing: false,
        });
    }
}

impl Default for CalibrationSequencer {
    fn default() -> Self {
        Self::new()
    }
}
