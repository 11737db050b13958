//! Consumer notification interface

use ht_core::STRING_COUNT;

/// Callbacks delivered by [`crate::BridgeHandle::pump`] on the consumer
/// thread. All methods have empty defaults; implement what you need.
#[allow(unused_variables)]
pub trait BridgeListener: Send {
    /// Smoothed per-string input levels.
    fn on_meter_snapshot(&mut self, levels: &[f32; STRING_COUNT]) {}

    /// A freshly detected note (string, fret, velocity, start time).
    fn on_event(&mut self, string_idx: usize, fret: i32, velocity: f32, start_sec: f32) {}

    fn on_calibration_started(&mut self) {}

    /// `string_idx` is -1 when the sequence finishes; `capturing` is false
    /// while waiting for the pluck.
    fn on_calibration_step(&mut self, string_idx: i32, capturing: bool) {}

    fn on_calibration_finished(
        &mut self,
        averages: &[f32; STRING_COUNT],
        peaks: &[f32; STRING_COUNT],
    ) {
    }

    /// Human-readable calibration status line.
    fn on_calibration_message(&mut self, message: &str) {}

    fn on_recording_changed(&mut self, recording: bool) {}

    /// Cents offsets of the latest observed pitches from the open strings.
    fn on_tuning_deviation(&mut self, cents: &[f32; STRING_COUNT]) {}
}
