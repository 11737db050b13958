//! Live capture and session export
//!
//! While recording is armed the bridge appends calibrated audio here. On
//! stop the buffers swap into a pending capture that the export path writes
//! out as one float32 WAV per string plus metadata and the event list.

use std::path::Path;

use chrono::Utc;
use serde_json::json;

use ht_core::{ChannelBlock, NoteEvent, Sample, StringId, Tuning, STRING_COUNT};

/// Audio accumulated during a recording pass. Grows unbounded within the
/// capture window; the operator controls recording duration.
#[derive(Debug, Default)]
pub struct CaptureBank {
    buffers: [Vec<Sample>; STRING_COUNT],
    sample_rate: f32,
}

impl CaptureBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.sample_rate = 0.0;
    }

    pub fn set_sample_rate(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn append(&mut self, channels: &ChannelBlock, n: usize) {
        if n == 0 {
            return;
        }
        for (s, buffer) in self.buffers.iter_mut().enumerate() {
            match channels[s] {
                Some(data) => buffer.extend_from_slice(&data[..n.min(data.len())]),
                None => buffer.resize(buffer.len() + n, 0.0),
            }
        }
    }

    pub fn has_samples(&self) -> bool {
        self.buffers.iter().any(|b| !b.is_empty())
    }

    /// Move the accumulated audio into a pending capture, leaving this bank
    /// empty for the next pass.
    pub fn take_into_pending(&mut self, events: Vec<NoteEvent>) -> PendingCapture {
        let mut pending = PendingCapture {
            buffers: Default::default(),
            sample_rate: self.sample_rate,
            events,
            valid: false,
        };
        for (dst, src) in pending.buffers.iter_mut().zip(self.buffers.iter_mut()) {
            std::mem::swap(dst, src);
        }
        pending.valid =
            pending.buffers.iter().any(|b| !b.is_empty()) && pending.sample_rate > 0.0;
        self.sample_rate = 0.0;
        pending
    }
}

/// A finished capture waiting for a label and export.
#[derive(Debug, Default)]
pub struct PendingCapture {
    buffers: [Vec<Sample>; STRING_COUNT],
    sample_rate: f32,
    events: Vec<NoteEvent>,
    valid: bool,
}

impl PendingCapture {
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn clear(&mut self) {
        for buffer in &mut self.buffers {
            buffer.clear();
        }
        self.events.clear();
        self.sample_rate = 0.0;
        self.valid = false;
    }

    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        let max_samples = self.buffers.iter().map(Vec::len).max().unwrap_or(0);
        max_samples as f64 / self.sample_rate as f64
    }

    /// Write the capture into `root/{sanitized_label}[_{n}]/`: per-string
    /// WAVs named by note token, `metadata.json`, and `events.json`.
    /// Clears the capture on success.
    pub fn export(&mut self, raw_label: &str, root: &Path, tuning: &Tuning) -> bool {
        if !self.valid {
            return false;
        }

        let safe_label = sanitize_label(raw_label);
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();

        if std::fs::create_dir_all(root).is_err() {
            return false;
        }

        let mut folder_name = safe_label.clone();
        let mut session_dir = root.join(&folder_name);
        let mut suffix = 1u32;
        while session_dir.exists() {
            suffix += 1;
            folder_name = format!("{safe_label}_{suffix}");
            session_dir = root.join(&folder_name);
        }
        if std::fs::create_dir_all(&session_dir).is_err() {
            return false;
        }

        for (s, buffer) in self.buffers.iter().enumerate() {
            if buffer.is_empty() {
                continue;
            }
            let Some(string) = StringId::from_index(s) else {
                continue;
            };
            let path = session_dir.join(format!("{}.wav", tuning.note_token(string)));
            if !write_wav_file(&path, buffer, self.sample_rate) {
                log::warn!("capture export: failed to write {path:?}");
                return false;
            }
        }

        let string_names: Vec<String> = StringId::all()
            .into_iter()
            .map(|s| tuning.note_token(s))
            .collect();
        let metadata = json!({
            "label": raw_label,
            "folder": folder_name,
            "timestamp": timestamp,
            "sampleRate": self.sample_rate,
            "durationSec": self.duration_sec(),
            "stringMidi": tuning.string_midi.to_vec(),
            "stringNames": string_names,
        });
        let meta_ok = serde_json::to_string_pretty(&metadata)
            .map(|text| std::fs::write(session_dir.join("metadata.json"), text).is_ok())
            .unwrap_or(false);

        let events_ok = serde_json::to_string(&self.events)
            .map(|text| std::fs::write(session_dir.join("events.json"), text).is_ok())
            .unwrap_or(false);

        if !meta_ok || !events_ok {
            log::warn!("capture export: failed to write session metadata");
            return false;
        }

        log::info!(
            "capture export: saved session folder={folder_name:?} duration={:.2}",
            self.duration_sec()
        );
        self.clear();
        true
    }
}

/// File-system-safe session label: letters and digits kept, spaces and
/// `-`/`_` retained, everything else becomes `_`, leading underscores
/// stripped. Empty input falls back to a timestamp.
pub fn sanitize_label(label: &str) -> String {
    let trimmed = label.trim();
    let source = if trimmed.is_empty() {
        Utc::now().format("%Y%m%d-%H%M%S").to_string()
    } else {
        trimmed.to_string()
    };

    let mut safe = String::with_capacity(source.len());
    for ch in source.chars() {
        if ch.is_alphanumeric() {
            safe.push(ch);
        } else if ch.is_whitespace() {
            safe.push(' ');
        } else if ch == '-' || ch == '_' {
            safe.push(ch);
        } else {
            safe.push('_');
        }
    }

    let safe = safe.trim_start_matches('_').to_string();
    if safe.is_empty() {
        "session".to_string()
    } else {
        safe
    }
}

/// Mono float32 WAV writer used by capture export and the session wave tap.
pub fn write_wav_file(path: &Path, samples: &[Sample], sample_rate: f32) -> bool {
    if samples.is_empty() || sample_rate <= 0.0 {
        return false;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: sample_rate.round() as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };

    let Ok(mut writer) = hound::WavWriter::create(path, spec) else {
        return false;
    };
    for &sample in samples {
        if writer.write_sample(sample).is_err() {
            return false;
        }
    }
    writer.finalize().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ht_core::Articulation;

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Morning Riff"), "Morning Riff");
        assert_eq!(sanitize_label("solo/take#3"), "solo_take_3");
        assert_eq!(sanitize_label("__hidden"), "hidden");
        assert_eq!(sanitize_label("___"), "session");
        assert_eq!(sanitize_label("a-b_c"), "a-b_c");
    }

    fn pending_with_audio() -> PendingCapture {
        let mut bank = CaptureBank::new();
        bank.set_sample_rate(8000.0);
        let tone: Vec<Sample> = (0..800).map(|i| (i as f32 * 0.01).sin() * 0.5).collect();
        let mut channels: ChannelBlock = [None; STRING_COUNT];
        channels[0] = Some(&tone);
        channels[3] = Some(&tone);
        bank.append(&channels, tone.len());

        let events = vec![NoteEvent {
            string_idx: 0,
            fret: 3,
            midi: 43,
            start_sec: 0.01,
            end_sec: 0.09,
            velocity: 0.6,
            articulation: Articulation::Slide,
        }];
        bank.take_into_pending(events)
    }

    #[test]
    fn test_export_writes_session_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut pending = pending_with_audio();
        assert!(pending.is_valid());
        assert!((pending.duration_sec() - 0.1).abs() < 1e-6);

        assert!(pending.export("Test Session", dir.path(), &Tuning::default()));
        assert!(!pending.is_valid(), "export should clear the capture");

        let session = dir.path().join("Test Session");
        assert!(session.join("E2.wav").exists());
        assert!(session.join("G.wav").exists());
        assert!(!session.join("A.wav").exists(), "silent strings skipped");

        let reader = hound::WavReader::open(session.join("E2.wav")).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        assert_eq!(reader.len(), 800);

        let meta: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(session.join("metadata.json")).unwrap())
                .unwrap();
        assert_eq!(meta["label"], "Test Session");
        assert_eq!(meta["folder"], "Test Session");
        assert_eq!(meta["sampleRate"], 8000.0);
        assert_eq!(meta["stringMidi"][0], 40);
        assert_eq!(meta["stringNames"][5], "E4");

        let events: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(session.join("events.json")).unwrap())
                .unwrap();
        assert_eq!(events[0]["fret"], 3);
        assert_eq!(events[0]["articulation"], "slide");
    }

    #[test]
    fn test_export_uniquifies_folder() {
        let dir = tempfile::tempdir().unwrap();
        assert!(pending_with_audio().export("take", dir.path(), &Tuning::default()));
        assert!(pending_with_audio().export("take", dir.path(), &Tuning::default()));
        assert!(dir.path().join("take").exists());
        assert!(dir.path().join("take_2").exists());
    }

    #[test]
    fn test_invalid_capture_refuses_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut bank = CaptureBank::new();
        let mut pending = bank.take_into_pending(Vec::new());
        assert!(!pending.export("x", dir.path(), &Tuning::default()));
    }
}
