//! Session wave tap
//!
//! Ring-buffers the last few seconds of every string on the audio thread so
//! a shutdown can leave behind per-string WAV evidence of what the engine
//! last heard.

use std::path::Path;

use ht_core::{ChannelBlock, Sample, Tuning, STRING_COUNT};

use crate::write_wav_file;

/// How much trailing audio the tap keeps per string.
pub const SESSION_WAVE_TAP_SECONDS: f32 = 8.0;

#[derive(Debug, Default)]
pub struct SessionWaveTap {
    buffers: [Vec<Sample>; STRING_COUNT],
    write_index: [usize; STRING_COUNT],
    count: [usize; STRING_COUNT],
    capacity: usize,
    sample_rate: f32,
    dirty: bool,
}

impl SessionWaveTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one block; reallocates only when the sample rate changes.
    pub fn append(&mut self, channels: &ChannelBlock, n: usize, sample_rate: f32) {
        if n == 0 || sample_rate <= 0.0 {
            return;
        }

        let rate_changed =
            self.sample_rate <= 0.0 || (self.sample_rate - sample_rate).abs() > 1.0e-3;
        if rate_changed {
            self.sample_rate = sample_rate;
        }

        let limit = (self.sample_rate * SESSION_WAVE_TAP_SECONDS).max(1.0) as usize;
        if rate_changed || limit != self.capacity {
            self.capacity = limit;
            for buffer in &mut self.buffers {
                buffer.clear();
                buffer.resize(self.capacity, 0.0);
            }
            self.write_index = [0; STRING_COUNT];
            self.count = [0; STRING_COUNT];
        }

        if self.capacity == 0 {
            return;
        }

        for s in 0..STRING_COUNT {
            let tap = &mut self.buffers[s];
            let src = channels[s];
            let mut write_index = self.write_index[s];

            let mut processed = 0usize;
            while processed < n {
                let available = self.capacity - write_index;
                let chunk = available.min(n - processed);
                if chunk == 0 {
                    break;
                }

                let dest = &mut tap[write_index..write_index + chunk];
                match src {
                    Some(data) => dest.copy_from_slice(&data[processed..processed + chunk]),
                    None => dest.fill(0.0),
                }

                write_index = (write_index + chunk) % self.capacity;
                processed += chunk;
            }

            self.write_index[s] = write_index;
            self.count[s] = self.capacity.min(self.count[s] + n);
        }
        self.dirty = true;
    }

    /// Unwind the rings and write one WAV per string into `dir`. Returns
    /// the number of files written; the tap is cleared afterwards.
    pub fn dump(&mut self, dir: &Path, tuning: &Tuning) -> usize {
        if !self.dirty || self.sample_rate <= 0.0 {
            return 0;
        }
        if std::fs::create_dir_all(dir).is_err() {
            log::warn!("session wave tap: failed to create {dir:?}");
            return 0;
        }

        let mut written = 0usize;
        let mut scratch: Vec<Sample> = Vec::new();
        for s in 0..STRING_COUNT {
            let buffer = &self.buffers[s];
            let capacity = buffer.len();
            let count = capacity.min(self.count[s]);
            if capacity == 0 || count == 0 {
                continue;
            }

            scratch.clear();
            scratch.reserve(count);
            let write_index = self.write_index[s] % capacity;
            let start = (write_index + capacity - count) % capacity;
            let first_chunk = count.min(capacity - start);
            scratch.extend_from_slice(&buffer[start..start + first_chunk]);
            if first_chunk < count {
                scratch.extend_from_slice(&buffer[..count - first_chunk]);
            }

            let Some(string) = ht_core::StringId::from_index(s) else {
                continue;
            };
            let path = dir.join(format!("{}.wav", tuning.note_token(string)));
            if write_wav_file(&path, &scratch, self.sample_rate) {
                written += 1;
            }
        }

        if written > 0 {
            log::info!("session wave tap: wrote {written} wav files to {dir:?}");
        }

        self.dirty = false;
        self.write_index = [0; STRING_COUNT];
        self.count = [0; STRING_COUNT];
        for buffer in &mut self.buffers {
            buffer.fill(0.0);
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_keeps_newest_samples() {
        let mut tap = SessionWaveTap::new();
        let sr = 1000.0; // tiny rate keeps the test ring small (8000 samples)
        let block: Vec<Sample> = (0..500).map(|i| i as f32).collect();

        let mut channels: ChannelBlock = [None; STRING_COUNT];
        channels[0] = Some(&block);
        for _ in 0..20 {
            tap.append(&channels, block.len(), sr);
        }

        // 20 blocks x 500 = 10_000 samples through an 8_000 ring.
        assert_eq!(tap.count[0], 8000);

        let dir = tempfile::tempdir().unwrap();
        let written = tap.dump(dir.path(), &Tuning::default());
        assert_eq!(written, STRING_COUNT); // silent strings still dump zeros

        let reader = hound::WavReader::open(dir.path().join("E2.wav")).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().sample_rate, 1000);
        let samples: Vec<f32> = reader.into_samples::<f32>().map(Result::unwrap).collect();
        assert_eq!(samples.len(), 8000);
        // The tail of the ring is the tail of the input.
        assert_eq!(*samples.last().unwrap(), 499.0);
    }

    #[test]
    fn test_dump_without_audio_is_noop() {
        let mut tap = SessionWaveTap::new();
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(tap.dump(dir.path(), &Tuning::default()), 0);
    }
}
