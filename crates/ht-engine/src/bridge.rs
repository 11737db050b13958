//! Live ingest bridge
//!
//! The single front door for incoming audio. The audio driver owns a
//! `LiveIngestBridge` and calls `process_live_block` from its callback; the
//! editor/UI side keeps the matching `BridgeHandle` and polls `pump` to
//! receive notes, meters, and calibration notifications.
//!
//! Hot-path rules: the block path uses atomics, pre-allocated scratch
//! buffers, and a briefly-held staging mutex (drained by the consumer
//! through a compare-and-set guarded dispatch). The audio thread never
//! blocks on the editor.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rtrb::{Consumer, Producer, RingBuffer};

use ht_core::{
    AtomicF32, CalibrationProfile, ChannelBlock, NoteParam, Sample, StringId, TrackerConfig,
    Tuning, STRING_COUNT,
};
use ht_dsp::block_rms;
use ht_state::{ConfigPaths, DetectionStore, ProfileStore};

use crate::{
    capture_root_dir, debug_note_logging, monitor_disabled, BridgeListener, CalibrationEvent,
    CalibrationSequencer, CaptureBank, MeterBank, MeterSmoother, PendingCapture, SessionWaveTap,
    TabEngine, CALIBRATE_ALL,
};

/// Duplicate suppression window for live note dispatch.
const LIVE_DEDUP_WINDOW_SEC: f32 = 0.060;
/// Without capture armed, the preview timeline resets past this many events.
const PREVIEW_MAX_EVENTS: usize = 256;
/// Mono monitor downmix gain.
const MONITOR_GAIN: f32 = 0.35;
/// Monitor ring capacity in samples.
const MONITOR_RING_CAPACITY: usize = 16384;
/// Mailbox value meaning "no calibration requested".
const CALIBRATION_REQUEST_EMPTY: i32 = -2;

/// One detected note queued for consumers.
#[derive(Debug, Clone, Copy)]
struct LiveNote {
    string_idx: usize,
    fret: i32,
    velocity: f32,
    start_sec: f32,
}

#[derive(Default)]
struct StagedNotifications {
    notes: Vec<LiveNote>,
    calibration: Vec<CalibrationEvent>,
    recording_changed: Option<bool>,
}

/// UI-side calibration bookkeeping (step states: 0 pending, 1 armed,
/// 2 capturing, 3 done).
struct CalibrationUi {
    running: bool,
    message: String,
    steps: [i32; STRING_COUNT],
    partial: bool,
    requested_string: i32,
    active_string: i32,
    active_capturing: bool,
    profile: CalibrationProfile,
}

impl Default for CalibrationUi {
    fn default() -> Self {
        Self {
            running: false,
            message: "Uncalibrated".to_string(),
            steps: [0; STRING_COUNT],
            partial: false,
            requested_string: -1,
            active_string: -1,
            active_capturing: false,
            profile: CalibrationProfile::default(),
        }
    }
}

impl CalibrationUi {
    fn reset_steps(&mut self) {
        self.steps = [0; STRING_COUNT];
        self.active_string = -1;
        self.active_capturing = false;
    }
}

/// State shared between the audio side and the handle.
struct BridgeShared {
    meters: MeterBank,
    external_meters: AtomicBool,
    tuning_deviation: [AtomicF32; STRING_COUNT],
    last_block_frames: AtomicUsize,
    audio_active: AtomicBool,
    capture_enabled: AtomicBool,
    reset_requested: AtomicBool,
    monitor_enabled: AtomicBool,
    calibration_request: AtomicI32,
    dispatch_queued: AtomicBool,
    staged: Mutex<StagedNotifications>,
    pending_capture: Mutex<PendingCapture>,
    pending_profile: Mutex<Option<CalibrationProfile>>,
    calibration_ui: Mutex<CalibrationUi>,
}

impl BridgeShared {
    fn new() -> Self {
        Self {
            meters: MeterBank::new(),
            external_meters: AtomicBool::new(false),
            tuning_deviation: Default::default(),
            last_block_frames: AtomicUsize::new(0),
            audio_active: AtomicBool::new(false),
            capture_enabled: AtomicBool::new(false),
            reset_requested: AtomicBool::new(true),
            monitor_enabled: AtomicBool::new(false),
            calibration_request: AtomicI32::new(CALIBRATION_REQUEST_EMPTY),
            dispatch_queued: AtomicBool::new(false),
            staged: Mutex::new(StagedNotifications {
                notes: Vec::with_capacity(64),
                calibration: Vec::with_capacity(16),
                recording_changed: None,
            }),
            pending_capture: Mutex::new(PendingCapture::default()),
            pending_profile: Mutex::new(None),
            calibration_ui: Mutex::new(CalibrationUi::default()),
        }
    }
}

/// Audio-side half: owns the tab engine and all per-block scratch.
pub struct LiveIngestBridge {
    engine: TabEngine,
    store: Arc<DetectionStore>,
    shared: Arc<BridgeShared>,
    sequencer: CalibrationSequencer,
    meter_smoother: MeterSmoother,
    wave_tap: SessionWaveTap,
    capture: CaptureBank,
    calibrated: [Vec<Sample>; STRING_COUNT],
    calibration_scratch: Vec<CalibrationEvent>,
    monitor_producer: Option<Producer<Sample>>,
    live_time_sec: f32,
    live_sample_rate: f32,
    last_dispatched_event: usize,
    last_live_trigger_sec: [f32; STRING_COUNT],
    last_live_fret: [i32; STRING_COUNT],
    prev_recording: bool,
    debug_note_logging: bool,
    session_id: String,
    session_wave_root: PathBuf,
}

impl LiveIngestBridge {
    /// Build the bridge pair over the process-wide store and default paths.
    pub fn new(tuning: Tuning, cfg: TrackerConfig) -> (LiveIngestBridge, BridgeHandle) {
        Self::with_store(tuning, cfg, DetectionStore::global(), ConfigPaths::resolve_default())
    }

    /// Build with an explicit store and config root (tests, embedding).
    pub fn with_store(
        tuning: Tuning,
        cfg: TrackerConfig,
        store: Arc<DetectionStore>,
        paths: ConfigPaths,
    ) -> (LiveIngestBridge, BridgeHandle) {
        let mut engine = TabEngine::new(tuning, cfg, store.clone());
        let shared = Arc::new(BridgeShared::new());
        let profile_store = ProfileStore::new(&paths);

        // Restore the persisted calibration: multipliers go into the
        // parameter store row and the profile seeds the trackers.
        let target_rms: [f32; STRING_COUNT] =
            std::array::from_fn(|s| store.current_value(NoteParam::TargetRms, s));
        if let Some(profile) = profile_store.load(&target_rms) {
            store.begin_batch();
            for (s, &mult) in profile.multipliers.iter().enumerate() {
                store.set_value(NoteParam::CalibrationGainMultiplier, s, mult);
            }
            store.end_batch();
            engine.apply_calibration(&profile);

            let mut ui = shared.calibration_ui.lock();
            ui.profile = profile;
            ui.message = "Calibration loaded".to_string();
        }

        let (monitor_producer, monitor_consumer) = if monitor_disabled() {
            (None, None)
        } else {
            let (producer, consumer) = RingBuffer::new(MONITOR_RING_CAPACITY);
            (Some(producer), Some(consumer))
        };

        let session_id = format!(
            "session-{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );

        let bridge = LiveIngestBridge {
            engine,
            store: store.clone(),
            shared: shared.clone(),
            sequencer: CalibrationSequencer::new(),
            meter_smoother: MeterSmoother::new(),
            wave_tap: SessionWaveTap::new(),
            capture: CaptureBank::new(),
            calibrated: Default::default(),
            calibration_scratch: Vec::with_capacity(8),
            monitor_producer,
            live_time_sec: 0.0,
            live_sample_rate: 0.0,
            last_dispatched_event: 0,
            last_live_trigger_sec: [-1.0; STRING_COUNT],
            last_live_fret: [-1; STRING_COUNT],
            prev_recording: false,
            debug_note_logging: debug_note_logging(),
            session_id,
            session_wave_root: PathBuf::from("logs").join("sessionwavs"),
        };

        let handle = BridgeHandle {
            shared,
            store,
            profile_store,
            tuning,
            capture_root: capture_root_dir(),
            monitor_consumer,
            listeners: Vec::new(),
        };

        (bridge, handle)
    }

    pub fn engine(&self) -> &TabEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut TabEngine {
        &mut self.engine
    }

    /// The lock-free hot path: one six-channel block from the audio driver.
    pub fn process_live_block(&mut self, channels: &ChannelBlock, n: usize, sample_rate: f32) {
        if n == 0 || sample_rate <= 0.0 {
            return;
        }

        self.shared.last_block_frames.store(n, Ordering::Release);
        self.shared.audio_active.store(true, Ordering::Release);

        let capturing = self.shared.capture_enabled.load(Ordering::Acquire);
        if capturing != self.prev_recording {
            self.handle_recording_edge(capturing, sample_rate);
        }

        let reset = self.shared.reset_requested.swap(false, Ordering::AcqRel);
        if reset || (self.live_sample_rate - sample_rate).abs() > 1e-4 {
            self.engine.import_events(Vec::new());
            self.live_time_sec = 0.0;
            self.live_sample_rate = sample_rate;
            self.last_dispatched_event = 0;
            self.last_live_trigger_sec = [-1.0; STRING_COUNT];
            self.last_live_fret = [-1; STRING_COUNT];
            if self.debug_note_logging {
                log::info!("bridge engine-reset sr={sample_rate} capturing={capturing}");
            }
        }

        // A finished calibration run publishes its profile from the
        // consumer side; adopt it at the block boundary.
        if let Some(mut pending) = self.shared.pending_profile.try_lock() {
            if let Some(profile) = pending.take() {
                self.engine.apply_calibration(&profile);
            }
        }

        // Calibrated buffers: the active multiplier row when a valid
        // profile exists, unity gain otherwise.
        let calibrated_valid = self.engine.calibration().valid;
        for s in 0..STRING_COUNT {
            let buffer = &mut self.calibrated[s];
            buffer.clear();
            if let Some(data) = channels[s] {
                let take = n.min(data.len());
                let mult = if calibrated_valid {
                    self.store
                        .active_value(NoteParam::CalibrationGainMultiplier, s)
                } else {
                    1.0
                };
                buffer.extend(data[..take].iter().map(|&x| x * mult));
            }
        }
        let calibrated_channels: ChannelBlock = std::array::from_fn(|s| {
            if self.calibrated[s].is_empty() {
                None
            } else {
                Some(self.calibrated[s].as_slice())
            }
        });

        self.wave_tap.append(&calibrated_channels, n, sample_rate);

        if capturing {
            if self.capture.sample_rate() <= 0.0
                || (self.capture.sample_rate() - sample_rate).abs() > 1e-3
            {
                self.capture.set_sample_rate(sample_rate);
            }
            self.capture.append(&calibrated_channels, n);
        }

        let mut block_rms_levels = [0.0f32; STRING_COUNT];
        for (s, level) in block_rms_levels.iter_mut().enumerate() {
            if let Some(data) = calibrated_channels[s] {
                *level = block_rms(data).clamp(0.0, 1.0);
            }
        }
        let levels = self.meter_smoother.update(&block_rms_levels);
        if !self.shared.external_meters.load(Ordering::Acquire) {
            self.shared.meters.publish(&levels);
        }

        let requested = self
            .shared
            .calibration_request
            .swap(CALIBRATION_REQUEST_EMPTY, Ordering::AcqRel);
        if requested != CALIBRATION_REQUEST_EMPTY {
            self.sequencer.request(requested);
        }
        self.calibration_scratch.clear();
        self.sequencer
            .advance(&levels, n, sample_rate, &mut self.calibration_scratch);
        if !self.calibration_scratch.is_empty() {
            let mut staged = self.shared.staged.lock();
            staged.calibration.extend(self.calibration_scratch.drain(..));
            drop(staged);
            self.shared
                .dispatch_queued
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .ok();
        }

        let block_start = self.live_time_sec;
        self.engine
            .process_block(&calibrated_channels, sample_rate, block_start);
        self.live_time_sec += n as f32 / sample_rate;

        let deviations = self.engine.tuning_deviation_cents();
        for (cell, value) in self.shared.tuning_deviation.iter().zip(deviations) {
            cell.store_relaxed(value);
        }

        Self::push_monitor_block(
            &self.shared,
            &mut self.monitor_producer,
            &calibrated_channels,
            n,
        );
        self.dispatch_new_events(capturing);
    }

    fn handle_recording_edge(&mut self, capturing: bool, sample_rate: f32) {
        if capturing {
            // Fresh capture: restart the timeline and drop any unlabeled
            // previous capture.
            self.shared.reset_requested.store(true, Ordering::Release);
            let mut pending = self.shared.pending_capture.lock();
            if pending.is_valid() {
                log::info!("pending capture discarded (new recording started before labeling)");
                pending.clear();
            }
            drop(pending);
            self.capture.clear();
            self.capture.set_sample_rate(sample_rate);
        } else {
            let events = self.engine.events().to_vec();
            let pending = self.capture.take_into_pending(events);
            *self.shared.pending_capture.lock() = pending;
        }
        self.prev_recording = capturing;

        let mut staged = self.shared.staged.lock();
        staged.recording_changed = Some(capturing);
        drop(staged);
        self.shared
            .dispatch_queued
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .ok();
    }

    fn dispatch_new_events(&mut self, capturing: bool) {
        let events = self.engine.events();
        let total = events.len();
        if total <= self.last_dispatched_event {
            return;
        }

        let mut enqueued = false;
        {
            let mut staged = self.shared.staged.lock();
            for ev in &events[self.last_dispatched_event..] {
                if ev.string_idx >= STRING_COUNT || !(0..=24).contains(&ev.fret) {
                    continue;
                }

                let prev_trigger = self.last_live_trigger_sec[ev.string_idx];
                let prev_fret = self.last_live_fret[ev.string_idx];
                if prev_trigger >= 0.0
                    && (ev.start_sec - prev_trigger).abs() < LIVE_DEDUP_WINDOW_SEC
                    && prev_fret == ev.fret
                {
                    continue;
                }

                self.last_live_trigger_sec[ev.string_idx] = ev.start_sec;
                self.last_live_fret[ev.string_idx] = ev.fret;
                staged.notes.push(LiveNote {
                    string_idx: ev.string_idx,
                    fret: ev.fret,
                    velocity: ev.velocity,
                    start_sec: ev.start_sec,
                });
                enqueued = true;

                if self.debug_note_logging {
                    log::info!(
                        "bridge note string={} fret={} velocity={:.3} start={:.3}",
                        ev.string_idx,
                        ev.fret,
                        ev.velocity,
                        ev.start_sec,
                    );
                }
            }
        }
        self.last_dispatched_event = total;

        if enqueued {
            self.shared
                .dispatch_queued
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
                .ok();
        }

        // Preview mode keeps a rolling window: reset the timeline rather
        // than growing the event vector without bound.
        if !capturing && total > PREVIEW_MAX_EVENTS {
            self.shared.reset_requested.store(true, Ordering::Release);
        }
    }

    fn push_monitor_block(
        shared: &BridgeShared,
        monitor_producer: &mut Option<Producer<Sample>>,
        channels: &ChannelBlock,
        n: usize,
    ) {
        if !shared.monitor_enabled.load(Ordering::Acquire) {
            return;
        }
        let Some(producer) = monitor_producer.as_mut() else {
            return;
        };

        for frame in 0..n {
            let mut sum = 0.0f32;
            for channel in channels.iter() {
                if let Some(data) = channel {
                    sum += data.get(frame).copied().unwrap_or(0.0);
                }
            }
            let mono = (sum / STRING_COUNT as f32) * MONITOR_GAIN;
            if producer.push(mono).is_err() {
                break;
            }
        }
    }

    /// Where the shutdown wave tap lands; defaults to `logs/sessionwavs`.
    pub fn set_session_wave_root(&mut self, root: PathBuf) {
        self.session_wave_root = root;
    }

    /// Dump the session wave tap; called on audio-stream shutdown.
    pub fn shutdown(&mut self) {
        self.sequencer.abort();
        self.shared.audio_active.store(false, Ordering::Release);
        let dir = self.session_wave_root.join(&self.session_id);
        let tuning = *self.engine.tuning();
        self.wave_tap.dump(&dir, &tuning);
    }
}

impl Drop for LiveIngestBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// CONSUMER-SIDE HANDLE
// ═══════════════════════════════════════════════════════════════════════════

/// Editor/UI-side counterpart of [`LiveIngestBridge`].
pub struct BridgeHandle {
    shared: Arc<BridgeShared>,
    store: Arc<DetectionStore>,
    profile_store: ProfileStore,
    tuning: Tuning,
    capture_root: PathBuf,
    monitor_consumer: Option<Consumer<Sample>>,
    listeners: Vec<Box<dyn BridgeListener>>,
}

impl BridgeHandle {
    pub fn add_listener(&mut self, listener: Box<dyn BridgeListener>) {
        self.listeners.push(listener);
    }

    /// Drain staged notifications and deliver them to the listeners. Call
    /// from the consumer thread at UI cadence; idempotent when idle.
    pub fn pump(&mut self) {
        let staged = {
            let mut guard = self.shared.staged.lock();
            self.shared.dispatch_queued.store(false, Ordering::Release);
            StagedNotifications {
                notes: std::mem::take(&mut guard.notes),
                calibration: std::mem::take(&mut guard.calibration),
                recording_changed: guard.recording_changed.take(),
            }
        };

        if let Some(recording) = staged.recording_changed {
            for listener in &mut self.listeners {
                listener.on_recording_changed(recording);
            }
        }

        for event in &staged.calibration {
            self.handle_calibration_event(*event);
        }

        for note in &staged.notes {
            for listener in &mut self.listeners {
                listener.on_event(note.string_idx, note.fret, note.velocity, note.start_sec);
            }
        }

        let meters = self.shared.meters.snapshot();
        for listener in &mut self.listeners {
            listener.on_meter_snapshot(&meters);
        }

        let deviation = self.tuning_deviation();
        for listener in &mut self.listeners {
            listener.on_tuning_deviation(&deviation);
        }
    }

    /// True when staged notifications are waiting for a `pump`.
    pub fn needs_dispatch(&self) -> bool {
        self.shared.dispatch_queued.load(Ordering::Acquire)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Meters, timing, reset
    // ─────────────────────────────────────────────────────────────────────

    pub fn meters(&self) -> [f32; STRING_COUNT] {
        self.shared.meters.snapshot()
    }

    pub fn tuning_deviation(&self) -> [f32; STRING_COUNT] {
        std::array::from_fn(|s| self.shared.tuning_deviation[s].load_relaxed())
    }

    /// Block-size hint for pacing external players; 128 before any audio.
    pub fn live_block_frames_hint(&self) -> usize {
        let frames = self.shared.last_block_frames.load(Ordering::Acquire);
        if frames > 0 {
            frames
        } else {
            128
        }
    }

    /// Clear the live timeline at the next block boundary.
    pub fn request_reset(&self) {
        self.shared.reset_requested.store(true, Ordering::Release);
        self.shared.staged.lock().notes.clear();
    }

    /// An external meter source (e.g. a recorded-session player) takes over
    /// meter publication.
    pub fn set_external_meters_active(&self, active: bool) {
        self.shared.external_meters.store(active, Ordering::Release);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Recording and capture export
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_recording(&self, value: bool) {
        self.shared.capture_enabled.store(value, Ordering::Release);
    }

    /// Where exported sessions land; defaults to the environment override
    /// or `sessions/live`.
    pub fn set_capture_root(&mut self, root: PathBuf) {
        self.capture_root = root;
    }

    pub fn recording(&self) -> bool {
        self.shared.capture_enabled.load(Ordering::Acquire)
    }

    pub fn has_pending_capture(&self) -> bool {
        self.shared.pending_capture.lock().is_valid()
    }

    pub fn pending_capture_duration_sec(&self) -> f64 {
        self.shared.pending_capture.lock().duration_sec()
    }

    /// Write the pending capture as a labeled session directory.
    pub fn export_pending_capture(&self, label: &str) -> bool {
        self.shared
            .pending_capture
            .lock()
            .export(label, &self.capture_root, &self.tuning)
    }

    pub fn discard_pending_capture(&self) {
        let mut pending = self.shared.pending_capture.lock();
        if pending.is_valid() {
            log::info!("pending capture discarded (user cancelled)");
            pending.clear();
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Monitor feed
    // ─────────────────────────────────────────────────────────────────────

    pub fn set_monitor_enabled(&self, enabled: bool) {
        self.shared.monitor_enabled.store(enabled, Ordering::Release);
    }

    /// The mono monitor stream; `None` when disabled by environment or
    /// already taken.
    pub fn take_monitor_consumer(&mut self) -> Option<Consumer<Sample>> {
        self.monitor_consumer.take()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Calibration
    // ─────────────────────────────────────────────────────────────────────

    pub fn calibration_running(&self) -> bool {
        self.shared.calibration_ui.lock().running
    }

    pub fn calibration_message(&self) -> String {
        self.shared.calibration_ui.lock().message.clone()
    }

    pub fn calibration_steps(&self) -> [i32; STRING_COUNT] {
        self.shared.calibration_ui.lock().steps
    }

    pub fn calibration_ready(&self) -> bool {
        self.shared.calibration_ui.lock().profile.valid
    }

    pub fn calibration_profile(&self) -> CalibrationProfile {
        self.shared.calibration_ui.lock().profile
    }

    /// Begin a full six-string calibration pass.
    pub fn start_calibration(&mut self) {
        if !self.shared.audio_active.load(Ordering::Acquire) {
            self.set_calibration_message("Audio input unavailable");
            return;
        }
        {
            let mut ui = self.shared.calibration_ui.lock();
            if ui.running {
                return;
            }
            ui.reset_steps();
            ui.partial = false;
            ui.requested_string = -1;
            ui.running = true;
            ui.message = "Arming calibration...".to_string();
        }
        self.notify_calibration_message();
        self.shared
            .calibration_request
            .store(CALIBRATE_ALL, Ordering::Release);
    }

    /// Re-measure a single string; requires a prior full calibration.
    pub fn recalibrate_string(&mut self, string_idx: usize) {
        if string_idx >= STRING_COUNT {
            return;
        }
        if !self.shared.audio_active.load(Ordering::Acquire) {
            self.set_calibration_message("Audio input unavailable");
            return;
        }
        {
            let mut ui = self.shared.calibration_ui.lock();
            if !ui.profile.valid {
                ui.message = "Run full calibration before per-string tweaks".to_string();
                drop(ui);
                self.notify_calibration_message();
                return;
            }
            if ui.running {
                return;
            }
            ui.reset_steps();
            ui.partial = true;
            ui.requested_string = string_idx as i32;
            ui.steps[string_idx] = 1;
            ui.running = true;
            let label = StringId::from_index(string_idx)
                .map(|s| s.display_name())
                .unwrap_or("string");
            ui.message = format!("Preparing {label}...");
        }
        self.notify_calibration_message();
        self.shared
            .calibration_request
            .store(string_idx as i32, Ordering::Release);
    }

    fn set_calibration_message(&mut self, message: &str) {
        self.shared.calibration_ui.lock().message = message.to_string();
        self.notify_calibration_message();
    }

    fn notify_calibration_message(&mut self) {
        let message = self.shared.calibration_ui.lock().message.clone();
        for listener in &mut self.listeners {
            listener.on_calibration_message(&message);
        }
    }

    fn handle_calibration_event(&mut self, event: CalibrationEvent) {
        match event {
            CalibrationEvent::Started { partial, target } => {
                {
                    let mut ui = self.shared.calibration_ui.lock();
                    ui.running = true;
                    if partial && target >= 0 {
                        let label = string_label(target);
                        ui.message = format!("Pluck {label} (single string)");
                    } else if ui.active_string < 0 {
                        ui.message = "Calibrating... follow string prompts".to_string();
                    }
                }
                for listener in &mut self.listeners {
                    listener.on_calibration_started();
                }
                self.notify_calibration_message();
            }
            CalibrationEvent::Step {
                string_idx,
                capturing,
            } => {
                self.apply_calibration_step(string_idx, capturing);
                for listener in &mut self.listeners {
                    listener.on_calibration_step(string_idx, capturing);
                }
                self.notify_calibration_message();
            }
            CalibrationEvent::Finished { averages, peaks } => {
                self.finish_calibration(&averages, &peaks);
                for listener in &mut self.listeners {
                    listener.on_calibration_finished(&averages, &peaks);
                }
                self.notify_calibration_message();
            }
        }
    }

    fn apply_calibration_step(&mut self, string_idx: i32, capturing: bool) {
        let mut ui = self.shared.calibration_ui.lock();
        if !ui.running {
            return;
        }

        if ui.partial {
            if string_idx < 0 {
                let requested = ui.requested_string;
                if requested >= 0 {
                    ui.steps[requested as usize] = 3;
                }
                ui.active_string = -1;
                ui.active_capturing = false;
                ui.message = "Finalizing calibration...".to_string();
                return;
            }
            if string_idx != ui.requested_string {
                return;
            }
            ui.active_string = string_idx;
            ui.active_capturing = capturing;
            ui.steps[string_idx as usize] = if capturing { 2 } else { 1 };
            let label = string_label(string_idx);
            ui.message = if capturing {
                format!("Recording {label}")
            } else {
                format!("Pluck {label}")
            };
            return;
        }

        if string_idx < 0 {
            let active = ui.active_string;
            if active >= 0 {
                ui.steps[active as usize] = 3;
            }
            for step in ui.steps.iter_mut() {
                *step = (*step).max(3);
            }
            ui.active_string = -1;
            ui.active_capturing = false;
            ui.message = "Finalizing calibration...".to_string();
            return;
        }

        if string_idx != ui.active_string {
            let active = ui.active_string;
            if active >= 0 {
                ui.steps[active as usize] = 3;
            }
            for s in 0..string_idx as usize {
                ui.steps[s] = 3;
            }
            for s in (string_idx as usize + 1)..STRING_COUNT {
                if ui.steps[s] > 0 && ui.steps[s] < 3 {
                    ui.steps[s] = 0;
                }
            }
        }

        ui.active_string = string_idx;
        ui.active_capturing = capturing;
        ui.steps[string_idx as usize] = if capturing { 2 } else { 1 };

        let label = string_label(string_idx);
        let step = format!("{}/6", string_idx + 1);
        ui.message = if capturing {
            format!("Recording {label} ({step})")
        } else {
            format!("Pluck {label} ({step})")
        };
    }

    /// Fold the measured averages into the profile, derive multipliers from
    /// the current target levels, push them into the parameter store, and
    /// persist. Strings reported as -1 keep their previous measurements.
    fn finish_calibration(
        &mut self,
        averages: &[f32; STRING_COUNT],
        peaks: &[f32; STRING_COUNT],
    ) {
        let mut ui = self.shared.calibration_ui.lock();
        for step in ui.steps.iter_mut() {
            *step = (*step).max(3);
        }
        ui.active_string = -1;
        ui.active_capturing = false;
        ui.running = false;

        let mut profile = ui.profile;
        let mut any_updated = false;
        for s in 0..STRING_COUNT {
            if averages[s] >= 0.0 && peaks[s] >= 0.0 {
                profile.avg_rms[s] = averages[s];
                profile.peak_rms[s] = peaks[s];
                let target_rms = self.store.current_value(NoteParam::TargetRms, s);
                profile.multipliers[s] =
                    CalibrationProfile::derive_multiplier(target_rms, averages[s]);
                any_updated = true;
            }
        }

        if any_updated {
            profile.valid = true;
            ui.profile = profile;

            self.store.begin_batch();
            for (s, &mult) in profile.multipliers.iter().enumerate() {
                self.store
                    .set_value(NoteParam::CalibrationGainMultiplier, s, mult);
            }
            self.store.end_batch();

            *self.shared.pending_profile.lock() = Some(profile);
            if !self.profile_store.save(&profile) {
                log::warn!("calibration profile save failed");
            }

            log::info!("calibration complete");
            for s in 0..STRING_COUNT {
                log::debug!(
                    "string {}: avgRms={:.6} peakRms={:.6} multiplier={:.3}",
                    s + 1,
                    profile.avg_rms[s],
                    profile.peak_rms[s],
                    profile.multipliers[s],
                );
            }
        }

        ui.message = if ui.partial && ui.requested_string >= 0 {
            format!("{} updated", string_label(ui.requested_string))
        } else {
            "Calibration updated".to_string()
        };
        ui.partial = false;
        ui.requested_string = -1;
    }
}

fn string_label(string_idx: i32) -> &'static str {
    usize::try_from(string_idx)
        .ok()
        .and_then(StringId::from_index)
        .map(|s| s.display_name())
        .unwrap_or("string")
}
