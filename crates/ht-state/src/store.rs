//! Detection parameter store
//!
//! Holds the 15 x 6 detection parameter matrix three times over (defaults,
//! current, committed) plus the atomic active view the audio thread reads.
//! The editor side mutates under a mutex; every publication bumps a
//! monotonic generation counter the trackers watch to reload derived
//! settings.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use ht_core::{ActiveParameterSet, NoteParam, ParameterSet, STRING_COUNT};

/// Maximum retained undo snapshots; the oldest is dropped on overflow.
pub const UNDO_DEPTH: usize = 32;

struct StoreInner {
    defaults: ParameterSet,
    current: ParameterSet,
    committed: ParameterSet,
    undo: Vec<ParameterSet>,
    redo: Vec<ParameterSet>,
    saved: BTreeMap<String, ParameterSet>,
    batch_depth: u32,
    batch_undo_pushed: bool,
    batch_dirty: bool,
}

impl StoreInner {
    fn push_undo(&mut self) {
        self.undo.push(self.current);
        if self.undo.len() > UNDO_DEPTH {
            self.undo.remove(0);
        }
    }

    fn clear_history(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }
}

/// Thread-safe detection parameter store.
///
/// Reads on the audio thread (`active_value`, `generation`) are wait-free
/// and allocation-free; everything else serializes on an internal mutex.
pub struct DetectionStore {
    inner: Mutex<StoreInner>,
    active: ActiveParameterSet,
    generation: AtomicU64,
}

impl Default for DetectionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectionStore {
    pub fn new() -> Self {
        let defaults = ParameterSet::default();
        Self {
            inner: Mutex::new(StoreInner {
                defaults,
                current: defaults,
                committed: defaults,
                undo: Vec::new(),
                redo: Vec::new(),
                saved: BTreeMap::new(),
                batch_depth: 0,
                batch_undo_pushed: false,
                batch_dirty: false,
            }),
            active: ActiveParameterSet::new(&defaults),
            generation: AtomicU64::new(1),
        }
    }

    /// The process-wide store instance, shared between the tuning facade
    /// and every audio component.
    pub fn global() -> Arc<DetectionStore> {
        static STORE: Lazy<Arc<DetectionStore>> = Lazy::new(|| Arc::new(DetectionStore::new()));
        STORE.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Audio-thread read path
    // ─────────────────────────────────────────────────────────────────────

    /// Wait-free read of the active view. Out-of-range strings read as 0.
    #[inline]
    pub fn active_value(&self, param: NoteParam, string_idx: usize) -> f32 {
        self.active.value(param, string_idx)
    }

    /// Monotonic publication counter.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn publish(&self, inner: &StoreInner) {
        self.active.publish(&inner.current);
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Editor mutations
    // ─────────────────────────────────────────────────────────────────────

    /// Set one cell of the in-edit copy. Outside a batch this publishes
    /// immediately; inside a batch publication is deferred to the outermost
    /// `end_batch` so the whole batch counts as one mutation.
    pub fn set_value(&self, param: NoteParam, string_idx: usize, value: f32) {
        if string_idx >= STRING_COUNT {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.batch_depth > 0 {
            if !inner.batch_undo_pushed {
                inner.push_undo();
                inner.batch_undo_pushed = true;
            }
            inner.current.set(param, string_idx, value);
            inner.redo.clear();
            inner.batch_dirty = true;
        } else {
            inner.push_undo();
            inner.current.set(param, string_idx, value);
            inner.redo.clear();
            self.publish(&inner);
        }
    }

    /// Group subsequent `set_value` calls under a single undo snapshot and
    /// a single publication. Nestable; only the outermost pair takes effect.
    pub fn begin_batch(&self) {
        let mut inner = self.inner.lock();
        inner.batch_depth += 1;
        if inner.batch_depth == 1 {
            inner.batch_undo_pushed = false;
            inner.batch_dirty = false;
        }
    }

    pub fn end_batch(&self) {
        let mut inner = self.inner.lock();
        if inner.batch_depth == 0 {
            inner.batch_undo_pushed = false;
            inner.batch_dirty = false;
            return;
        }
        inner.batch_depth -= 1;
        if inner.batch_depth == 0 {
            inner.batch_undo_pushed = false;
            if inner.batch_dirty {
                inner.batch_dirty = false;
                self.publish(&inner);
            }
        }
    }

    pub fn undo(&self) {
        let mut inner = self.inner.lock();
        let Some(snapshot) = inner.undo.pop() else {
            return;
        };
        let current = inner.current;
        inner.redo.push(current);
        inner.current = snapshot;
        self.publish(&inner);
    }

    pub fn redo(&self) {
        let mut inner = self.inner.lock();
        let Some(snapshot) = inner.redo.pop() else {
            return;
        };
        let current = inner.current;
        inner.undo.push(current);
        inner.current = snapshot;
        self.publish(&inner);
    }

    /// Accept the current edits as the new revert target.
    pub fn commit(&self) {
        let mut inner = self.inner.lock();
        inner.committed = inner.current;
        inner.clear_history();
        self.publish(&inner);
    }

    /// Throw away edits since the last commit.
    pub fn revert(&self) {
        let mut inner = self.inner.lock();
        inner.current = inner.committed;
        inner.clear_history();
        self.publish(&inner);
    }

    pub fn reset_to_defaults(&self) {
        let mut inner = self.inner.lock();
        inner.current = inner.defaults;
        inner.clear_history();
        self.publish(&inner);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Named states
    // ─────────────────────────────────────────────────────────────────────

    pub fn save_state(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        let current = inner.current;
        inner.saved.insert(name.to_string(), current);
    }

    /// Load a named state into the in-edit copy. Unknown names fail
    /// silently (returning false).
    pub fn load_state(&self, name: &str) -> bool {
        let mut inner = self.inner.lock();
        let Some(set) = inner.saved.get(name).copied() else {
            return false;
        };
        inner.current = set;
        inner.clear_history();
        self.publish(&inner);
        true
    }

    pub fn delete_state(&self, name: &str) -> bool {
        self.inner.lock().saved.remove(name).is_some()
    }

    pub fn list_states(&self) -> Vec<String> {
        self.inner.lock().saved.keys().cloned().collect()
    }

    pub fn saved_states_snapshot(&self) -> BTreeMap<String, ParameterSet> {
        self.inner.lock().saved.clone()
    }

    pub fn replace_saved_states(&self, states: BTreeMap<String, ParameterSet>) {
        self.inner.lock().saved = states;
    }

    // ─────────────────────────────────────────────────────────────────────
    // Bulk exchange (persistence)
    // ─────────────────────────────────────────────────────────────────────

    pub fn snapshot_current(&self) -> ParameterSet {
        self.inner.lock().current
    }

    pub fn snapshot_committed(&self) -> ParameterSet {
        self.inner.lock().committed
    }

    /// Install a parameter set as both committed and current (disk restore).
    pub fn apply_committed_snapshot(&self, set: &ParameterSet) {
        let mut inner = self.inner.lock();
        inner.committed = *set;
        inner.current = *set;
        inner.clear_history();
        self.publish(&inner);
    }

    /// Replace the in-edit copy wholesale without touching history.
    pub fn apply_current_snapshot(&self, set: &ParameterSet) {
        let mut inner = self.inner.lock();
        inner.current = *set;
        self.publish(&inner);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Key-based access
    // ─────────────────────────────────────────────────────────────────────

    /// Set by JSON/UI key; unknown keys are a no-op.
    pub fn set_value_from_key(&self, key: &str, string_idx: usize, value: f32) {
        if let Some(param) = NoteParam::from_key(key) {
            self.set_value(param, string_idx, value);
        } else {
            log::debug!("set_value_from_key: unknown key {key:?}");
        }
    }

    pub fn current_value_from_key(&self, key: &str, string_idx: usize) -> f32 {
        match NoteParam::from_key(key) {
            Some(param) => self
                .inner
                .lock()
                .current
                .get(param, string_idx)
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    pub fn committed_value_from_key(&self, key: &str, string_idx: usize) -> f32 {
        match NoteParam::from_key(key) {
            Some(param) => self
                .inner
                .lock()
                .committed
                .get(param, string_idx)
                .unwrap_or(0.0),
            None => 0.0,
        }
    }

    pub fn current_value(&self, param: NoteParam, string_idx: usize) -> f32 {
        self.inner.lock().current.get(param, string_idx).unwrap_or(0.0)
    }

    pub fn defaults(&self) -> ParameterSet {
        self.inner.lock().defaults
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_commit_active_round_trip() {
        let store = DetectionStore::new();
        store.set_value(NoteParam::GateRatio, 2, 0.5);
        store.commit();
        assert_eq!(store.active_value(NoteParam::GateRatio, 2), 0.5);
        assert_eq!(store.committed_value_from_key("gateRatio", 2), 0.5);
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let store = DetectionStore::new();
        let before = store.current_value(NoteParam::TargetRms, 0);
        store.set_value(NoteParam::TargetRms, 0, 0.1);
        store.undo();
        assert_eq!(store.current_value(NoteParam::TargetRms, 0), before);
        store.redo();
        assert_eq!(store.current_value(NoteParam::TargetRms, 0), 0.1);
        assert_eq!(store.active_value(NoteParam::TargetRms, 0), 0.1);
    }

    #[test]
    fn test_undo_depth_bounded() {
        let store = DetectionStore::new();
        for i in 0..40 {
            store.set_value(NoteParam::GateRatio, 0, i as f32);
        }
        // Only the newest 32 snapshots survive.
        for _ in 0..64 {
            store.undo();
        }
        // 40 edits, 32 undos available: the oldest reachable value is edit 7.
        assert_eq!(store.current_value(NoteParam::GateRatio, 0), 7.0);
    }

    #[test]
    fn test_batch_is_one_mutation() {
        let store = DetectionStore::new();
        let before = store.generation();

        store.begin_batch();
        store.set_value(NoteParam::OnsetThresholdScale, 0, 0.5);
        store.set_value(NoteParam::OnsetThresholdScale, 1, 0.6);
        store.end_batch();
        assert_eq!(store.generation(), before + 1);

        store.undo();
        assert_eq!(store.generation(), before + 2);
        let defaults = ParameterSet::default();
        assert_eq!(
            store.current_value(NoteParam::OnsetThresholdScale, 0),
            defaults.get(NoteParam::OnsetThresholdScale, 0).unwrap()
        );
        assert_eq!(
            store.current_value(NoteParam::OnsetThresholdScale, 1),
            defaults.get(NoteParam::OnsetThresholdScale, 1).unwrap()
        );

        store.redo();
        assert_eq!(store.generation(), before + 3);
        assert_eq!(store.current_value(NoteParam::OnsetThresholdScale, 0), 0.5);
        assert_eq!(store.current_value(NoteParam::OnsetThresholdScale, 1), 0.6);
    }

    #[test]
    fn test_nested_batches_record_once() {
        let store = DetectionStore::new();
        let before = store.generation();
        store.begin_batch();
        store.set_value(NoteParam::GateRatio, 0, 1.0);
        store.begin_batch();
        store.set_value(NoteParam::GateRatio, 1, 2.0);
        store.end_batch();
        // Still inside the outer batch: nothing published yet.
        assert_eq!(store.generation(), before);
        store.end_batch();
        assert_eq!(store.generation(), before + 1);

        store.undo();
        let defaults = ParameterSet::default();
        assert_eq!(
            store.current_value(NoteParam::GateRatio, 1),
            defaults.get(NoteParam::GateRatio, 1).unwrap()
        );
    }

    #[test]
    fn test_empty_batch_publishes_nothing() {
        let store = DetectionStore::new();
        let before = store.generation();
        store.begin_batch();
        store.end_batch();
        assert_eq!(store.generation(), before);
    }

    #[test]
    fn test_generation_strictly_increases() {
        let store = DetectionStore::new();
        let mut last = store.generation();
        store.set_value(NoteParam::GateRatio, 0, 0.3);
        assert!(store.generation() > last);
        last = store.generation();
        store.commit();
        assert!(store.generation() > last);
        last = store.generation();
        store.revert();
        assert!(store.generation() > last);
    }

    #[test]
    fn test_reset_restores_tabulated_defaults() {
        let store = DetectionStore::new();
        for param in NoteParam::all() {
            for s in 0..STRING_COUNT {
                store.set_value(param, s, 123.0);
            }
        }
        store.reset_to_defaults();
        let defaults = ParameterSet::default();
        for param in NoteParam::all() {
            for s in 0..STRING_COUNT {
                assert_eq!(
                    store.active_value(param, s),
                    defaults.get(param, s).unwrap(),
                    "{param:?}/{s}"
                );
            }
        }
    }

    #[test]
    fn test_named_states() {
        let store = DetectionStore::new();
        store.set_value(NoteParam::PitchTolerance, 3, 0.77);
        store.save_state("bright");
        store.set_value(NoteParam::PitchTolerance, 3, 0.2);
        assert!(store.load_state("bright"));
        assert_eq!(store.active_value(NoteParam::PitchTolerance, 3), 0.77);
        assert!(!store.load_state("missing"));
        assert!(store.delete_state("bright"));
        assert!(!store.delete_state("bright"));
        store.save_state("");
        assert!(store.list_states().is_empty());
    }

    #[test]
    fn test_unknown_key_is_noop() {
        let store = DetectionStore::new();
        let gen = store.generation();
        store.set_value_from_key("notAKey", 0, 9.0);
        assert_eq!(store.generation(), gen);
        assert_eq!(store.current_value_from_key("notAKey", 0), 0.0);
    }

    #[test]
    fn test_out_of_range_string_is_noop() {
        let store = DetectionStore::new();
        let gen = store.generation();
        store.set_value(NoteParam::GateRatio, 6, 1.0);
        assert_eq!(store.generation(), gen);
        assert_eq!(store.active_value(NoteParam::GateRatio, 6), 0.0);
    }
}
