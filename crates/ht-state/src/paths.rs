//! Config directory resolution

use std::path::{Path, PathBuf};

/// Locations of the persisted tuning and calibration files.
///
/// Defaults to the platform config directory (`~/.config/hextab` on Linux)
/// with a `./configs` fallback when no home is available. Tests construct
/// one over a temp directory with [`ConfigPaths::with_root`].
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    root: PathBuf,
}

impl ConfigPaths {
    pub fn resolve_default() -> Self {
        let root = dirs::config_dir()
            .map(|dir| dir.join("hextab"))
            .unwrap_or_else(|| PathBuf::from("configs"));
        Self { root }
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn note_detection_dir(&self) -> PathBuf {
        self.root.join("note_detection")
    }

    pub fn committed_file(&self) -> PathBuf {
        self.note_detection_dir().join("committed.json")
    }

    pub fn states_file(&self) -> PathBuf {
        self.note_detection_dir().join("states.json")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.note_detection_dir().join("snapshots")
    }

    pub fn calibration_profile_file(&self) -> PathBuf {
        self.root.join("calibration_profile.json")
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::resolve_default()
    }
}
