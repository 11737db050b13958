//! Environment switches
//!
//! All optional; absence means default behavior.

use std::path::PathBuf;

/// Overrides the capture session root directory.
pub const ENV_CAPTURE_DIR: &str = "HEXTAB_CAPTURE_DIR";
/// Enables per-note debug logging on the live path.
pub const ENV_LOG_NOTES: &str = "HEXTAB_LOG_NOTES";
/// Disables the monitor feed entirely.
pub const ENV_DISABLE_MONITOR: &str = "HEXTAB_DISABLE_MONITOR";
/// Asks the shell to auto-play a recorded session on startup.
pub const ENV_AUTOPLAY: &str = "HEXTAB_AUTOPLAY";

/// Capture root: `$HEXTAB_CAPTURE_DIR` or `./sessions/live`.
pub fn capture_root_dir() -> PathBuf {
    match std::env::var_os(ENV_CAPTURE_DIR) {
        Some(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => PathBuf::from("sessions").join("live"),
    }
}

pub fn debug_note_logging() -> bool {
    std::env::var_os(ENV_LOG_NOTES).is_some()
}

pub fn monitor_disabled() -> bool {
    std::env::var_os(ENV_DISABLE_MONITOR).is_some()
}

/// Read by the embedding shell; the engine itself never auto-plays.
pub fn autoplay_requested() -> bool {
    std::env::var_os(ENV_AUTOPLAY).is_some()
}
