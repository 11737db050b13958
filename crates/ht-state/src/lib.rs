//! ht-state: Parameter state management for HexTab
//!
//! - `DetectionStore`: the process-wide detection parameter store with a
//!   wait-free audio-thread read path, bounded undo/redo, batch editing,
//!   and named states
//! - `TuningFacade`: the editor-facing wrapper with categories, revision
//!   tracking, and JSON persistence
//! - `ProfileStore`: the persisted per-string calibration profile

mod paths;
mod profile;
mod store;
mod tuning;

pub use paths::*;
pub use profile::*;
pub use store::*;
pub use tuning::*;
