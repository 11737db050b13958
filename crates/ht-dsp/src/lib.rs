//! ht-dsp: Per-hop DSP for HexTab
//!
//! Provides the building blocks the string trackers run every hop:
//! - One-pole band-pass conditioning per string
//! - Spectral-flux onset detection
//! - YIN and FFT-accelerated YIN pitch detection
//! - Block RMS / peak metering and EMA smoothing
//! - Median smoothing for pitch tracks

mod analyzer;
mod filter;
mod median;
mod metering;
mod onset;
mod pitch;

pub use analyzer::*;
pub use filter::*;
pub use median::*;
pub use metering::*;
pub use onset::*;
pub use pitch::*;
