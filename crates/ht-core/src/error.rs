//! Error types for HexTab

use thiserror::Error;

/// Core error type
#[derive(Error, Debug)]
pub enum HtError {
    #[error("Audio error: {0}")]
    Audio(String),

    #[error("DSP error: {0}")]
    Dsp(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f32),

    #[error("Detector init failed: {0}")]
    DetectorInit(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("State error: {0}")]
    State(String),
}

/// Result type alias
pub type HtResult<T> = Result<T, HtError>;
