//! Shadercast Audio Levels
//!
//! Turns a decoded audio track into a per-frame loudness signal for
//! shader exports:
//!
//! - **Snapshot:** an immutable copy of mono samples plus sample rate,
//!   taken once before an export so the render worker never touches
//!   live playback state.
//! - **Level provider:** maps a timestamp to a normalized `[0, 1]`
//!   loudness using a ±25 ms RMS window on a -60 dB floor.
//! - **Analysis:** whole-track RMS/peak summary used to classify a
//!   track as energetic or ambient.

pub mod analysis;
pub mod level;
pub mod snapshot;

pub use analysis::*;
pub use level::*;
pub use snapshot::*;

use std::path::PathBuf;

/// Errors raised while building audio snapshots.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("Audio file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Failed to decode WAV: {0}")]
    Wav(#[from] hound::Error),

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(f64),

    #[error("Unsupported sample format: {bits}-bit {format}")]
    UnsupportedFormat { bits: u16, format: &'static str },
}

/// Result alias for audio operations.
pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for shadercast_common::ShadercastError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::FileNotFound { path } => Self::FileNotFound { path },
            other => Self::audio(other.to_string()),
        }
    }
}
