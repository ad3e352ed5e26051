//! Export requests.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use shadercast_audio::AudioLevelSource;
use shadercast_common::clock::{total_frames, FrameRate};

use crate::error::ExportError;

/// Largest accepted frame edge in pixels.
pub const MAX_DIMENSION: u32 = 16_384;

/// An immutable description of one export.
#[derive(Clone)]
pub struct ExportRequest {
    /// Output file. Any existing file at this path is deleted first.
    pub destination: PathBuf,

    /// Length of the output in seconds.
    pub duration_secs: f64,

    /// Output width in pixels.
    pub width: u32,

    /// Output height in pixels.
    pub height: u32,

    /// Output frame rate. Exports always run at 60 fps.
    pub frame_rate: FrameRate,

    /// Optional per-frame audio level input.
    pub audio: Option<Arc<dyn AudioLevelSource>>,
}

impl ExportRequest {
    pub fn new(destination: impl Into<PathBuf>, duration_secs: f64, width: u32, height: u32) -> Self {
        Self {
            destination: destination.into(),
            duration_secs,
            width,
            height,
            frame_rate: FrameRate::EXPORT,
            audio: None,
        }
    }

    /// Attach an audio level source.
    pub fn with_audio(mut self, audio: Arc<dyn AudioLevelSource>) -> Self {
        self.audio = Some(audio);
        self
    }

    /// `floor(duration * fps)`.
    pub fn total_frames(&self) -> u64 {
        total_frames(self.duration_secs, self.frame_rate)
    }

    /// Bytes in one BGRA frame.
    pub fn frame_bytes(&self) -> u64 {
        self.width as u64 * self.height as u64 * 4
    }

    /// Reject requests that cannot produce a single frame.
    pub fn validate(&self) -> Result<(), ExportError> {
        if !self.duration_secs.is_finite() || self.duration_secs <= 0.0 {
            return Err(ExportError::InvalidRequest(format!(
                "duration must be a positive number of seconds, got {}",
                self.duration_secs
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ExportError::InvalidRequest(format!(
                "resolution must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width > MAX_DIMENSION || self.height > MAX_DIMENSION {
            return Err(ExportError::InvalidRequest(format!(
                "resolution {}x{} exceeds {MAX_DIMENSION}px",
                self.width, self.height
            )));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(ExportError::InvalidRequest("destination is empty".into()));
        }
        if self.total_frames() == 0 {
            return Err(ExportError::InvalidRequest(format!(
                "{}s at {} is shorter than one frame",
                self.duration_secs, self.frame_rate
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for ExportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportRequest")
            .field("destination", &self.destination)
            .field("duration_secs", &self.duration_secs)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("frame_rate", &self.frame_rate)
            .field("audio", &self.audio.is_some())
            .finish()
    }
}
