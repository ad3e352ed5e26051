//! Frame clock and timeline math for offline export.
//!
//! Every exported frame is stamped with a rational presentation time
//! `k / fps`. Times are never built by summing per-frame float durations,
//! so frame 36_000 lands on exactly 600 seconds rather than drifting.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// An integer frame rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    fps: u32,
}

impl FrameRate {
    /// The fixed rate used for every export.
    pub const EXPORT: FrameRate = FrameRate { fps: 60 };

    /// Create a frame rate. Returns `None` for zero.
    pub fn new(fps: u32) -> Option<Self> {
        (fps > 0).then_some(Self { fps })
    }

    /// Frames per second.
    pub fn fps(self) -> u32 {
        self.fps
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        1.0 / self.fps as f64
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        Self::EXPORT
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fps", self.fps)
    }
}

/// A rational timestamp on the output timeline: `value / timescale` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PresentationTime {
    value: u64,
    timescale: u32,
}

impl PresentationTime {
    /// Timestamp of frame `index` at `rate`.
    pub fn for_frame(index: u64, rate: FrameRate) -> Self {
        Self {
            value: index,
            timescale: rate.fps,
        }
    }

    /// Numerator (frame index when the timescale is the frame rate).
    pub fn value(self) -> u64 {
        self.value
    }

    /// Ticks per second.
    pub fn timescale(self) -> u32 {
        self.timescale
    }

    /// Seconds as a float, computed with a single division.
    pub fn as_secs_f64(self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Seconds as `f32`, the precision shader uniforms use.
    pub fn as_secs_f32(self) -> f32 {
        self.as_secs_f64() as f32
    }
}

impl fmt::Display for PresentationTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.value, self.timescale)
    }
}

/// Number of frames covering `duration_secs` at `rate`: `floor(duration * fps)`.
///
/// Non-finite or non-positive durations yield zero frames.
pub fn total_frames(duration_secs: f64, rate: FrameRate) -> u64 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0;
    }
    (duration_secs * rate.fps as f64).floor() as u64
}

/// Fraction of `total` completed after `done` frames, in `[0, 1]`.
///
/// Returns exactly `1.0` once `done == total`.
pub fn progress_fraction(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    if done >= total {
        return 1.0;
    }
    done as f64 / total as f64
}

/// Wall-clock stopwatch for an export run.
#[derive(Debug, Clone)]
pub struct ExportClock {
    /// The instant the export started.
    started: Instant,

    /// Wall-clock time at start (RFC 3339).
    started_wall: String,
}

impl ExportClock {
    /// Start a clock anchored to now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since start.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Wall-clock time at start.
    pub fn started_wall(&self) -> &str {
        &self.started_wall
    }

    /// Estimated seconds remaining given the completed fraction.
    pub fn eta_secs(&self, progress: f64) -> f64 {
        eta_secs(self.elapsed_secs(), progress)
    }
}

/// Linear ETA: remaining = elapsed / progress - elapsed, clamped to zero.
pub fn eta_secs(elapsed_secs: f64, progress: f64) -> f64 {
    if progress <= 0.0 {
        return 0.0;
    }
    ((elapsed_secs / progress) - elapsed_secs).max(0.0)
}
