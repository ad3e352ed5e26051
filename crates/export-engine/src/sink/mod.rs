//! Encoder sinks: the consumers that turn timestamped frames into a file.
//!
//! A sink paces production. The worker asks it for demand with
//! [`EncoderSink::wait_for_demand`]; the session appends frames only while
//! [`EncoderSink::is_ready_for_more`] holds, and polls
//! [`EncoderSink::failure`] before every frame because a sink can fail
//! independently of any append (an encoder process exiting, a full disk).

use std::path::PathBuf;
use std::time::Duration;

use shadercast_common::clock::{FrameRate, PresentationTime};
use shadercast_render::PixelFormat;

use crate::pool::FrameBuffer;

pub mod ffmpeg;
pub mod memory;

pub use ffmpeg::{is_ffmpeg_available, FfmpegOptions, FfmpegSink};
pub use memory::{MemorySink, MemorySinkOptions, MemorySinkTap, RecordedFrame};

/// Output parameters handed to a sink at start.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub destination: PathBuf,
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
    pub pixel_format: PixelFormat,
}

/// Answer to "do you want frames?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Demand {
    /// The sink wants input now.
    Ready,
    /// The sink has failed; `failure()` carries the reason.
    Failed,
    /// Nothing happened within the wait slice.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("cannot write {}: {message}", path.display())]
    DestinationUnwritable { path: PathBuf, message: String },

    #[error("unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("failed to launch encoder: {0}")]
    Launch(String),

    #[error("sink used before start")]
    NotStarted,

    #[error("frame {got} submitted after frame {previous}")]
    OutOfOrder {
        previous: PresentationTime,
        got: PresentationTime,
    },

    #[error("write failed: {0}")]
    Write(String),

    #[error("encoder failed: {0}")]
    Encoder(String),

    #[error("finalize failed: {0}")]
    Finalize(String),
}

/// Invoked exactly once when an asynchronous finalize completes.
pub type FinalizeCallback = Box<dyn FnOnce(Result<(), SinkError>) + Send>;

/// Ordered consumer of timestamped frames.
pub trait EncoderSink: Send {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Open the destination. Fails if it is unwritable or the format is unsupported.
    fn start(&mut self, config: &SinkConfig) -> Result<(), SinkError>;

    /// Block up to `timeout` for the sink to want more input.
    fn wait_for_demand(&mut self, timeout: Duration) -> Demand;

    /// Whether another frame may be appended right now.
    fn is_ready_for_more(&self) -> bool;

    /// The sink's failure, if it has failed.
    fn failure(&self) -> Option<SinkError>;

    /// Take ownership of a rendered frame.
    fn append(&mut self, buffer: FrameBuffer, pts: PresentationTime) -> Result<(), SinkError>;

    /// No more frames will be appended.
    fn mark_input_finished(&mut self);

    /// Complete the container in the background and report through `done`.
    fn finalize(&mut self, done: FinalizeCallback);

    /// Tear down after a failure. The output is left in whatever state it is in.
    fn abort(&mut self);
}
