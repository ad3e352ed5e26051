//! Progress and completion reporting.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::ExportError;
use crate::pool::PoolStats;
use crate::texture::BridgeStats;

/// Export progress report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ExportProgress {
    /// Current progress [0.0, 1.0].
    pub progress: f64,

    /// Frames rendered and handed to the encoder so far.
    pub frames_rendered: u64,

    /// Total frames to render.
    pub total_frames: u64,

    /// Estimated time remaining in seconds.
    pub eta_secs: f64,

    /// Current stage.
    pub stage: ExportStage,
}

impl ExportProgress {
    /// Snapshot before any frame has been produced.
    pub fn preparing(total_frames: u64) -> Self {
        Self {
            progress: 0.0,
            frames_rendered: 0,
            total_frames,
            eta_secs: 0.0,
            stage: ExportStage::Preparing,
        }
    }
}

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExportStage {
    Preparing,
    Rendering,
    Finalizing,
    Complete,
    Failed,
}

/// What a successful export produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSummary {
    pub destination: PathBuf,
    pub frames_written: u64,
    /// Output duration: `frames_written / fps`.
    pub duration_secs: f64,
    /// Wall-clock time the export took.
    pub elapsed_secs: f64,
    pub pool: PoolStats,
    pub textures: BridgeStats,
}

pub type ExportResult = Result<ExportSummary, ExportError>;

/// Progress callback; called once per encoded frame.
pub type ProgressCallback = Box<dyn FnMut(ExportProgress) + Send>;

/// Completion callback; called exactly once per export.
pub type CompletionCallback = Box<dyn FnOnce(&ExportResult) + Send>;

/// Caller hooks for one export. Both run on the export's dispatcher
/// thread; a request rejected before it starts completes on the calling
/// thread instead.
#[derive(Default)]
pub struct ExportCallbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_complete: Option<CompletionCallback>,
}

impl std::fmt::Debug for ExportCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl ExportCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, f: impl FnMut(ExportProgress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl FnOnce(&ExportResult) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }
}

/// Messages from the worker to the dispatcher, in order.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// One more frame was encoded.
    Progress(ExportProgress),
    /// The session moved to a new stage.
    Stage(ExportStage),
    /// The terminal result. Always the last event.
    Completed(ExportResult),
}
