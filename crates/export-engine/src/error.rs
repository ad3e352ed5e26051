//! Export failure taxonomy.

use std::path::PathBuf;

use crate::sink::SinkError;

/// Why an export did not produce a finished file.
///
/// Every export delivers at most one of these, through its completion.
/// Transient buffer exhaustion is absorbed by the session and never
/// appears here.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExportError {
    #[error("Invalid export request: {0}")]
    InvalidRequest(String),

    #[error("Another export is already running")]
    Busy,

    #[error("Destination {} is not writable: {message}", path.display())]
    DestinationUnwritable { path: PathBuf, message: String },

    #[error("Encoder setup failed: {0}")]
    SinkSetupFailure(String),

    #[error("Frame buffer pool unavailable: {0}")]
    PoolUnavailable(String),

    #[error("Failed to create render texture: {0}")]
    TextureCreationFailure(String),

    #[error("Render failed: {0}")]
    RenderFailure(String),

    #[error("Encoder rejected frame: {0}")]
    SinkAppendFailure(SinkError),

    #[error("Encoder failed: {0}")]
    EncoderFailure(SinkError),

    #[error("Failed to finalize output: {0}")]
    SinkFinalizeFailure(SinkError),

    #[error("Export cancelled")]
    Cancelled,

    #[error("Encoder requested no frames for {waited_secs:.1}s")]
    Stalled { waited_secs: f64 },

    #[error("Internal export error: {0}")]
    Internal(String),
}

/// Fieldless mirror of [`ExportError`] for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExportErrorKind {
    InvalidRequest,
    Busy,
    DestinationUnwritable,
    SinkSetupFailure,
    PoolUnavailable,
    TextureCreationFailure,
    RenderFailure,
    SinkAppendFailure,
    EncoderFailure,
    SinkFinalizeFailure,
    Cancelled,
    Stalled,
    Internal,
}

impl ExportError {
    pub fn kind(&self) -> ExportErrorKind {
        match self {
            Self::InvalidRequest(_) => ExportErrorKind::InvalidRequest,
            Self::Busy => ExportErrorKind::Busy,
            Self::DestinationUnwritable { .. } => ExportErrorKind::DestinationUnwritable,
            Self::SinkSetupFailure(_) => ExportErrorKind::SinkSetupFailure,
            Self::PoolUnavailable(_) => ExportErrorKind::PoolUnavailable,
            Self::TextureCreationFailure(_) => ExportErrorKind::TextureCreationFailure,
            Self::RenderFailure(_) => ExportErrorKind::RenderFailure,
            Self::SinkAppendFailure(_) => ExportErrorKind::SinkAppendFailure,
            Self::EncoderFailure(_) => ExportErrorKind::EncoderFailure,
            Self::SinkFinalizeFailure(_) => ExportErrorKind::SinkFinalizeFailure,
            Self::Cancelled => ExportErrorKind::Cancelled,
            Self::Stalled { .. } => ExportErrorKind::Stalled,
            Self::Internal(_) => ExportErrorKind::Internal,
        }
    }

    /// Errors raised before the first frame is produced.
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self.kind(),
            ExportErrorKind::InvalidRequest
                | ExportErrorKind::Busy
                | ExportErrorKind::DestinationUnwritable
                | ExportErrorKind::SinkSetupFailure
                | ExportErrorKind::PoolUnavailable
        )
    }
}

impl From<ExportError> for shadercast_common::ShadercastError {
    fn from(err: ExportError) -> Self {
        shadercast_common::ShadercastError::export(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_classification() {
        assert!(ExportError::Busy.is_fatal_at_startup());
        assert!(ExportError::PoolUnavailable("x".into()).is_fatal_at_startup());
        assert!(!ExportError::Cancelled.is_fatal_at_startup());
        assert!(!ExportError::SinkAppendFailure(SinkError::Write("disk full".into()))
            .is_fatal_at_startup());
    }

    #[test]
    fn test_display_carries_sink_error() {
        let err = ExportError::SinkAppendFailure(SinkError::Write("disk full".into()));
        assert!(err.to_string().contains("disk full"));
        assert_eq!(err.kind(), ExportErrorKind::SinkAppendFailure);
    }

    #[test]
    fn test_converts_to_shared_error() {
        let shared: shadercast_common::ShadercastError = ExportError::Cancelled.into();
        assert!(shared.to_string().starts_with("Export error:"));
    }
}
