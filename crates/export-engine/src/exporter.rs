//! The public entry point: owns the renderer and launches exports.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use shadercast_common::config::ExportDefaults;
use shadercast_render::{CompileError, RenderEngine};

use crate::error::ExportError;
use crate::handle::{CancelToken, ExportHandle};
use crate::progress::ExportCallbacks;
use crate::request::ExportRequest;
use crate::session::{ExportSession, SessionOptions, SharedRenderer};
use crate::sink::{EncoderSink, FfmpegOptions, FfmpegSink};
use crate::texture::BridgeKind;
use crate::worker::{self, WorkerOptions};

/// Exporter tuning.
#[derive(Debug, Clone)]
pub struct ExporterSettings {
    /// Frame buffers in the pool.
    pub max_buffers: usize,

    /// Flush the texture cache every this many frames.
    pub cache_flush_interval: u64,

    /// Texture bridge implementation.
    pub bridge: BridgeKind,

    /// Unflushed texture cache ceiling. `None` derives it from the frame
    /// size: two flush intervals' worth of frames.
    pub max_cached_bytes: Option<u64>,

    /// Longest single wait for encoder demand.
    pub demand_slice: Duration,

    /// Fail an export whose encoder asks for nothing for this long.
    pub demand_timeout: Option<Duration>,

    /// File sink settings for [`Exporter::export_to_file`].
    pub ffmpeg: FfmpegOptions,
}

impl ExporterSettings {
    pub fn from_defaults(defaults: &ExportDefaults) -> Self {
        Self {
            max_buffers: defaults.max_buffers,
            cache_flush_interval: defaults.cache_flush_interval,
            demand_timeout: defaults.demand_timeout_secs.map(Duration::from_secs),
            ffmpeg: FfmpegOptions::from_defaults(defaults),
            ..Self::default()
        }
    }

    fn session_options(&self, request: &ExportRequest) -> SessionOptions {
        let derived = request
            .frame_bytes()
            .saturating_mul(2)
            .saturating_mul(self.cache_flush_interval.max(1));
        SessionOptions {
            max_buffers: self.max_buffers,
            cache_flush_interval: self.cache_flush_interval,
            bridge: self.bridge,
            max_cached_bytes: Some(self.max_cached_bytes.unwrap_or(derived)),
        }
    }

    fn worker_options(&self) -> WorkerOptions {
        WorkerOptions {
            demand_slice: self.demand_slice,
            demand_timeout: self.demand_timeout,
        }
    }
}

impl Default for ExporterSettings {
    fn default() -> Self {
        Self {
            max_buffers: 6,
            cache_flush_interval: 60,
            bridge: BridgeKind::ZeroCopy,
            max_cached_bytes: None,
            demand_slice: Duration::from_millis(50),
            demand_timeout: Some(Duration::from_secs(30)),
            ffmpeg: FfmpegOptions::default(),
        }
    }
}

/// Marks the exporter busy for as long as it lives.
#[derive(Debug)]
pub(crate) struct BusyGuard(Arc<AtomicBool>);

impl BusyGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag.clone()))
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Offline shader-to-video exporter. Runs one export at a time.
pub struct Exporter {
    renderer: SharedRenderer,
    settings: ExporterSettings,
    busy: Arc<AtomicBool>,
}

impl Exporter {
    pub fn new(renderer: Box<dyn RenderEngine>, settings: ExporterSettings) -> Self {
        Self {
            renderer: Arc::new(Mutex::new(renderer)),
            settings,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn settings(&self) -> &ExporterSettings {
        &self.settings
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn renderer_name(&self) -> &'static str {
        self.renderer
            .lock()
            .map(|r| r.name())
            .unwrap_or("unavailable")
    }

    pub fn is_compiled(&self) -> bool {
        self.renderer.lock().map(|r| r.is_compiled()).unwrap_or(false)
    }

    /// Compile a shader program. Rejected while an export is running.
    pub fn compile(&self, source: &str) -> Result<(), CompileError> {
        // Holding the busy flag keeps an export from starting mid-compile.
        let _guard = BusyGuard::acquire(&self.busy)
            .ok_or_else(|| CompileError::new("cannot compile while an export is running"))?;
        let mut renderer = self
            .renderer
            .lock()
            .map_err(|_| CompileError::new("renderer lock poisoned"))?;
        renderer.compile(source)?;
        tracing::info!(renderer = renderer.name(), "Shader program compiled");
        Ok(())
    }

    /// Export to a file through ffmpeg.
    pub fn export_to_file(&self, request: ExportRequest, callbacks: ExportCallbacks) -> ExportHandle {
        let sink = FfmpegSink::new(self.settings.ffmpeg.clone());
        self.export(request, Box::new(sink), callbacks)
    }

    /// Start an export into `sink`. The returned handle always completes,
    /// and `callbacks.on_complete` fires exactly once.
    pub fn export(
        &self,
        request: ExportRequest,
        sink: Box<dyn EncoderSink>,
        callbacks: ExportCallbacks,
    ) -> ExportHandle {
        if let Err(e) = request.validate() {
            tracing::warn!(error = %e, "Export request rejected");
            return ExportHandle::rejected(e, callbacks);
        }

        let Some(guard) = BusyGuard::acquire(&self.busy) else {
            tracing::warn!("Export rejected: another export is running");
            return ExportHandle::rejected(ExportError::Busy, callbacks);
        };

        if !self.is_compiled() {
            drop(guard);
            return ExportHandle::rejected(
                ExportError::InvalidRequest("no shader program compiled".into()),
                callbacks,
            );
        }

        if let Err(e) = remove_existing(&request.destination) {
            drop(guard);
            tracing::warn!(error = %e, "Export destination rejected");
            return ExportHandle::rejected(e, callbacks);
        }

        let cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        let handle = match ExportHandle::spawn(request.total_frames(), rx, callbacks, cancel.clone()) {
            Ok(handle) => handle,
            Err((e, callbacks)) => {
                drop(guard);
                tracing::error!(error = %e, "Could not start export dispatcher");
                return ExportHandle::rejected(e, callbacks);
            }
        };

        let options = self.settings.session_options(&request);
        let worker_options = self.settings.worker_options();
        let session = ExportSession::new(request, self.renderer.clone(), sink, options, tx, cancel)
            .with_busy_guard(guard);

        // If the worker cannot be spawned the session is dropped here, which
        // closes the event channel and completes the handle with an error.
        if let Err(e) = std::thread::Builder::new()
            .name("shadercast-export".into())
            .spawn(move || {
                let status = worker::run(session, worker_options);
                tracing::debug!(?status, "Export worker exiting");
            })
        {
            tracing::error!(error = %e, "Could not spawn export worker");
        }

        handle
    }
}

/// Delete a previous output at `path`, if any.
fn remove_existing(path: &Path) -> Result<(), ExportError> {
    let unwritable = |message: String| ExportError::DestinationUnwritable {
        path: path.to_path_buf(),
        message,
    };
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(unwritable("destination is a directory".into())),
        Ok(_) => {
            std::fs::remove_file(path).map_err(|e| unwritable(e.to_string()))?;
            tracing::debug!(path = %path.display(), "Removed existing output");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(unwritable(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_guard_is_exclusive() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(!flag.load(Ordering::SeqCst));
        assert!(BusyGuard::acquire(&flag).is_some());
    }

    #[test]
    fn test_compile_holds_busy_flag() {
        let exporter = Exporter::new(
            Box::new(shadercast_render::ProceduralRenderer::new()),
            ExporterSettings::default(),
        );

        let guard = BusyGuard::acquire(&exporter.busy).unwrap();
        let err = exporter.compile(r#"{"pattern": "solid"}"#).unwrap_err();
        assert!(err.message.contains("export is running"));
        assert!(!exporter.is_compiled());
        drop(guard);

        exporter.compile(r#"{"pattern": "solid"}"#).unwrap();
        assert!(exporter.is_compiled());
        assert!(!exporter.is_busy());
    }

    #[test]
    fn test_settings_follow_config_defaults() {
        let defaults = ExportDefaults {
            max_buffers: 3,
            cache_flush_interval: 10,
            demand_timeout_secs: None,
            ..Default::default()
        };
        let settings = ExporterSettings::from_defaults(&defaults);
        assert_eq!(settings.max_buffers, 3);
        assert_eq!(settings.cache_flush_interval, 10);
        assert_eq!(settings.demand_timeout, None);
        assert_eq!(settings.bridge, BridgeKind::ZeroCopy);
    }

    #[test]
    fn test_cache_ceiling_derives_from_frame_size() {
        let settings = ExporterSettings {
            cache_flush_interval: 5,
            ..Default::default()
        };
        let request = ExportRequest::new("a.mp4", 1.0, 4, 2);
        assert_eq!(
            settings.session_options(&request).max_cached_bytes,
            Some(4 * 2 * 4 * 2 * 5)
        );
    }

    #[test]
    fn test_remove_existing_handles_missing_and_present_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        remove_existing(&path).unwrap();

        std::fs::write(&path, b"old").unwrap();
        remove_existing(&path).unwrap();
        assert!(!path.exists());

        let err = remove_existing(dir.path()).unwrap_err();
        assert!(matches!(err, ExportError::DestinationUnwritable { .. }));
    }
}
