//! The export session state machine.
//!
//! ```text
//! Idle ──start──▶ Active ──all frames appended──▶ Draining ──finalize ok──▶ Finished
//!   │               │                                │
//!   └───────────────┴──────── any fatal error ───────┴─────────────────────▶ Failed
//! ```
//!
//! A session is driven by exactly one thread (the export worker), which
//! calls [`ExportSession::on_ready`] each time the sink signals demand.
//! All mutable state lives here and is touched by nothing else; callers
//! observe it only through [`SessionEvent`]s.

use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shadercast_common::clock::{progress_fraction, ExportClock, PresentationTime};
use shadercast_render::{check_surface, FrameParams, RenderEngine, RenderError};

use crate::error::ExportError;
use crate::exporter::BusyGuard;
use crate::handle::CancelToken;
use crate::pool::{FrameBufferPool, FrameFormat, PoolError, PoolOptions};
use crate::progress::{ExportProgress, ExportResult, ExportStage, ExportSummary, SessionEvent};
use crate::request::ExportRequest;
use crate::sink::{Demand, EncoderSink, SinkConfig, SinkError};
use crate::texture::{create_bridge, BridgeKind, BridgeOptions, TextureBridge};

/// A renderer shared between the exporter (for compiling) and its sessions.
pub type SharedRenderer = Arc<Mutex<Box<dyn RenderEngine>>>;

/// Lifecycle of one export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Created, not started.
    Idle,
    /// Producing frames.
    Active,
    /// Every frame appended; waiting for the sink to finalize.
    Draining,
    /// The output is complete.
    Finished,
    /// A fatal error ended the export.
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }
}

/// What one readiness signal accomplished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionStep {
    /// The sink stopped asking for frames; wait for the next signal.
    Yielded,
    /// No frame buffer was free. Not an error; retry on the next signal.
    PoolExhausted,
    /// Every frame was appended; the session is draining.
    InputFinished,
    /// The session failed and has reported its error.
    Failed,
    /// The session is not active; the signal was ignored.
    Ignored,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Frame buffers in the pool.
    pub max_buffers: usize,
    /// Flush the texture cache every this many frames (0 disables).
    pub cache_flush_interval: u64,
    pub bridge: BridgeKind,
    /// Ceiling for unflushed texture cache bytes.
    pub max_cached_bytes: Option<u64>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            max_buffers: 6,
            cache_flush_interval: 60,
            bridge: BridgeKind::ZeroCopy,
            max_cached_bytes: None,
        }
    }
}

/// Sends session events and guarantees a single completion.
struct Reporter {
    events: Sender<SessionEvent>,
    busy: Option<BusyGuard>,
    completed: bool,
}

impl Reporter {
    fn progress(&self, progress: ExportProgress) {
        let _ = self.events.send(SessionEvent::Progress(progress));
    }

    fn stage(&self, stage: ExportStage) {
        let _ = self.events.send(SessionEvent::Stage(stage));
    }

    fn complete(&mut self, result: ExportResult) {
        if self.completed {
            tracing::error!("Export completion reported twice; ignoring");
            return;
        }
        self.completed = true;
        // Free the exporter before the caller hears about completion.
        self.busy.take();
        let _ = self.events.send(SessionEvent::Completed(result));
    }
}

/// One export, from first frame to finished file.
pub struct ExportSession {
    request: ExportRequest,
    options: SessionOptions,
    format: FrameFormat,
    total_frames: u64,
    frame_count: u64,
    status: SessionStatus,
    renderer: SharedRenderer,
    sink: Box<dyn EncoderSink>,
    pool: Option<FrameBufferPool>,
    bridge: Option<Box<dyn TextureBridge>>,
    reporter: Reporter,
    cancel: CancelToken,
    clock: ExportClock,
}

impl ExportSession {
    pub fn new(
        request: ExportRequest,
        renderer: SharedRenderer,
        sink: Box<dyn EncoderSink>,
        options: SessionOptions,
        events: Sender<SessionEvent>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            format: FrameFormat::bgra(request.width, request.height),
            total_frames: request.total_frames(),
            request,
            options,
            frame_count: 0,
            status: SessionStatus::Idle,
            renderer,
            sink,
            pool: None,
            bridge: None,
            reporter: Reporter {
                events,
                busy: None,
                completed: false,
            },
            cancel,
            clock: ExportClock::start(),
        }
    }

    pub(crate) fn with_busy_guard(mut self, guard: BusyGuard) -> Self {
        self.reporter.busy = Some(guard);
        self
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Open the pool and the sink. On failure the session is `Failed` and
    /// its completion has been reported.
    pub fn start(&mut self) -> Result<(), ExportError> {
        if self.status != SessionStatus::Idle {
            return Err(ExportError::Internal(format!(
                "session started twice (status {:?})",
                self.status
            )));
        }

        let pool = match FrameBufferPool::new(
            self.format,
            PoolOptions {
                max_buffers: self.options.max_buffers,
            },
        ) {
            Ok(pool) => pool,
            Err(e) => return Err(self.fail_startup(ExportError::PoolUnavailable(e.to_string()))),
        };

        let config = SinkConfig {
            destination: self.request.destination.clone(),
            width: self.request.width,
            height: self.request.height,
            frame_rate: self.request.frame_rate,
            pixel_format: self.format.pixel_format,
        };
        if let Err(e) = self.sink.start(&config) {
            let err = match e {
                SinkError::DestinationUnwritable { path, message } => {
                    ExportError::DestinationUnwritable { path, message }
                }
                other => ExportError::SinkSetupFailure(other.to_string()),
            };
            return Err(self.fail_startup(err));
        }

        self.bridge = Some(create_bridge(
            self.options.bridge,
            self.format,
            BridgeOptions {
                max_cached_bytes: self.options.max_cached_bytes,
            },
        ));
        self.pool = Some(pool);
        self.status = SessionStatus::Active;
        self.clock = ExportClock::start();
        self.reporter.stage(ExportStage::Rendering);

        tracing::info!(
            destination = %self.request.destination.display(),
            total_frames = self.total_frames,
            width = self.request.width,
            height = self.request.height,
            fps = self.request.frame_rate.fps(),
            sink = self.sink.name(),
            bridge = ?self.options.bridge,
            started = %self.clock.started_wall(),
            "Export session started"
        );
        Ok(())
    }

    /// Ask the sink for demand. The worker is the sink's scheduler.
    pub fn wait_for_demand(&mut self, timeout: Duration) -> Demand {
        self.sink.wait_for_demand(timeout)
    }

    /// Block until the pool has a free buffer or `timeout` elapses.
    pub fn wait_for_buffer(&self, timeout: Duration) -> bool {
        self.pool
            .as_ref()
            .map_or(false, |pool| pool.wait_for_release(timeout))
    }

    /// Produce frames for as long as the sink keeps asking.
    pub fn on_ready(&mut self) -> ProductionStep {
        if self.status != SessionStatus::Active {
            return ProductionStep::Ignored;
        }

        loop {
            if self.cancel.is_cancelled() {
                return self.fail(ExportError::Cancelled);
            }

            if let Some(err) = self.sink.failure() {
                return self.fail(ExportError::EncoderFailure(err));
            }

            if self.frame_count >= self.total_frames {
                self.sink.mark_input_finished();
                self.status = SessionStatus::Draining;
                self.reporter.stage(ExportStage::Finalizing);
                tracing::info!(frames = self.frame_count, "All frames submitted; draining encoder");
                return ProductionStep::InputFinished;
            }

            let pts = PresentationTime::for_frame(self.frame_count, self.request.frame_rate);

            let (Some(pool), Some(bridge)) = (self.pool.as_ref(), self.bridge.as_mut()) else {
                return self.fail(ExportError::Internal("session active without a pool".into()));
            };

            let mut buffer = match pool.acquire() {
                Ok(buffer) => buffer,
                Err(PoolError::Exhausted) => {
                    tracing::debug!(frame = self.frame_count, "Frame buffer pool exhausted; waiting");
                    return ProductionStep::PoolExhausted;
                }
                Err(e) => return self.fail(ExportError::PoolUnavailable(e.to_string())),
            };

            let texture = match bridge.create_texture(&buffer) {
                Ok(texture) => texture,
                Err(e) => return self.fail(ExportError::TextureCreationFailure(e.to_string())),
            };

            let audio_level = self
                .request
                .audio
                .as_ref()
                .map(|audio| audio.level_at(pts.as_secs_f64()))
                .filter(|level| level.is_finite())
                .map_or(0.0, |level| level.clamp(0.0, 1.0));

            let (width, height) = (self.request.width, self.request.height);
            let params = FrameParams::new(pts.as_secs_f32(), audio_level, width, height);
            let renderer = &self.renderer;
            let rendered = bridge.render_into(&texture, &mut buffer, &mut |surface| {
                check_surface(surface, width, height)?;
                let mut engine = renderer
                    .lock()
                    .map_err(|_| RenderError::Backend("renderer lock poisoned".into()))?;
                engine.render(surface, &params)
            });
            if let Err(e) = rendered {
                return self.fail(ExportError::RenderFailure(e.to_string()));
            }

            if let Err(e) = self.sink.append(buffer, pts) {
                return self.fail(ExportError::SinkAppendFailure(e));
            }

            self.frame_count += 1;
            let progress = progress_fraction(self.frame_count, self.total_frames);
            self.reporter.progress(ExportProgress {
                progress,
                frames_rendered: self.frame_count,
                total_frames: self.total_frames,
                eta_secs: self.clock.eta_secs(progress),
                stage: ExportStage::Rendering,
            });

            let interval = self.options.cache_flush_interval;
            if interval > 0 && self.frame_count % interval == 0 {
                bridge.flush();
                tracing::info!(
                    frame = self.frame_count,
                    total = self.total_frames,
                    "Encoded frame {}/{}",
                    self.frame_count,
                    self.total_frames
                );
            }

            if !self.sink.is_ready_for_more() {
                return ProductionStep::Yielded;
            }
        }
    }

    /// Finalize the output after draining and report completion.
    pub fn finalize(&mut self) -> SessionStatus {
        if self.status != SessionStatus::Draining {
            return self.status;
        }

        let (tx, rx) = mpsc::channel();
        self.sink.finalize(Box::new(move |result| {
            let _ = tx.send(result);
        }));

        match rx.recv() {
            Ok(Ok(())) => {
                self.status = SessionStatus::Finished;
                let summary = self.summary();
                tracing::info!(
                    destination = %summary.destination.display(),
                    frames = summary.frames_written,
                    elapsed_secs = summary.elapsed_secs,
                    "Export finished"
                );
                self.reporter.stage(ExportStage::Complete);
                self.reporter.complete(Ok(summary));
            }
            Ok(Err(e)) => {
                self.fail(ExportError::SinkFinalizeFailure(e));
            }
            Err(_) => {
                self.fail(ExportError::SinkFinalizeFailure(SinkError::Finalize(
                    "sink dropped its finalize callback".into(),
                )));
            }
        }
        self.status
    }

    /// End the session with `error` unless it already ended.
    pub fn fail_with(&mut self, error: ExportError) -> ProductionStep {
        if self.status.is_terminal() {
            return ProductionStep::Ignored;
        }
        self.fail(error)
    }

    fn summary(&self) -> ExportSummary {
        ExportSummary {
            destination: self.request.destination.clone(),
            frames_written: self.frame_count,
            duration_secs: PresentationTime::for_frame(self.frame_count, self.request.frame_rate)
                .as_secs_f64(),
            elapsed_secs: self.clock.elapsed_secs(),
            pool: self.pool.as_ref().map(|p| p.stats()).unwrap_or_default(),
            textures: self.bridge.as_ref().map(|b| b.stats()).unwrap_or_default(),
        }
    }

    fn fail_startup(&mut self, error: ExportError) -> ExportError {
        self.fail(error.clone());
        error
    }

    fn fail(&mut self, error: ExportError) -> ProductionStep {
        match &error {
            ExportError::Cancelled => {
                tracing::warn!(frame = self.frame_count, "Export cancelled")
            }
            e => tracing::error!(
                frame = self.frame_count,
                total = self.total_frames,
                error = %e,
                "Export failed"
            ),
        }
        self.status = SessionStatus::Failed;
        self.sink.abort();
        self.reporter.stage(ExportStage::Failed);
        self.reporter.complete(Err(error));
        ProductionStep::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExportErrorKind;
    use crate::sink::{MemorySink, MemorySinkOptions, MemorySinkTap};
    use shadercast_render::{CompileError, RenderSurface};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::Receiver;

    /// Paints each frame with its timestamp and counts renders.
    struct StampRenderer {
        renders: Arc<AtomicUsize>,
    }

    impl RenderEngine for StampRenderer {
        fn name(&self) -> &'static str {
            "stamp"
        }

        fn compile(&mut self, _source: &str) -> Result<(), CompileError> {
            Ok(())
        }

        fn is_compiled(&self) -> bool {
            true
        }

        fn render(
            &mut self,
            surface: &mut RenderSurface<'_>,
            params: &FrameParams,
        ) -> Result<(), RenderError> {
            self.renders.fetch_add(1, Ordering::SeqCst);
            let v = (params.time * 60.0).round() as u8;
            surface.clear([v, v, v, 255]);
            Ok(())
        }
    }

    struct Fixture {
        session: ExportSession,
        tap: MemorySinkTap,
        events: Receiver<SessionEvent>,
        renders: Arc<AtomicUsize>,
    }

    fn fixture(duration: f64, sink: MemorySinkOptions, options: SessionOptions) -> Fixture {
        let renders = Arc::new(AtomicUsize::new(0));
        let renderer: SharedRenderer = Arc::new(Mutex::new(Box::new(StampRenderer {
            renders: renders.clone(),
        })));
        let sink = MemorySink::new(sink);
        let tap = sink.tap();
        let (tx, rx) = mpsc::channel();
        let session = ExportSession::new(
            ExportRequest::new("session.mov", duration, 4, 4),
            renderer,
            Box::new(sink),
            options,
            tx,
            CancelToken::new(),
        );
        Fixture {
            session,
            tap,
            events: rx,
            renders,
        }
    }

    fn drive(session: &mut ExportSession) -> ProductionStep {
        loop {
            match session.wait_for_demand(Duration::from_millis(10)) {
                Demand::Ready | Demand::Failed => match session.on_ready() {
                    ProductionStep::Yielded | ProductionStep::PoolExhausted => continue,
                    step => return step,
                },
                Demand::Pending => continue,
            }
        }
    }

    fn completions(events: &Receiver<SessionEvent>) -> Vec<ExportResult> {
        events
            .try_iter()
            .filter_map(|e| match e {
                SessionEvent::Completed(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_signals_before_start_are_ignored() {
        let mut f = fixture(0.1, MemorySinkOptions::default(), SessionOptions::default());
        assert_eq!(f.session.on_ready(), ProductionStep::Ignored);
        assert_eq!(f.session.status(), SessionStatus::Idle);
    }

    #[test]
    fn test_demand_window_paces_production() {
        let mut f = fixture(
            0.1,
            MemorySinkOptions {
                demand_window: 2,
                ..Default::default()
            },
            SessionOptions::default(),
        );
        f.session.start().unwrap();
        assert_eq!(f.session.wait_for_demand(Duration::ZERO), Demand::Ready);
        assert_eq!(f.session.on_ready(), ProductionStep::Yielded);
        assert_eq!(f.session.frame_count(), 2);
        assert_eq!(f.tap.append_count(), 2);
    }

    #[test]
    fn test_full_run_finishes_once() {
        let mut f = fixture(0.1, MemorySinkOptions::default(), SessionOptions::default());
        f.session.start().unwrap();
        assert_eq!(drive(&mut f.session), ProductionStep::InputFinished);
        assert_eq!(f.session.status(), SessionStatus::Draining);
        assert!(f.tap.is_input_finished());

        assert_eq!(f.session.finalize(), SessionStatus::Finished);
        assert_eq!(f.session.on_ready(), ProductionStep::Ignored);
        assert_eq!(f.session.finalize(), SessionStatus::Finished);

        let done = completions(&f.events);
        assert_eq!(done.len(), 1);
        let summary = done[0].as_ref().unwrap();
        assert_eq!(summary.frames_written, 6);
        assert_eq!(summary.duration_secs, 0.1);
        assert_eq!(f.renders.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_frames_carry_exact_timestamps_and_pixels() {
        let mut f = fixture(0.1, MemorySinkOptions::default(), SessionOptions::default());
        f.session.start().unwrap();
        drive(&mut f.session);
        let frames = f.tap.frames();
        for (k, frame) in frames.iter().enumerate() {
            assert_eq!(frame.pts.value(), k as u64);
            assert_eq!(frame.pts.timescale(), 60);
        }
        // Each frame is painted with its own index.
        let distinct: std::collections::HashSet<u64> = frames.iter().map(|f| f.checksum).collect();
        assert_eq!(distinct.len(), frames.len());
    }

    #[test]
    fn test_texture_cache_is_flushed_on_interval() {
        let mut f = fixture(
            0.2,
            MemorySinkOptions::default(),
            SessionOptions {
                cache_flush_interval: 4,
                ..Default::default()
            },
        );
        f.session.start().unwrap();
        drive(&mut f.session);
        f.session.finalize();
        let summary = completions(&f.events).remove(0).unwrap();
        assert_eq!(summary.frames_written, 12);
        assert_eq!(summary.textures.flushes, 3);
        assert_eq!(summary.textures.created, 12);
    }

    #[test]
    fn test_pool_exhaustion_is_transient() {
        let mut f = fixture(
            0.1,
            MemorySinkOptions {
                hold_buffers: 1,
                demand_window: 4,
                ..Default::default()
            },
            SessionOptions {
                max_buffers: 1,
                ..Default::default()
            },
        );
        f.session.start().unwrap();
        assert_eq!(f.session.wait_for_demand(Duration::ZERO), Demand::Ready);
        assert_eq!(f.session.on_ready(), ProductionStep::PoolExhausted);
        assert_eq!(f.session.status(), SessionStatus::Active);
        assert_eq!(drive(&mut f.session), ProductionStep::InputFinished);
        f.session.finalize();

        let summary = completions(&f.events).remove(0).unwrap();
        assert_eq!(summary.frames_written, 6);
        assert!(summary.pool.exhausted_events >= 1);
        assert_eq!(summary.pool.allocated, 1);
    }

    #[test]
    fn test_sink_start_failure_is_reported() {
        let mut f = fixture(
            0.1,
            MemorySinkOptions {
                fail_start: true,
                ..Default::default()
            },
            SessionOptions::default(),
        );
        let err = f.session.start().unwrap_err();
        assert_eq!(err.kind(), ExportErrorKind::SinkSetupFailure);
        assert_eq!(f.session.status(), SessionStatus::Failed);
        assert_eq!(f.session.on_ready(), ProductionStep::Ignored);
        let done = completions(&f.events);
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].as_ref().unwrap_err().kind(), ExportErrorKind::SinkSetupFailure);
    }

    #[test]
    fn test_zero_capacity_pool_is_unavailable() {
        let mut f = fixture(
            0.1,
            MemorySinkOptions::default(),
            SessionOptions {
                max_buffers: 0,
                ..Default::default()
            },
        );
        assert_eq!(
            f.session.start().unwrap_err().kind(),
            ExportErrorKind::PoolUnavailable
        );
        assert_eq!(f.tap.config(), None);
    }

    #[test]
    fn test_fail_with_after_finish_is_ignored() {
        let mut f = fixture(0.05, MemorySinkOptions::default(), SessionOptions::default());
        f.session.start().unwrap();
        drive(&mut f.session);
        f.session.finalize();
        assert_eq!(f.session.fail_with(ExportError::Cancelled), ProductionStep::Ignored);
        assert_eq!(completions(&f.events).len(), 1);
    }
}
