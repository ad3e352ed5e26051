//! Encoder sink backed by the system `ffmpeg` binary.
//!
//! Raw BGRA frames are streamed to ffmpeg's stdin by a writer thread fed
//! through a bounded queue. The queue depth is the sink's demand: while it
//! is full the sink reports no readiness, which in turn stops the session
//! from rendering ahead of the encoder.

use std::io::{Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use shadercast_common::clock::PresentationTime;
use shadercast_common::config::ExportDefaults;
use shadercast_render::PixelFormat;

use super::{Demand, EncoderSink, FinalizeCallback, SinkConfig, SinkError};
use crate::pool::FrameBuffer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegOptions {
    /// Executable name or path.
    pub binary: String,
    /// Value for `-c:v`.
    pub video_codec: String,
    /// Frames queued for the writer thread before the sink stops asking for more.
    pub queue_depth: usize,
}

impl Default for FfmpegOptions {
    fn default() -> Self {
        Self::from_defaults(&ExportDefaults::default())
    }
}

impl FfmpegOptions {
    pub fn from_defaults(defaults: &ExportDefaults) -> Self {
        Self {
            binary: defaults.ffmpeg_binary.clone(),
            video_codec: defaults.video_codec.clone(),
            queue_depth: defaults.encoder_queue_depth.max(1),
        }
    }
}

/// Whether `binary -version` runs successfully.
pub fn is_ffmpeg_available(binary: &str) -> bool {
    Command::new(binary)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Command-line arguments for encoding `config`.
pub fn ffmpeg_args(options: &FfmpegOptions, config: &SinkConfig) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        config.pixel_format.ffmpeg_name().to_string(),
        "-s".to_string(),
        format!("{}x{}", config.width, config.height),
        "-r".to_string(),
        config.frame_rate.fps().to_string(),
        "-i".to_string(),
        "pipe:0".to_string(),
        "-an".to_string(),
        "-c:v".to_string(),
        options.video_codec.clone(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
    ];

    let extension = config
        .destination
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    if matches!(extension.as_deref(), Some("mp4" | "mov" | "m4v")) {
        args.push("-movflags".to_string());
        args.push("+faststart".to_string());
    }

    args.push(config.destination.display().to_string());
    args
}

#[derive(Debug, Default)]
struct WriterState {
    queued: usize,
    written: u64,
    failure: Option<SinkError>,
}

#[derive(Debug, Default)]
struct WriterShared {
    state: Mutex<WriterState>,
    changed: Condvar,
}

impl WriterShared {
    fn lock(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fail(&self, error: SinkError) {
        let mut state = self.lock();
        if state.failure.is_none() {
            tracing::warn!(error = %error, "ffmpeg sink failed");
            state.failure = Some(error);
        }
        drop(state);
        self.changed.notify_all();
    }
}

struct Running {
    child: Child,
    writer: JoinHandle<()>,
    stderr: JoinHandle<String>,
}

/// Streams frames into an `ffmpeg` child process.
pub struct FfmpegSink {
    options: FfmpegOptions,
    shared: Arc<WriterShared>,
    frames_tx: Option<SyncSender<FrameBuffer>>,
    running: Option<Running>,
    last_pts: Option<PresentationTime>,
}

impl FfmpegSink {
    pub fn new(options: FfmpegOptions) -> Self {
        Self {
            options,
            shared: Arc::new(WriterShared::default()),
            frames_tx: None,
            running: None,
            last_pts: None,
        }
    }

    /// Frames fully written to ffmpeg's stdin.
    pub fn frames_written(&self) -> u64 {
        self.shared.lock().written
    }

    fn check_exited(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        if self.frames_tx.is_none() {
            // Input finished; exiting is expected.
            return;
        }
        if let Ok(Some(status)) = running.child.try_wait() {
            self.shared.fail(SinkError::Encoder(format!(
                "ffmpeg exited early with {status}"
            )));
        }
    }
}

impl EncoderSink for FfmpegSink {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn start(&mut self, config: &SinkConfig) -> Result<(), SinkError> {
        if self.running.is_some() {
            return Err(SinkError::Launch("sink already started".into()));
        }
        if config.pixel_format != PixelFormat::Bgra8 {
            return Err(SinkError::UnsupportedFormat(format!("{:?}", config.pixel_format)));
        }
        if config.width % 2 != 0 || config.height % 2 != 0 {
            return Err(SinkError::UnsupportedFormat(format!(
                "{}x{}: yuv420p output needs even dimensions",
                config.width, config.height
            )));
        }
        ensure_writable(&config.destination)?;

        let args = ffmpeg_args(&self.options, config);
        tracing::debug!(binary = %self.options.binary, ?args, "Spawning ffmpeg");

        let mut child = Command::new(&self.options.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SinkError::Launch(format!("{}: {e}", self.options.binary)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SinkError::Launch("failed to capture ffmpeg stdin".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SinkError::Launch("failed to capture ffmpeg stderr".into()))?;

        // Drain stderr concurrently so ffmpeg never blocks on a full pipe.
        let stderr_task = std::thread::Builder::new()
            .name("shadercast-ffmpeg-stderr".into())
            .spawn(move || {
                let mut output = String::new();
                let mut stderr = stderr;
                match stderr.read_to_string(&mut output) {
                    Ok(_) => output,
                    Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
                }
            })
            .map_err(|e| SinkError::Launch(format!("stderr thread: {e}")))?;

        let (tx, rx) = sync_channel(self.options.queue_depth);
        let shared = self.shared.clone();
        let writer = std::thread::Builder::new()
            .name("shadercast-ffmpeg-writer".into())
            .spawn(move || write_frames(stdin, rx, shared))
            .map_err(|e| SinkError::Launch(format!("writer thread: {e}")))?;

        tracing::info!(
            pid = child.id(),
            destination = %config.destination.display(),
            width = config.width,
            height = config.height,
            "ffmpeg process started"
        );

        self.frames_tx = Some(tx);
        self.running = Some(Running {
            child,
            writer,
            stderr: stderr_task,
        });
        self.last_pts = None;
        Ok(())
    }

    fn wait_for_demand(&mut self, timeout: Duration) -> Demand {
        self.check_exited();
        let depth = self.options.queue_depth;
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .changed
            .wait_timeout_while(state, timeout, |s| s.failure.is_none() && s.queued >= depth)
            .unwrap_or_else(|e| e.into_inner());

        if state.failure.is_some() {
            Demand::Failed
        } else if state.queued < depth && self.frames_tx.is_some() {
            Demand::Ready
        } else {
            Demand::Pending
        }
    }

    fn is_ready_for_more(&self) -> bool {
        let state = self.shared.lock();
        self.frames_tx.is_some() && state.failure.is_none() && state.queued < self.options.queue_depth
    }

    fn failure(&self) -> Option<SinkError> {
        self.shared.lock().failure.clone()
    }

    fn append(&mut self, buffer: FrameBuffer, pts: PresentationTime) -> Result<(), SinkError> {
        let tx = self.frames_tx.as_ref().ok_or(SinkError::NotStarted)?;
        if let Some(previous) = self.last_pts {
            if pts <= previous {
                return Err(SinkError::OutOfOrder { previous, got: pts });
            }
        }
        if let Some(err) = self.failure() {
            return Err(err);
        }

        self.shared.lock().queued += 1;
        if tx.send(buffer).is_err() {
            let err = self
                .failure()
                .unwrap_or_else(|| SinkError::Write("ffmpeg writer stopped".into()));
            return Err(err);
        }
        self.last_pts = Some(pts);
        Ok(())
    }

    fn mark_input_finished(&mut self) {
        // Closing the queue lets the writer drain and close stdin.
        self.frames_tx = None;
    }

    fn finalize(&mut self, done: FinalizeCallback) {
        self.frames_tx = None;
        let Some(running) = self.running.take() else {
            done(Err(SinkError::Finalize("ffmpeg was never started".into())));
            return;
        };
        let shared = self.shared.clone();

        let spawned = std::thread::Builder::new()
            .name("shadercast-ffmpeg-finalize".into())
            .spawn(move || done(finish_process(running, &shared)));
        if let Err(e) = spawned {
            // The closure (and with it `done`) was dropped with the failed spawn.
            tracing::error!(error = %e, "Failed to spawn ffmpeg finalize thread");
        }
    }

    fn abort(&mut self) {
        self.frames_tx = None;
        if let Some(mut running) = self.running.take() {
            tracing::warn!("Aborting ffmpeg");
            let _ = running.child.kill();
            let _ = running.child.wait();
            let _ = running.writer.join();
            let _ = running.stderr.join();
        }
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.abort();
    }
}

fn write_frames(mut stdin: ChildStdin, rx: Receiver<FrameBuffer>, shared: Arc<WriterShared>) {
    for buffer in rx {
        let result = stdin.write_all(buffer.data());
        // Recycle the memory before reporting.
        drop(buffer);

        if let Err(e) = result {
            shared.fail(SinkError::Write(e.to_string()));
            return;
        }
        let mut state = shared.lock();
        state.queued = state.queued.saturating_sub(1);
        state.written += 1;
        drop(state);
        shared.changed.notify_all();
    }

    if let Err(e) = stdin.flush() {
        shared.fail(SinkError::Write(e.to_string()));
    }
}

fn finish_process(mut running: Running, shared: &WriterShared) -> Result<(), SinkError> {
    if running.writer.join().is_err() {
        return Err(SinkError::Finalize("ffmpeg writer thread panicked".into()));
    }
    let status = running
        .child
        .wait()
        .map_err(|e| SinkError::Finalize(format!("failed to wait on ffmpeg: {e}")))?;
    let stderr = running
        .stderr
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

    if let Some(err) = shared.lock().failure.clone() {
        return Err(SinkError::Finalize(format!("{err}; {}", stderr.trim())));
    }
    if !status.success() {
        return Err(SinkError::Finalize(format!(
            "ffmpeg exited with {status}: {}",
            stderr.trim()
        )));
    }
    tracing::info!(frames = shared.lock().written, "ffmpeg finished");
    Ok(())
}

fn ensure_writable(destination: &Path) -> Result<(), SinkError> {
    let unwritable = |message: String| SinkError::DestinationUnwritable {
        path: destination.to_path_buf(),
        message,
    };
    if destination.is_dir() {
        return Err(unwritable("path is a directory".into()));
    }
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.is_dir() {
            return Err(unwritable(format!("{} does not exist", parent.display())));
        }
    }
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(destination)
        .map(drop)
        .map_err(|e| unwritable(e.to_string()))
}
