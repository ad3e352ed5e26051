//! In-memory sink for tests and debugging.
//!
//! Records every appended frame's timestamp, buffer id and a checksum of
//! its pixels, and can be scripted to misbehave.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use shadercast_common::clock::PresentationTime;

use super::{Demand, EncoderSink, FinalizeCallback, SinkConfig, SinkError};
use crate::pool::FrameBuffer;

#[derive(Debug, Clone)]
pub struct MemorySinkOptions {
    /// Frames accepted per demand signal.
    pub demand_window: usize,
    /// Frames whose buffers the sink keeps until the next demand signal.
    pub hold_buffers: usize,
    /// Reject the append of this frame index.
    pub fail_append_at: Option<u64>,
    /// Fail on its own once this many frames were appended.
    pub fail_after: Option<u64>,
    /// Reject `start`.
    pub fail_start: bool,
    /// Report failure from `finalize`.
    pub fail_finalize: bool,
    /// Never signal demand.
    pub never_ready: bool,
    /// Delay before the finalize callback fires.
    pub finalize_delay: Duration,
}

impl Default for MemorySinkOptions {
    fn default() -> Self {
        Self {
            demand_window: 4,
            hold_buffers: 0,
            fail_append_at: None,
            fail_after: None,
            fail_start: false,
            fail_finalize: false,
            never_ready: false,
            finalize_delay: Duration::ZERO,
        }
    }
}

/// One appended frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedFrame {
    pub pts: PresentationTime,
    pub buffer_id: u64,
    pub checksum: u64,
}

#[derive(Debug, Default)]
struct TapState {
    config: Option<SinkConfig>,
    frames: Vec<RecordedFrame>,
    demand_signals: u64,
    input_finished: bool,
    finalized: bool,
    aborted: bool,
}

/// Shared view into a [`MemorySink`] that outlives the export.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkTap {
    state: Arc<Mutex<TapState>>,
}

impl MemorySinkTap {
    fn lock(&self) -> MutexGuard<'_, TapState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> Option<SinkConfig> {
        self.lock().config.clone()
    }

    pub fn frames(&self) -> Vec<RecordedFrame> {
        self.lock().frames.clone()
    }

    pub fn append_count(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn timestamps(&self) -> Vec<PresentationTime> {
        self.lock().frames.iter().map(|f| f.pts).collect()
    }

    pub fn demand_signals(&self) -> u64 {
        self.lock().demand_signals
    }

    pub fn is_input_finished(&self) -> bool {
        self.lock().input_finished
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    pub fn is_aborted(&self) -> bool {
        self.lock().aborted
    }
}

#[derive(Debug)]
pub struct MemorySink {
    options: MemorySinkOptions,
    tap: MemorySinkTap,
    started: bool,
    appended: u64,
    in_window: usize,
    held: Vec<FrameBuffer>,
    failure: Option<SinkError>,
}

impl MemorySink {
    pub fn new(options: MemorySinkOptions) -> Self {
        Self {
            options,
            tap: MemorySinkTap::default(),
            started: false,
            appended: 0,
            in_window: 0,
            held: Vec::new(),
            failure: None,
        }
    }

    pub fn tap(&self) -> MemorySinkTap {
        self.tap.clone()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new(MemorySinkOptions::default())
    }
}

impl EncoderSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn start(&mut self, config: &SinkConfig) -> Result<(), SinkError> {
        if self.options.fail_start {
            return Err(SinkError::UnsupportedFormat("memory sink scripted to fail".into()));
        }
        self.tap.lock().config = Some(config.clone());
        self.started = true;
        Ok(())
    }

    fn wait_for_demand(&mut self, timeout: Duration) -> Demand {
        if self.failure.is_some() {
            return Demand::Failed;
        }
        if self.options.never_ready {
            std::thread::sleep(timeout);
            return Demand::Pending;
        }
        // The "encoder" consumed everything it was holding.
        self.held.clear();
        self.in_window = 0;
        self.tap.lock().demand_signals += 1;
        Demand::Ready
    }

    fn is_ready_for_more(&self) -> bool {
        self.failure.is_none()
            && !self.options.never_ready
            && self.in_window < self.options.demand_window
    }

    fn failure(&self) -> Option<SinkError> {
        self.failure.clone()
    }

    fn append(&mut self, buffer: FrameBuffer, pts: PresentationTime) -> Result<(), SinkError> {
        if !self.started {
            return Err(SinkError::NotStarted);
        }
        if self.options.fail_append_at == Some(self.appended) {
            return Err(SinkError::Write(format!("scripted failure at frame {}", self.appended)));
        }

        let mut state = self.tap.lock();
        if let Some(previous) = state.frames.last().map(|f| f.pts) {
            if pts <= previous {
                return Err(SinkError::OutOfOrder { previous, got: pts });
            }
        }
        state.frames.push(RecordedFrame {
            pts,
            buffer_id: buffer.id(),
            checksum: checksum(buffer.data()),
        });
        drop(state);

        self.appended += 1;
        self.in_window += 1;
        if self.held.len() < self.options.hold_buffers {
            self.held.push(buffer);
        }
        if self.options.fail_after == Some(self.appended) {
            self.failure = Some(SinkError::Encoder(format!(
                "scripted failure after {} frames",
                self.appended
            )));
        }
        Ok(())
    }

    fn mark_input_finished(&mut self) {
        self.tap.lock().input_finished = true;
    }

    fn finalize(&mut self, done: FinalizeCallback) {
        self.held.clear();
        let tap = self.tap.clone();
        let fail = self.options.fail_finalize;
        let delay = self.options.finalize_delay;
        std::thread::spawn(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            if fail {
                done(Err(SinkError::Finalize("scripted finalize failure".into())));
            } else {
                tap.lock().finalized = true;
                done(Ok(()));
            }
        });
    }

    fn abort(&mut self) {
        self.held.clear();
        self.tap.lock().aborted = true;
    }
}

/// FNV-1a over the pixel bytes.
fn checksum(data: &[u8]) -> u64 {
    data.iter().fold(0xcbf2_9ce4_8422_2325u64, |hash, &byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}
