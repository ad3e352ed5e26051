//! Caller-side view of a running export.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::ExportError;
use crate::progress::{
    CompletionCallback, ExportCallbacks, ExportProgress, ExportResult, ExportStage, SessionEvent,
};

/// Cooperative cancellation flag shared with the export worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct HandleState {
    progress: ExportProgress,
    result: Option<ExportResult>,
}

#[derive(Debug)]
struct HandleShared {
    state: Mutex<HandleState>,
    done: Condvar,
}

impl HandleShared {
    fn lock(&self) -> MutexGuard<'_, HandleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Handle to one export.
///
/// Dropping the handle does not cancel the export; callbacks still fire.
#[derive(Debug)]
pub struct ExportHandle {
    shared: Arc<HandleShared>,
    cancel: CancelToken,
    dispatcher: Option<JoinHandle<()>>,
}

impl ExportHandle {
    /// Start the dispatcher that feeds `events` to `callbacks`.
    ///
    /// If the dispatcher cannot start, the callbacks come back with the error
    /// so the caller can still complete the export.
    pub(crate) fn spawn(
        total_frames: u64,
        events: Receiver<SessionEvent>,
        callbacks: ExportCallbacks,
        cancel: CancelToken,
    ) -> Result<Self, (ExportError, ExportCallbacks)> {
        Self::spawn_with(total_frames, events, callbacks, cancel, |run| {
            std::thread::Builder::new()
                .name("shadercast-dispatch".into())
                .spawn(run)
        })
    }

    fn spawn_with<S>(
        total_frames: u64,
        events: Receiver<SessionEvent>,
        callbacks: ExportCallbacks,
        cancel: CancelToken,
        spawner: S,
    ) -> Result<Self, (ExportError, ExportCallbacks)>
    where
        S: FnOnce(Box<dyn FnOnce() + Send + 'static>) -> std::io::Result<JoinHandle<()>>,
    {
        let shared = Arc::new(HandleShared {
            state: Mutex::new(HandleState {
                progress: ExportProgress::preparing(total_frames),
                result: None,
            }),
            done: Condvar::new(),
        });

        // Callbacks are handed over only once the thread exists.
        let (callbacks_tx, callbacks_rx) = mpsc::sync_channel::<ExportCallbacks>(1);
        let run = {
            let shared = shared.clone();
            move || {
                if let Ok(callbacks) = callbacks_rx.recv() {
                    dispatch(&shared, events, callbacks);
                }
            }
        };

        let dispatcher = match spawner(Box::new(run)) {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                let error = ExportError::Internal(format!("failed to spawn dispatcher: {e}"));
                return Err((error, callbacks));
            }
        };
        if let Err(mpsc::SendError(callbacks)) = callbacks_tx.send(callbacks) {
            let error = ExportError::Internal("dispatcher exited before it started".into());
            return Err((error, callbacks));
        }

        Ok(Self {
            shared,
            cancel,
            dispatcher: Some(dispatcher),
        })
    }

    /// Ask the export to stop. It completes with [`ExportError::Cancelled`]
    /// unless it already finished.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn is_done(&self) -> bool {
        self.shared.lock().result.is_some()
    }

    /// Latest progress snapshot.
    pub fn progress(&self) -> ExportProgress {
        self.shared.lock().progress
    }

    /// The result, once the export completed.
    pub fn result(&self) -> Option<ExportResult> {
        self.shared.lock().result.clone()
    }

    /// Block up to `timeout` for completion.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ExportResult> {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .done
            .wait_timeout_while(state, timeout, |s| s.result.is_none())
            .unwrap_or_else(|e| e.into_inner());
        state.result.clone()
    }

    /// Block until the export completes and every callback has returned.
    pub fn wait(mut self) -> ExportResult {
        if let Some(dispatcher) = self.dispatcher.take() {
            if dispatcher.join().is_err() {
                tracing::error!("Export callback panicked");
            }
        }
        self.shared
            .lock()
            .result
            .clone()
            .unwrap_or_else(|| Err(ExportError::Internal("export ended without a result".into())))
    }

    /// Await completion from async code.
    pub async fn join(self) -> ExportResult {
        tokio::task::spawn_blocking(move || self.wait())
            .await
            .unwrap_or_else(|e| Err(ExportError::Internal(format!("export join failed: {e}"))))
    }

    /// A handle for an export that failed before it started.
    pub(crate) fn rejected(error: ExportError, callbacks: ExportCallbacks) -> Self {
        let result = Err(error);
        if let Some(on_complete) = callbacks.on_complete {
            on_complete(&result);
        }
        let mut progress = ExportProgress::preparing(0);
        progress.stage = ExportStage::Failed;
        Self {
            shared: Arc::new(HandleShared {
                state: Mutex::new(HandleState {
                    progress,
                    result: Some(result),
                }),
                done: Condvar::new(),
            }),
            cancel: CancelToken::new(),
            dispatcher: None,
        }
    }
}

fn dispatch(shared: &HandleShared, events: Receiver<SessionEvent>, callbacks: ExportCallbacks) {
    let ExportCallbacks {
        mut on_progress,
        mut on_complete,
    } = callbacks;

    for event in events.iter() {
        match event {
            SessionEvent::Progress(progress) => {
                shared.lock().progress = progress;
                if let Some(f) = on_progress.as_mut() {
                    f(progress);
                }
            }
            SessionEvent::Stage(stage) => {
                shared.lock().progress.stage = stage;
            }
            SessionEvent::Completed(result) => {
                finish(shared, result, on_complete.take());
                return;
            }
        }
    }

    // The worker went away without completing (it panicked).
    finish(
        shared,
        Err(ExportError::Internal("export worker exited without completing".into())),
        on_complete.take(),
    );
}

fn finish(
    shared: &HandleShared,
    result: ExportResult,
    on_complete: Option<CompletionCallback>,
) {
    if let Some(f) = on_complete {
        f(&result);
    }
    let mut state = shared.lock();
    if result.is_err() {
        state.progress.stage = ExportStage::Failed;
    }
    state.result = Some(result);
    drop(state);
    shared.done.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn progress(k: u64) -> ExportProgress {
        ExportProgress {
            progress: k as f64 / 4.0,
            frames_rendered: k,
            total_frames: 4,
            eta_secs: 0.0,
            stage: ExportStage::Rendering,
        }
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_events_reach_callbacks_in_order() {
        let (tx, rx) = mpsc::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let callbacks = ExportCallbacks::new().on_progress({
            let seen = seen.clone();
            move |p| seen.lock().unwrap().push(p.frames_rendered)
        });
        let handle = ExportHandle::spawn(4, rx, callbacks, CancelToken::new()).unwrap();
        for k in 1..=4 {
            tx.send(SessionEvent::Progress(progress(k))).unwrap();
        }
        tx.send(SessionEvent::Completed(Err(ExportError::Cancelled))).unwrap();

        assert_eq!(handle.wait(), Err(ExportError::Cancelled));
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_dropped_worker_yields_internal_error() {
        let (tx, rx) = mpsc::channel::<SessionEvent>();
        let handle = ExportHandle::spawn(1, rx, ExportCallbacks::new(), CancelToken::new()).unwrap();
        drop(tx);
        let result = handle.wait_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result, Err(ExportError::Internal(_))));
        assert_eq!(handle.progress().stage, ExportStage::Failed);
    }

    #[test]
    fn test_rejected_handle_completes_immediately() {
        let fired = Arc::new(AtomicBool::new(false));
        let callbacks = ExportCallbacks::new().on_complete({
            let fired = fired.clone();
            move |r| {
                assert_eq!(r, &Err(ExportError::Busy));
                fired.store(true, Ordering::SeqCst);
            }
        });
        let handle = ExportHandle::rejected(ExportError::Busy, callbacks);
        assert!(fired.load(Ordering::SeqCst));
        assert!(handle.is_done());
        assert_eq!(handle.result(), Some(Err(ExportError::Busy)));
    }

    #[test]
    fn test_failed_dispatcher_spawn_returns_callbacks() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let callbacks = ExportCallbacks::new().on_complete({
            let fired = fired.clone();
            move |r| fired.lock().unwrap().push(r.clone())
        });
        let (_tx, rx) = mpsc::channel();
        let (error, callbacks) = ExportHandle::spawn_with(1, rx, callbacks, CancelToken::new(), |_| {
            Err(std::io::Error::other("no threads left"))
        })
        .unwrap_err();
        assert!(matches!(error, ExportError::Internal(_)));
        assert!(callbacks.on_complete.is_some());

        let handle = ExportHandle::rejected(error.clone(), callbacks);
        assert_eq!(handle.result(), Some(Err(error.clone())));
        assert_eq!(*fired.lock().unwrap(), vec![Err(error)]);
    }

    #[tokio::test]
    async fn test_join_from_async() {
        let (tx, rx) = mpsc::channel();
        let handle = ExportHandle::spawn(0, rx, ExportCallbacks::new(), CancelToken::new()).unwrap();
        tx.send(SessionEvent::Completed(Err(ExportError::Cancelled))).unwrap();
        assert_eq!(handle.join().await, Err(ExportError::Cancelled));
    }
}
