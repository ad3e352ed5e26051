//! The export worker: schedules the sink and drives the session.

use std::time::{Duration, Instant};

use crate::error::ExportError;
use crate::session::{ExportSession, ProductionStep, SessionStatus};
use crate::sink::Demand;

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// Longest single wait for demand. Bounds cancellation latency.
    pub demand_slice: Duration,
    /// Fail the export once no frame was produced for this long.
    pub demand_timeout: Option<Duration>,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            demand_slice: Duration::from_millis(50),
            demand_timeout: Some(Duration::from_secs(30)),
        }
    }
}

/// Run `session` to a terminal state on the current thread.
pub fn run(mut session: ExportSession, options: WorkerOptions) -> SessionStatus {
    if session.start().is_err() {
        return session.status();
    }

    let mut last_progress = Instant::now();
    let mut last_count = session.frame_count();

    loop {
        if session.is_cancelled() {
            session.fail_with(ExportError::Cancelled);
            return session.status();
        }

        let step = match session.wait_for_demand(options.demand_slice) {
            Demand::Ready | Demand::Failed => session.on_ready(),
            Demand::Pending => ProductionStep::Yielded,
        };

        match step {
            ProductionStep::Yielded => {}
            ProductionStep::PoolExhausted => {
                session.wait_for_buffer(options.demand_slice);
            }
            ProductionStep::InputFinished => return session.finalize(),
            ProductionStep::Failed | ProductionStep::Ignored => return session.status(),
        }

        if session.frame_count() != last_count {
            last_count = session.frame_count();
            last_progress = Instant::now();
        } else if let Some(limit) = options.demand_timeout {
            let waited = last_progress.elapsed();
            if waited >= limit {
                tracing::warn!(
                    frame = last_count,
                    waited_secs = waited.as_secs_f64(),
                    "Encoder stopped requesting frames"
                );
                session.fail_with(ExportError::Stalled {
                    waited_secs: waited.as_secs_f64(),
                });
                return session.status();
            }
        }
    }
}
