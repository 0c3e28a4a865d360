//! Progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A progress notification emitted by long-running operations.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// One frame of the stack has been processed.
    Detection {
        completed: usize,
        total: usize,
        frame: usize,
        n_peaks: usize,
    },
    /// One pair of adjacent time points has been linked.
    Tracking {
        percent: f64,
        t_in: usize,
        t_out: usize,
    },
}

/// Receives progress events. Detection may call it from worker threads.
pub trait ProgressSink: Send + Sync {
    fn report(&self, event: &ProgressEvent);
}

/// Sink forwarding progress to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Detection {
                completed,
                total,
                frame,
                n_peaks,
            } => tracing::info!(
                "{}/{} - {} peaks detected on stack n°{}",
                completed,
                total,
                n_peaks,
                frame
            ),
            ProgressEvent::Tracking {
                percent,
                t_in,
                t_out,
            } => tracing::info!(percent = format!("{:.1}", percent), t_in, t_out, "tracking"),
        }
    }
}

/// Shared flag used to abandon in-flight work.
///
/// Clones observe the same flag, so a token handed to a worker pool can be
/// cancelled from any other thread.
#[derive(Debug, Default, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once the token has been triggered.
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_cancelled() {
            Err(crate::error::TrackingError::Cancelled)
        } else {
            Ok(())
        }
    }
}
