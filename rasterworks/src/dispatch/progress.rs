//! Progress notifications from workers back to the task owner.
//!
//! The worker side holds a [`ProgressBridge`]. Notifications travel over an
//! unbounded channel so `emit` never blocks, and are handed to the caller's
//! [`ProgressSink`] by the task handle on the owning side. Without a sink no
//! channel exists and `emit` only updates counters.

use crate::error::CallbackError;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One progress report.
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressNotification {
    /// Completion fraction in `0.0..=1.0`, non-decreasing per task.
    pub fraction: f64,
    pub message: Option<String>,
}

/// Caller-supplied progress callback.
///
/// Returning an error aborts the task; the error becomes the task's failure.
pub type ProgressSink =
    Box<dyn FnMut(&ProgressNotification) -> Result<(), CallbackError> + Send + 'static>;

/// Builds a [`ProgressSink`] from a closure.
pub fn progress_sink<F>(sink: F) -> ProgressSink
where
    F: FnMut(&ProgressNotification) -> Result<(), CallbackError> + Send + 'static,
{
    Box::new(sink)
}

/// Worker-side end of a task's progress channel.
#[derive(Debug)]
pub struct ProgressBridge {
    tx: Option<mpsc::UnboundedSender<ProgressNotification>>,
    abort: CancellationToken,
    last: Option<f64>,
    emitted: u64,
    dropped: u64,
}

impl ProgressBridge {
    pub(crate) fn new(
        tx: Option<mpsc::UnboundedSender<ProgressNotification>>,
        abort: CancellationToken,
    ) -> Self {
        Self {
            tx,
            abort,
            last: None,
            emitted: 0,
            dropped: 0,
        }
    }

    /// A bridge with no owner attached.
    pub fn detached() -> Self {
        Self::new(None, CancellationToken::new())
    }

    /// Queues a notification for the owner.
    ///
    /// Values below the last accepted fraction (and NaN) are dropped. Returns
    /// `false` once the owner asked the task to stop.
    pub fn emit(&mut self, fraction: f64, message: Option<&str>) -> bool {
        if self.abort.is_cancelled() {
            return false;
        }
        if fraction.is_nan() || self.last.is_some_and(|last| fraction < last) {
            self.dropped += 1;
            return true;
        }
        let fraction = fraction.clamp(0.0, 1.0);
        self.last = Some(fraction);
        self.emitted += 1;
        if let Some(tx) = &self.tx {
            // The owner may have stopped listening; the task carries on.
            let _ = tx.send(ProgressNotification {
                fraction,
                message: message.map(str::to_owned),
            });
        }
        true
    }

    /// Returns true once the owner asked the task to stop.
    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Notifications accepted so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Notifications dropped for being out of order.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
