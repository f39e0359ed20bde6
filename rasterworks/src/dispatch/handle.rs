//! Caller-side handle to a dispatched task.
//!
//! A [`TaskHandle`] is returned by every asynchronous operation. Awaiting it
//! delivers queued progress notifications to the caller's sink, in order, and
//! then yields the task's single terminal result.
//!
//! # Example
//!
//! ```ignore
//! let handle = toolkit.info_async(&dataset, &["-json"])?;
//! println!("{} is {}", handle.id(), handle.state());
//!
//! // Await from async code...
//! let report = handle.await?;
//! // ...or block the current thread.
//! let report = toolkit.info_async(&dataset, &[])?.wait_blocking()?;
//! ```

use super::progress::{ProgressNotification, ProgressSink};
use super::task::{TaskId, TaskRecord, TaskState};
use crate::error::OperationError;
use crate::native::OperationKind;
use futures::future::BoxFuture;
use std::future::IntoFuture;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

/// Terminal event of a task, as sent by the worker.
#[derive(Debug)]
pub(crate) enum Outcome<T> {
    Completed(T),
    Failed(OperationError),
    Cancelled(OperationError),
}

impl<T> Outcome<T> {
    pub fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled(_) => TaskState::Cancelled,
        }
    }
}

/// Worker-side sender of a task's terminal event.
///
/// If the owner is gone by the time the outcome is ready, the worker records
/// the terminal state itself. If the job is dropped without ever running
/// (dispatcher shut down), the task ends `Cancelled`.
pub(crate) struct Completion<T> {
    tx: Option<oneshot::Sender<Outcome<T>>>,
    record: Arc<TaskRecord>,
}

impl<T> Completion<T> {
    pub fn new(tx: oneshot::Sender<Outcome<T>>, record: Arc<TaskRecord>) -> Self {
        Self {
            tx: Some(tx),
            record,
        }
    }

    pub fn record(&self) -> &Arc<TaskRecord> {
        &self.record
    }

    pub fn send(mut self, outcome: Outcome<T>) {
        if let Some(tx) = self.tx.take() {
            if let Err(outcome) = tx.send(outcome) {
                self.record.finish(outcome.state());
            }
        }
    }
}

impl<T> Drop for Completion<T> {
    fn drop(&mut self) {
        if self.tx.take().is_some() {
            self.record.finish(TaskState::Cancelled);
        }
    }
}

/// Handle to a submitted task.
///
/// Dropping the handle does not cancel the task; it runs to completion and
/// its resources are released as usual.
pub struct TaskHandle<T> {
    record: Arc<TaskRecord>,
    state_rx: watch::Receiver<TaskState>,
    outcome: oneshot::Receiver<Outcome<T>>,
    progress: Option<(mpsc::UnboundedReceiver<ProgressNotification>, ProgressSink)>,
    abort: CancellationToken,
    settled: bool,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(
        record: Arc<TaskRecord>,
        state_rx: watch::Receiver<TaskState>,
        outcome: oneshot::Receiver<Outcome<T>>,
        progress: Option<(mpsc::UnboundedReceiver<ProgressNotification>, ProgressSink)>,
        abort: CancellationToken,
    ) -> Self {
        Self {
            record,
            state_rx,
            outcome,
            progress,
            abort,
            settled: false,
        }
    }

    /// Returns the task's unique identifier.
    pub fn id(&self) -> TaskId {
        self.record.id()
    }

    /// Returns the operation kind.
    pub fn kind(&self) -> OperationKind {
        self.record.kind()
    }

    /// Returns the most recent task state without waiting.
    ///
    /// The terminal state is recorded when [`wait`](Self::wait) consumes the
    /// outcome, or by the worker if the handle was already dropped.
    pub fn state(&self) -> TaskState {
        *self.state_rx.borrow()
    }

    /// Waits for the terminal event, delivering progress along the way.
    ///
    /// A failing progress sink is authoritative: the task is asked to stop,
    /// no further notifications are delivered, and the result is the sink's
    /// error even if the native call later succeeds.
    pub async fn wait(mut self) -> Result<T, OperationError> {
        let mut progress = self.progress.take();
        let mut sink_error: Option<OperationError> = None;

        let received = loop {
            let Some((rx, _)) = progress.as_mut() else {
                break (&mut self.outcome).await;
            };
            tokio::select! {
                biased;
                note = rx.recv() => match note {
                    Some(note) => {
                        if let Err(err) = deliver(&mut progress, &note) {
                            self.abort.cancel();
                            sink_error = Some(err);
                        }
                    }
                    None => progress = None,
                },
                outcome = &mut self.outcome => break outcome,
            }
        };

        // Notifications queued before the terminal event come first.
        while let Some(note) = progress
            .as_mut()
            .and_then(|(rx, _)| rx.try_recv().ok())
        {
            if let Err(err) = deliver(&mut progress, &note) {
                self.abort.cancel();
                sink_error = Some(err);
            }
        }

        self.settled = true;
        let outcome = received.unwrap_or_else(|_| {
            Outcome::Cancelled(OperationError::native(
                "task was dropped before it could run",
            ))
        });

        if let Some(err) = sink_error {
            self.record.finish(TaskState::Failed);
            return Err(err);
        }
        self.record.finish(outcome.state());
        match outcome {
            Outcome::Completed(value) => Ok(value),
            Outcome::Failed(err) | Outcome::Cancelled(err) => Err(err),
        }
    }

    /// Blocks the current thread until the task finishes.
    ///
    /// Must not be called from a dispatcher worker: the worker would wait on
    /// a queue it is supposed to drain.
    pub fn wait_blocking(self) -> Result<T, OperationError> {
        futures::executor::block_on(self.wait())
    }
}

/// Hands one notification to the sink. On failure the sink is dropped so
/// nothing else is delivered.
fn deliver(
    progress: &mut Option<(mpsc::UnboundedReceiver<ProgressNotification>, ProgressSink)>,
    note: &ProgressNotification,
) -> Result<(), OperationError> {
    let Some((_, sink)) = progress.as_mut() else {
        return Ok(());
    };
    let result = match catch_unwind(AssertUnwindSafe(|| sink(note))) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(OperationError::callback(err.as_ref())),
        Err(panic) => Err(OperationError::callback_panic(panic.as_ref())),
    };
    if result.is_err() {
        *progress = None;
    }
    result
}

impl<T> Drop for TaskHandle<T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        // Either the outcome is already here and we record it, or the worker
        // will fail to send it and record it itself.
        self.outcome.close();
        if let Ok(outcome) = self.outcome.try_recv() {
            self.record.finish(outcome.state());
        }
    }
}

impl<T: Send + 'static> IntoFuture for TaskHandle<T> {
    type Output = Result<T, OperationError>;
    type IntoFuture = BoxFuture<'static, Result<T, OperationError>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

impl<T> std::fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("state", &self.state())
            .finish()
    }
}
