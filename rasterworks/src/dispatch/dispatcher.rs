//! The task dispatcher: a bounded queue feeding a fixed pool of workers.
//!
//! ```text
//!   submit ──► acquire tickets ──► bounded queue ──► worker N ──► outcome
//!                 │                                     │
//!                 └─ destroyed? reject synchronously    └─ tickets released
//! ```
//!
//! Every submission either fails before reaching the queue (and holds no
//! tickets afterwards) or produces exactly one terminal outcome. Tickets are
//! owned by the task's [`TaskContext`] and released when the worker drops it,
//! whether the work function returned, failed or panicked.

use super::config::DispatcherConfig;
use super::context::{DatasetResource, TaskContext};
use super::handle::{Completion, Outcome, TaskHandle};
use super::progress::{ProgressBridge, ProgressSink};
use super::stats::{DispatcherStats, StatsSnapshot};
use super::task::TaskRecord;
use super::telemetry::{TelemetryEvent, TelemetrySink, TracingTelemetrySink};
use crate::error::{panic_message, OperationError};
use crate::native::OperationKind;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::{mpsc as progress_channel, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type QueuedTask = Box<dyn FnOnce() + Send + 'static>;

/// What a task needs before it can be queued.
pub struct TaskRequest {
    kind: OperationKind,
    inputs: Vec<DatasetResource>,
    output: Option<DatasetResource>,
    progress: Option<ProgressSink>,
}

impl TaskRequest {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            inputs: Vec::new(),
            output: None,
            progress: None,
        }
    }

    /// Adds a resource the task reads.
    pub fn input(mut self, resource: &DatasetResource) -> Self {
        self.inputs.push(resource.clone());
        self
    }

    /// Sets the resource the task writes.
    pub fn output(mut self, resource: &DatasetResource) -> Self {
        self.output = Some(resource.clone());
        self
    }

    /// Attaches the caller's progress sink.
    pub fn progress(mut self, sink: Option<ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    fn resource_count(&self) -> usize {
        self.inputs.len() + usize::from(self.output.is_some())
    }
}

impl std::fmt::Debug for TaskRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRequest")
            .field("kind", &self.kind)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Fixed-size worker pool with a bounded submission queue.
pub struct Dispatcher {
    config: DispatcherConfig,
    sender: Mutex<Option<SyncSender<QueuedTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    telemetry: Arc<dyn TelemetrySink>,
    stats: Arc<DispatcherStats>,
}

impl Dispatcher {
    /// Starts a dispatcher that logs telemetry through `tracing`.
    pub fn new(config: DispatcherConfig) -> Self {
        Self::with_telemetry(config, Arc::new(TracingTelemetrySink))
    }

    /// Starts a dispatcher reporting to the given telemetry sink.
    pub fn with_telemetry(config: DispatcherConfig, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let workers = config.workers.max(1);
        let (sender, receiver) = mpsc::sync_channel::<QueuedTask>(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        info!(
            workers = workers,
            queue_capacity = config.queue_capacity,
            "Starting task dispatcher"
        );

        let handles = (0..workers)
            .map(|i| {
                let receiver = Arc::clone(&receiver);
                thread::Builder::new()
                    .name(format!("{}-{}", config.thread_name, i))
                    .spawn(move || Self::worker_loop(receiver))
                    .expect("Failed to spawn dispatcher worker thread")
            })
            .collect();

        Self {
            config,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(handles),
            telemetry,
            stats: Arc::new(DispatcherStats::new()),
        }
    }

    fn worker_loop(receiver: Arc<Mutex<Receiver<QueuedTask>>>) {
        loop {
            // Only one idle worker waits on the queue at a time.
            let job = receiver.lock().recv();
            match job {
                Ok(job) => job(),
                Err(_) => break,
            }
        }
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.config.workers.max(1)
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Queues `work` and returns a handle to its eventual result.
    ///
    /// Tickets for every resource in `request` are acquired first; if any
    /// resource is already destroyed the call fails here with
    /// [`OperationError::ResourceDestroyed`] and nothing is queued. Blocks
    /// while the queue is full.
    pub fn submit<T, F>(&self, request: TaskRequest, work: F) -> Result<TaskHandle<T>, OperationError>
    where
        T: Send + 'static,
        F: FnOnce(&mut TaskContext) -> Result<T, OperationError> + Send + 'static,
    {
        let kind = request.kind;
        let resources = request.resource_count();
        let acquired = request
            .inputs
            .iter()
            .map(DatasetResource::acquire)
            .collect::<Result<Vec<_>, _>>()
            .and_then(|inputs| {
                let output = request.output.as_ref().map(DatasetResource::acquire).transpose()?;
                Ok((inputs, output))
            });
        let (inputs, output) = match acquired {
            Ok(tickets) => tickets,
            Err(err) => return Err(self.reject(kind, err)),
        };
        let sender = self.sender.lock().clone();
        let Some(sender) = sender else {
            return Err(self.reject(kind, OperationError::native("dispatcher is shut down")));
        };

        let abort = CancellationToken::new();
        let (progress_tx, progress) = match request.progress {
            Some(sink) => {
                let (tx, rx) = progress_channel::unbounded_channel();
                (Some(tx), Some((rx, sink)))
            }
            None => (None, None),
        };
        let (record, state_rx) =
            TaskRecord::new(kind, Arc::clone(&self.telemetry), Arc::clone(&self.stats));
        let (outcome_tx, outcome_rx) = oneshot::channel();

        let context = TaskContext::new(
            record.id(),
            kind,
            inputs,
            output,
            ProgressBridge::new(progress_tx, abort.clone()),
        );
        let completion = Completion::new(outcome_tx, Arc::clone(&record));
        let job: QueuedTask = Box::new(move || run_task(context, completion, work));

        let queue_depth = self.stats.record_submitted();
        self.telemetry.emit(TelemetryEvent::TaskSubmitted {
            task_id: record.id(),
            kind,
            resources,
            queue_depth,
        });
        if sender.send(job).is_err() {
            // Workers are gone; the returned job drops its completion, which
            // cancels the task.
            self.stats.record_dequeued();
            return Err(OperationError::native("dispatcher is shut down"));
        }

        Ok(TaskHandle::new(record, state_rx, outcome_rx, progress, abort))
    }

    /// Submits and blocks until the task finishes.
    pub fn run<T, F>(&self, request: TaskRequest, work: F) -> Result<T, OperationError>
    where
        T: Send + 'static,
        F: FnOnce(&mut TaskContext) -> Result<T, OperationError> + Send + 'static,
    {
        self.submit(request, work)?.wait_blocking()
    }

    fn reject(&self, kind: OperationKind, err: OperationError) -> OperationError {
        self.stats.record_rejected();
        self.telemetry.emit(TelemetryEvent::TaskRejected {
            kind,
            reason: err.to_string(),
        });
        err
    }

    /// Stops accepting work and waits for queued tasks to drain.
    ///
    /// Idempotent. Called automatically on drop.
    pub fn shutdown(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);

        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        debug!(workers = workers.len(), "Stopping task dispatcher");
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("Dispatcher worker thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Body of a queued job, executed on a worker thread.
fn run_task<T, F>(mut context: TaskContext, completion: Completion<T>, work: F)
where
    F: FnOnce(&mut TaskContext) -> Result<T, OperationError>,
{
    let record = Arc::clone(completion.record());
    let stats = Arc::clone(record.stats());
    stats.record_dequeued();

    if let Some(ticket) = context.destroyed_resource() {
        let err = OperationError::ResourceDestroyed {
            resource: ticket.kind(),
            id: ticket.id(),
        };
        record.telemetry().emit(TelemetryEvent::TaskCancelledBeforeStart {
            task_id: record.id(),
            kind: record.kind(),
            resource: ticket.id(),
        });
        drop(context);
        completion.send(Outcome::Cancelled(err));
        return;
    }

    record.start();
    stats.record_started();
    let outcome = match catch_unwind(AssertUnwindSafe(|| work(&mut context))) {
        Ok(Ok(value)) => Outcome::Completed(value),
        Ok(Err(err)) => Outcome::Failed(err),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            warn!(task_id = %record.id(), panic = %message, "Task panicked");
            Outcome::Failed(OperationError::native(format!("worker panicked: {message}")))
        }
    };
    stats.record_stopped();

    // Release every ticket before the owner can observe the outcome.
    drop(context);
    completion.send(outcome);
}
