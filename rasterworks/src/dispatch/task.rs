//! Task identity, state machine and the shared per-task record.

use super::stats::DispatcherStats;
use super::telemetry::{TelemetryEvent, TelemetrySink};
use crate::native::OperationKind;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a dispatched task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub(crate) fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Task lifecycle: `Queued → Running → {Completed | Failed | Cancelled}`.
///
/// A task whose resource was destroyed while queued goes straight from
/// `Queued` to `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Returns true if the task has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "Queued"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// State shared by a task's handle and the worker running it.
///
/// Terminal transitions go through [`TaskRecord::finish`], which succeeds at
/// most once; every later attempt is a no-op.
pub(crate) struct TaskRecord {
    id: TaskId,
    kind: OperationKind,
    state: watch::Sender<TaskState>,
    submitted_at: Instant,
    started_at: parking_lot::Mutex<Option<Instant>>,
    telemetry: Arc<dyn TelemetrySink>,
    stats: Arc<DispatcherStats>,
}

impl TaskRecord {
    pub fn new(
        kind: OperationKind,
        telemetry: Arc<dyn TelemetrySink>,
        stats: Arc<DispatcherStats>,
    ) -> (Arc<Self>, watch::Receiver<TaskState>) {
        let (state, state_rx) = watch::channel(TaskState::Queued);
        let record = Arc::new(Self {
            id: TaskId::next(),
            kind,
            state,
            submitted_at: Instant::now(),
            started_at: parking_lot::Mutex::new(None),
            telemetry,
            stats,
        });
        (record, state_rx)
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    pub fn telemetry(&self) -> &Arc<dyn TelemetrySink> {
        &self.telemetry
    }

    pub fn stats(&self) -> &Arc<DispatcherStats> {
        &self.stats
    }

    /// Moves `Queued → Running`. Returns false if the task was not queued.
    pub fn start(&self) -> bool {
        let started = self.state.send_if_modified(|state| {
            if *state == TaskState::Queued {
                *state = TaskState::Running;
                true
            } else {
                false
            }
        });
        if started {
            let now = Instant::now();
            *self.started_at.lock() = Some(now);
            self.telemetry.emit(TelemetryEvent::TaskStarted {
                task_id: self.id,
                kind: self.kind,
                wait_time: now.duration_since(self.submitted_at),
            });
        }
        started
    }

    /// Moves to a terminal state. Returns false if already terminal.
    pub fn finish(&self, terminal: TaskState) -> bool {
        debug_assert!(terminal.is_terminal());
        let finished = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = terminal;
                true
            }
        });
        if finished {
            match terminal {
                TaskState::Completed => self.stats.record_completed(),
                TaskState::Failed => self.stats.record_failed(),
                _ => self.stats.record_cancelled(),
            }
            let since = self.started_at.lock().unwrap_or(self.submitted_at);
            self.telemetry.emit(TelemetryEvent::TaskCompleted {
                task_id: self.id,
                kind: self.kind,
                state: terminal,
                duration: since.elapsed(),
            });
        }
        finished
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::telemetry::RecordingTelemetrySink;

    fn record() -> (
        Arc<TaskRecord>,
        watch::Receiver<TaskState>,
        Arc<RecordingTelemetrySink>,
        Arc<DispatcherStats>,
    ) {
        let sink = Arc::new(RecordingTelemetrySink::new());
        let stats = Arc::new(DispatcherStats::new());
        let (record, rx) = TaskRecord::new(OperationKind::Info, sink.clone(), stats.clone());
        (record, rx, sink, stats)
    }

    #[test]
    fn test_task_state_is_terminal() {
        assert!(!TaskState::Queued.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_task_state_display() {
        assert_eq!(format!("{}", TaskState::Running), "Running");
        assert_eq!(format!("{}", TaskId::new(4)), "task-4");
    }

    #[test]
    fn test_task_ids_are_unique() {
        assert_ne!(TaskId::next(), TaskId::next());
    }

    #[test]
    fn test_lifecycle() {
        let (record, rx, sink, stats) = record();
        assert_eq!(*rx.borrow(), TaskState::Queued);

        assert!(record.start());
        assert_eq!(*rx.borrow(), TaskState::Running);
        assert!(!record.start());

        assert!(record.finish(TaskState::Completed));
        assert_eq!(*rx.borrow(), TaskState::Completed);
        assert_eq!(sink.count("task_started"), 1);
        assert_eq!(sink.count("task_completed"), 1);
        assert_eq!(stats.snapshot().completed, 1);
    }

    #[test]
    fn test_terminal_state_is_set_once() {
        let (record, _rx, sink, stats) = record();
        assert!(record.finish(TaskState::Cancelled));
        assert!(!record.finish(TaskState::Completed));
        assert!(!record.finish(TaskState::Failed));
        assert!(!record.start());
        assert_eq!(record.state(), TaskState::Cancelled);
        assert_eq!(sink.count("task_completed"), 1);
        assert_eq!(stats.snapshot().finished(), 1);
    }

    #[test]
    fn test_queued_can_be_cancelled_without_running() {
        let (record, _rx, sink, _) = record();
        assert!(record.finish(TaskState::Cancelled));
        assert_eq!(sink.count("task_started"), 0);
    }
}
