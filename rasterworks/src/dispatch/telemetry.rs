//! Telemetry for dispatcher observability.
//!
//! The dispatcher emits structured events through a [`TelemetrySink`] and
//! never decides how they are presented: logging, metrics or test recorders are
//! all just sinks.
//!
//! # Example
//!
//! ```
//! use rasterworks::dispatch::{TelemetryEvent, TelemetrySink};
//!
//! struct CountingSink(std::sync::atomic::AtomicUsize);
//!
//! impl TelemetrySink for CountingSink {
//!     fn emit(&self, _event: TelemetryEvent) {
//!         self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!     }
//! }
//! ```

use super::task::{TaskId, TaskState};
use crate::native::OperationKind;
use crate::resource::{ResourceId, ResourceKind};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Telemetry Events
// =============================================================================

/// Events emitted by the dispatcher and the resources it guards.
#[derive(Clone, Debug, PartialEq)]
pub enum TelemetryEvent {
    // -------------------------------------------------------------------------
    // Task Lifecycle Events
    // -------------------------------------------------------------------------
    /// A task was accepted and queued.
    TaskSubmitted {
        task_id: TaskId,
        kind: OperationKind,
        resources: usize,
        queue_depth: usize,
    },

    /// A task was refused before reaching the queue.
    TaskRejected { kind: OperationKind, reason: String },

    /// A worker picked the task up.
    TaskStarted {
        task_id: TaskId,
        kind: OperationKind,
        wait_time: Duration,
    },

    /// A task reached a terminal state.
    TaskCompleted {
        task_id: TaskId,
        kind: OperationKind,
        state: TaskState,
        duration: Duration,
    },

    /// A queued task was dropped because one of its resources was destroyed.
    TaskCancelledBeforeStart {
        task_id: TaskId,
        kind: OperationKind,
        resource: ResourceId,
    },

    // -------------------------------------------------------------------------
    // Resource Events
    // -------------------------------------------------------------------------
    /// A resource was closed by its owner.
    ResourceDestroyed {
        resource: ResourceId,
        kind: ResourceKind,
        deferred: bool,
    },

    /// A resource's native object was freed.
    ResourceFreed {
        resource: ResourceId,
        kind: ResourceKind,
    },
}

impl TelemetryEvent {
    /// Returns the task ID associated with this event, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskSubmitted { task_id, .. }
            | Self::TaskStarted { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskCancelledBeforeStart { task_id, .. } => Some(*task_id),
            Self::TaskRejected { .. }
            | Self::ResourceDestroyed { .. }
            | Self::ResourceFreed { .. } => None,
        }
    }

    /// Returns a short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "task_submitted",
            Self::TaskRejected { .. } => "task_rejected",
            Self::TaskStarted { .. } => "task_started",
            Self::TaskCompleted { .. } => "task_completed",
            Self::TaskCancelledBeforeStart { .. } => "task_cancelled_before_start",
            Self::ResourceDestroyed { .. } => "resource_destroyed",
            Self::ResourceFreed { .. } => "resource_freed",
        }
    }
}

// =============================================================================
// Telemetry Sink Trait
// =============================================================================

/// Sink for telemetry events.
///
/// Events are emitted from worker threads and from the owning thread, so
/// implementations must be `Send + Sync` and should return quickly.
pub trait TelemetrySink: Send + Sync {
    /// Called when a telemetry event occurs.
    fn emit(&self, event: TelemetryEvent);
}

// =============================================================================
// Built-in Sink Implementations
// =============================================================================

/// No-op sink for when telemetry is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit(&self, _event: TelemetryEvent) {}
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        match &event {
            TelemetryEvent::TaskSubmitted {
                task_id,
                kind,
                resources,
                queue_depth,
            } => {
                tracing::trace!(
                    task_id = %task_id,
                    kind = %kind,
                    resources = resources,
                    queue_depth = queue_depth,
                    "Task submitted"
                );
            }
            TelemetryEvent::TaskRejected { kind, reason } => {
                tracing::debug!(kind = %kind, reason = %reason, "Task rejected");
            }
            TelemetryEvent::TaskStarted {
                task_id,
                kind,
                wait_time,
            } => {
                tracing::trace!(
                    task_id = %task_id,
                    kind = %kind,
                    wait_time_ms = wait_time.as_millis(),
                    "Task started"
                );
            }
            TelemetryEvent::TaskCompleted {
                task_id,
                kind,
                state,
                duration,
            } => {
                tracing::debug!(
                    task_id = %task_id,
                    kind = %kind,
                    state = %state,
                    duration_ms = duration.as_millis(),
                    "Task completed"
                );
            }
            TelemetryEvent::TaskCancelledBeforeStart {
                task_id,
                kind,
                resource,
            } => {
                tracing::debug!(
                    task_id = %task_id,
                    kind = %kind,
                    resource = %resource,
                    "Task cancelled before start, resource destroyed"
                );
            }
            TelemetryEvent::ResourceDestroyed {
                resource,
                kind,
                deferred,
            } => {
                tracing::debug!(
                    resource = %resource,
                    kind = %kind,
                    deferred = deferred,
                    "Resource destroyed"
                );
            }
            TelemetryEvent::ResourceFreed { resource, kind } => {
                tracing::trace!(resource = %resource, kind = %kind, "Resource freed");
            }
        }
    }
}

/// Sink that forwards events to multiple sinks.
pub struct MultiplexTelemetrySink {
    sinks: Vec<Arc<dyn TelemetrySink>>,
}

impl MultiplexTelemetrySink {
    /// Creates a new multiplex sink with the given sinks.
    pub fn new(sinks: Vec<Arc<dyn TelemetrySink>>) -> Self {
        Self { sinks }
    }

    /// Adds a sink to the multiplex.
    pub fn add_sink(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.sinks.push(sink);
    }
}

impl TelemetrySink for MultiplexTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

impl std::fmt::Debug for MultiplexTelemetrySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexTelemetrySink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}

/// Sink that records every event, for inspection in tests and tools.
#[derive(Debug, Default)]
pub struct RecordingTelemetrySink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetrySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all events recorded so far.
    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    /// Counts recorded events of one type (see [`TelemetryEvent::event_type`]).
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }
}

impl TelemetrySink for RecordingTelemetrySink {
    fn emit(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}
