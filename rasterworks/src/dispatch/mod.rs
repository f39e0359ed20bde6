//! Task Dispatch Framework
//!
//! This module runs native operations off the caller's thread while keeping
//! the resources they touch alive and exclusive for as long as they need them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Dispatcher                            │
//! │  Acquire tickets, queue work, hand back a TaskHandle        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//! │  │ Bounded     │  │ Worker      │  │ Telemetry           │  │
//! │  │ Queue       │──│ Pool        │  │ Sink                │  │
//! │  └─────────────┘  └─────────────┘  └─────────────────────┘  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TaskContext (tickets + ProgressBridge)  ──►  TaskHandle     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Core Concepts
//!
//! - **Ticket**: a counted reference to a guarded resource. Acquired at
//!   submission, released when the task's context is dropped.
//!
//! - **Progress bridge**: the worker side of a task's progress channel.
//!   Notifications reach the caller in order and never go backwards.
//!
//! - **Task handle**: awaitable (or blocking) access to the single terminal
//!   result of a task.
//!
//! # Example
//!
//! ```
//! use rasterworks::dispatch::{Dispatcher, DispatcherConfig, TaskRequest};
//! use rasterworks::native::OperationKind;
//!
//! let dispatcher = Dispatcher::new(DispatcherConfig::default().with_workers(2));
//! let handle = dispatcher
//!     .submit(TaskRequest::new(OperationKind::Info), |ctx| {
//!         ctx.progress().emit(1.0, None);
//!         Ok("done")
//!     })
//!     .unwrap();
//! assert_eq!(handle.wait_blocking().unwrap(), "done");
//! ```

mod config;
mod context;
mod dispatcher;
mod handle;
mod progress;
mod stats;
mod task;
mod telemetry;

pub use config::{
    default_workers, DispatcherConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_THREAD_NAME,
    FALLBACK_WORKERS,
};
pub use context::{
    lock_resources, lock_shared, DatasetResource, DatasetTicket, LockedResources, NativeObject,
    SharedResources, TaskContext, TaskParts,
};
pub use dispatcher::{Dispatcher, TaskRequest};
pub use handle::TaskHandle;
pub use progress::{progress_sink, ProgressBridge, ProgressNotification, ProgressSink};
pub use stats::{DispatcherStats, StatsSnapshot};
pub use task::{TaskId, TaskState};
pub use telemetry::{
    MultiplexTelemetrySink, NullTelemetrySink, RecordingTelemetrySink, TelemetryEvent,
    TelemetrySink, TracingTelemetrySink,
};
