//! Dispatcher configuration.
//!
//! This module contains the [`DispatcherConfig`] struct and related constants
//! for sizing the worker pool.

// =============================================================================
// Configuration Constants
// =============================================================================

/// Default capacity of the submission queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Default prefix for worker thread names.
pub const DEFAULT_THREAD_NAME: &str = "rasterworks-worker";

/// Worker count used when the CPU count cannot be determined.
pub const FALLBACK_WORKERS: usize = 4;

/// Default worker count: one per available CPU.
pub fn default_workers() -> usize {
    crate::config::num_cpus()
}

// =============================================================================
// Dispatcher Configuration
// =============================================================================

/// Configuration for the task dispatcher.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Number of worker threads. Fixed for the dispatcher's lifetime.
    pub workers: usize,

    /// Submission queue capacity. Submitting to a full queue blocks.
    pub queue_capacity: usize,

    /// Worker threads are named `{thread_name}-{index}`.
    pub thread_name: String,
}

impl DispatcherConfig {
    /// Sets the worker count (at least one).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the queue capacity (at least one).
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl From<&crate::config::DispatcherSettings> for DispatcherConfig {
    fn from(settings: &crate::config::DispatcherSettings) -> Self {
        Self {
            workers: settings.workers.unwrap_or_else(default_workers).max(1),
            queue_capacity: settings.queue_capacity.max(1),
            thread_name: settings.thread_name.clone(),
        }
    }
}
