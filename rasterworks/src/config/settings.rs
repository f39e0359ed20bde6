//! Settings structs, one per `[section]` of the config file.

use std::path::PathBuf;

/// Complete configuration loaded from config.ini.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    /// Worker pool settings
    pub dispatcher: DispatcherSettings,
    /// Log output settings
    pub logging: LoggingSettings,
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Number of worker threads. `None` means one per CPU core.
    pub workers: Option<usize>,
    /// Tasks that may wait for a worker before `submit` blocks.
    pub queue_capacity: usize,
    /// Worker thread name prefix; threads are named `<prefix>-<n>`.
    pub thread_name: String,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Directory for log files.
    pub directory: PathBuf,
    /// Log file name inside `directory`. Cleared at startup.
    pub file: String,
}
