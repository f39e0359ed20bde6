//! Default values for every setting.

use std::path::PathBuf;

use super::settings::*;
use crate::dispatch::{DEFAULT_QUEUE_CAPACITY, DEFAULT_THREAD_NAME, FALLBACK_WORKERS};

/// Number of available CPU cores.
pub fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(FALLBACK_WORKERS)
}

/// Default log directory, relative to the working directory.
pub const DEFAULT_LOG_DIRECTORY: &str = "logs";

/// Default log file name.
pub const DEFAULT_LOG_FILE: &str = "rasterworks.log";

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            workers: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from(DEFAULT_LOG_DIRECTORY),
            file: DEFAULT_LOG_FILE.to_string(),
        }
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
