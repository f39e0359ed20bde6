//! User configuration for rasterworks.
//!
//! Settings are read from `~/.rasterworks/config.ini`. Each `[section]` maps
//! to one settings struct; missing keys keep their defaults.
//!
//! ```ini
//! [dispatcher]
//! workers = 8
//! queue_capacity = 256
//! thread_name = rasterworks-worker
//!
//! [logging]
//! directory = logs
//! file = rasterworks.log
//! ```
//!
//! # Example
//!
//! ```
//! use rasterworks::config::ConfigFile;
//! use rasterworks::dispatch::DispatcherConfig;
//!
//! let file = ConfigFile::default();
//! let config = DispatcherConfig::from(&file.dispatcher);
//! assert!(config.workers >= 1);
//! ```

mod defaults;
mod file;
mod parser;
mod settings;
mod writer;

pub use defaults::{num_cpus, DEFAULT_LOG_DIRECTORY, DEFAULT_LOG_FILE};
pub use file::{config_directory, config_file_path, ConfigFileError};
pub use settings::{ConfigFile, DispatcherSettings, LoggingSettings};
