//! INI serialization: `ConfigFile` → commented INI string.

use std::path::Path;

use super::settings::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let workers = config
        .dispatcher
        .workers
        .map(|n| n.to_string())
        .unwrap_or_else(|| "auto".to_string());

    format!(
        r#"[dispatcher]
; Worker threads running native operations (default: auto = one per CPU core)
workers = {}
; Tasks that may wait for a free worker before submission blocks (default: 256)
queue_capacity = {}
; Worker thread name prefix; threads are named <prefix>-<n>
thread_name = {}

[logging]
; Directory for log files (default: logs)
directory = {}
; Log file name, cleared at startup (default: rasterworks.log)
file = {}
"#,
        workers,
        config.dispatcher.queue_capacity,
        config.dispatcher.thread_name,
        path_to_string(&config.logging.directory),
        config.logging.file,
    )
}

fn path_to_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
