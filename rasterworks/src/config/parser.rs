//! INI parsing: `Ini` → `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.

use ini::Ini;
use std::path::PathBuf;

use super::file::ConfigFileError;
use super::settings::ConfigFile;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found in the INI.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [dispatcher] section
    if let Some(section) = ini.section(Some("dispatcher")) {
        if let Some(v) = section.get("workers") {
            let v = v.trim();
            config.dispatcher.workers = match v.to_lowercase().as_str() {
                "" | "auto" => None,
                _ => Some(parse_positive(v).ok_or_else(|| ConfigFileError::InvalidValue {
                    section: "dispatcher".to_string(),
                    key: "workers".to_string(),
                    value: v.to_string(),
                    reason: "must be a positive integer or 'auto'".to_string(),
                })?),
            };
        }
        if let Some(v) = section.get("queue_capacity") {
            config.dispatcher.queue_capacity =
                parse_positive(v).ok_or_else(|| ConfigFileError::InvalidValue {
                    section: "dispatcher".to_string(),
                    key: "queue_capacity".to_string(),
                    value: v.to_string(),
                    reason: "must be a positive integer".to_string(),
                })?;
        }
        if let Some(v) = section.get("thread_name") {
            let v = v.trim();
            if v.is_empty() {
                return Err(ConfigFileError::InvalidValue {
                    section: "dispatcher".to_string(),
                    key: "thread_name".to_string(),
                    value: v.to_string(),
                    reason: "cannot be empty".to_string(),
                });
            }
            config.dispatcher.thread_name = v.to_string();
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if v.is_empty() || v.contains(['/', '\\']) {
                return Err(ConfigFileError::InvalidValue {
                    section: "logging".to_string(),
                    key: "file".to_string(),
                    value: v.to_string(),
                    reason: "must be a plain file name".to_string(),
                });
            }
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn parse_positive(value: &str) -> Option<usize> {
    value.trim().parse().ok().filter(|&n: &usize| n > 0)
}

/// Expands a leading `~` to the home directory.
fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None if path == "~" => dirs::home_dir().unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
