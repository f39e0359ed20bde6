//! Logging initialization, in its own process so the global subscriber can
//! be installed exactly once.

use rasterworks::config::LoggingSettings;
use rasterworks::logging::{init_from_settings, init_logging};

#[test]
fn test_init_logging_writes_file() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let settings = LoggingSettings {
        directory: temp_dir.path().join("logs"),
        file: "it.log".to_string(),
    };
    std::fs::create_dir_all(&settings.directory).unwrap();
    std::fs::write(settings.directory.join("it.log"), "stale").unwrap();

    let guard = init_from_settings(&settings).unwrap();
    tracing::warn!(marker = 7, "logging marker line");
    drop(guard);

    let content = std::fs::read_to_string(settings.directory.join("it.log")).unwrap();
    assert!(!content.contains("stale"));
    assert!(content.contains("logging marker line"));

    // A second global subscriber is refused.
    assert!(init_logging(temp_dir.path(), "again.log").is_err());
}
