use lib_rcauto::loggers::{rotate_logs, setup_logging};
use std::fs;
use tempfile::tempdir;

// fern installs a process-wide logger, so everything lives in one test.
#[test]
fn test_setup_logging_rotates_and_writes() {
    let temp_dir = tempdir().expect("Failed to create temporary directory");
    let log_dir = temp_dir.path();

    fs::write(log_dir.join("server_rc-20240101_000000.log"), "old").expect("old log");
    fs::write(log_dir.join("server_rc-20240102_000000.log"), "older than now").expect("old log");
    fs::write(log_dir.join("other-20240101_000000.log"), "foreign").expect("foreign log");

    let log_path = setup_logging(log_dir, "debug", "server_rc").expect("logger installed");
    log::info!("RC table header written");
    log::debug!("detail line");
    log::logger().flush();

    // Only the new file of this app survives, other apps are untouched.
    let mut names: Vec<String> = fs::read_dir(log_dir)
        .expect("Failed to read log directory")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"other-20240101_000000.log".to_string()));
    assert!(!log_dir.join("server_rc-20240101_000000.log").exists());
    assert!(!log_dir.join("server_rc-20240102_000000.log").exists());
    assert!(log_path.exists());

    let content = fs::read_to_string(&log_path).expect("Failed to read log file");
    assert!(content.contains("[INFO] RC table header written"));
    assert!(content.contains("[DEBUG] detail line"));

    // A second rotation keeps the newest file.
    fs::write(log_dir.join("server_rc-20000101_000000.log"), "ancient").expect("ancient log");
    rotate_logs("server_rc", log_dir);
    assert!(log_path.exists());
    assert!(!log_dir.join("server_rc-20000101_000000.log").exists());

    // A second global logger is refused.
    assert!(setup_logging(log_dir, "info", "server_rc").is_err());
}
