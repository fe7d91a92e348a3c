//! # Log Setup
//!
//! Installs a `fern` dispatcher writing `[date][target][LEVEL] message` lines to
//! stdout and to a timestamped file. Older files of the same application are
//! removed so only the newest one survives a restart.

use anyhow::Result;
use glob::glob;
use std::fs;
use std::path::{Path, PathBuf};

/// Maps a textual level to a filter, defaulting to `Info`.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" | "fatal" => log::LevelFilter::Error,
        _ => log::LevelFilter::Info,
    }
}

/// Installs the global logger.
///
/// # Errors
/// Fails when the log directory cannot be created, the file cannot be opened,
/// or a global logger is already installed.
pub fn setup_logging(log_dir: &Path, log_level: &str, app_name: &str) -> Result<PathBuf> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    let log_file_name = format!("{}-{}.log", app_name, chrono::Local::now().format("%Y%m%d_%H%M%S"));
    let log_path = log_dir.join(log_file_name);

    // The new file must exist before rotation so it is the one kept.
    let log_file = fern::log_file(&log_path)?;
    rotate_logs(app_name, log_dir);

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        // Connection pool chatter is not interesting at info.
        .level_for("tokio_postgres", log::LevelFilter::Warn)
        .level_for("reqwest_retry", log::LevelFilter::Warn)
        .chain(std::io::stdout())
        .chain(log_file)
        .apply()?;

    Ok(log_path)
}

/// Keeps only the newest `<app_name>-*.log` file in `log_dir`.
///
/// File names carry a sortable timestamp, so the lexicographically largest
/// name is the newest one.
pub fn rotate_logs(app_name: &str, log_dir: &Path) {
    let pattern = format!("{}/{}-*.log", log_dir.display(), app_name);
    let mut log_files: Vec<PathBuf> = match glob(&pattern) {
        Ok(paths) => paths.filter_map(|entry| entry.ok()).collect(),
        Err(e) => {
            eprintln!("Invalid log rotation pattern {}: {}", pattern, e);
            return;
        }
    };

    log_files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));

    for old_file in log_files.iter().skip(1) {
        if let Err(e) = fs::remove_file(old_file) {
            eprintln!("Error deleting old log file {}: {}", old_file.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Error);
        assert_eq!(parse_level("whatever"), log::LevelFilter::Info);
    }

    #[test]
    fn test_rotate_logs_keeps_newest_of_same_app() {
        let dir = tempdir().expect("temp dir");
        for name in [
            "server_rc-20240101_000000.log",
            "server_rc-20240102_000000.log",
            "server_rc-20240103_000000.log",
            "other-20240101_000000.log",
        ] {
            fs::write(dir.path().join(name), b"x").expect("write log");
        }

        rotate_logs("server_rc", dir.path());

        let mut left: Vec<String> = fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        left.sort();
        assert_eq!(left, vec!["other-20240101_000000.log", "server_rc-20240103_000000.log"]);
    }
}
