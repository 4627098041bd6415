//! Log-file helpers.
//!
//! Rotation, default path resolution and level conversion. The
//! `tracing-subscriber` setup itself lives in the binary.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::LogLevel;
use crate::paths::Paths;

/// Maximum size of a single log file before rotation (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated log files to retain.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

const LOG_FILE_NAME: &str = "mifront.log";

/// `~/.local/share/mifront/logs/mifront.log`, or a temp-dir fallback when
/// no home directory can be found.
pub fn default_log_file_path() -> PathBuf {
    match Paths::new() {
        Ok(paths) => paths.log_dir().join(LOG_FILE_NAME),
        Err(_) => std::env::temp_dir().join("mifront").join(LOG_FILE_NAME),
    }
}

/// Ensure the parent directory of a log file exists, creating it if necessary.
pub fn ensure_log_dir(log_path: &Path) -> io::Result<()> {
    if let Some(parent) = log_path.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Rotate log files when the current file exceeds `max_size` bytes.
///
/// ```text
///   mifront.log   -> mifront.log.1
///   mifront.log.1 -> mifront.log.2
///   ...
///   mifront.log.<max_files> is deleted
/// ```
///
/// Does nothing when the file does not exist or is smaller than `max_size`.
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    if !log_path.exists() {
        return Ok(());
    }
    if fs::metadata(log_path)?.len() < max_size {
        return Ok(());
    }

    let oldest = rotated_path(log_path, max_files);
    if oldest.exists() {
        fs::remove_file(&oldest)?;
    }

    for i in (1..max_files).rev() {
        let from = rotated_path(log_path, i);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, i + 1))?;
        }
    }

    fs::rename(log_path, rotated_path(log_path, 1))
}

/// `tracing` filter directive for a configured level.
pub fn log_level_to_filter(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let name = base.file_name().unwrap_or_default().to_string_lossy();
    let parent = base.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!("{}.{}", name, index))
}
