//! Log file helpers.
//!
//! Resolves the default log location and rotates old files. The
//! `tracing-subscriber` setup itself lives in the `tether` binary.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Maximum size of a single log file before rotation (10 MB).
pub const DEFAULT_MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum number of rotated log files to retain.
pub const DEFAULT_MAX_LOG_FILES: u32 = 5;

/// Return the platform-specific default log file path.
///
/// * macOS: `$HOME/Library/Logs/tether/tether.log`
/// * Linux: `$XDG_STATE_HOME/tether/tether.log`, else
///   `$HOME/.local/state/tether/tether.log`
/// * Windows: `%LOCALAPPDATA%/tether/logs/tether.log`
/// * Fallback: the system temp dir
pub fn default_log_file_path() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Logs/tether/tether.log");
        }
    }
    #[cfg(target_os = "linux")]
    {
        if let Some(state) = std::env::var_os("XDG_STATE_HOME").filter(|s| !s.is_empty()) {
            return PathBuf::from(state).join("tether/tether.log");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".local/state/tether/tether.log");
        }
    }
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("LOCALAPPDATA") {
            return PathBuf::from(appdata).join("tether\\logs\\tether.log");
        }
    }
    std::env::temp_dir().join("tether").join("tether.log")
}

/// Return the platform-specific default config directory.
///
/// * `$XDG_CONFIG_HOME/tether` or `$HOME/.config/tether` on Unix
/// * `%APPDATA%/tether` on Windows
/// * Fallback: `./.tether`
pub fn default_config_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("tether");
        }
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME").filter(|s| !s.is_empty()) {
            return PathBuf::from(config).join("tether");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/tether");
        }
    }
    PathBuf::from(".tether")
}

/// Prepare `log_path` for appending: create its directory and rotate it
/// if it has outgrown [`DEFAULT_MAX_LOG_SIZE`].
pub fn prepare_log_file(log_path: &Path) -> io::Result<()> {
    ensure_log_dir(log_path)?;
    rotate_log_files(log_path, DEFAULT_MAX_LOG_SIZE, DEFAULT_MAX_LOG_FILES)
}

/// Ensure the parent directory of a log file exists, creating it if necessary.
pub fn ensure_log_dir(log_path: &Path) -> io::Result<()> {
    match log_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}

/// Rotate `log_path` once it reaches `max_size` bytes, keeping at most
/// `max_files` numbered predecessors (`tether.log.1` is the newest).
///
/// With `max_files == 0` the oversized log is simply removed. Does
/// nothing when the file does not exist or is still small enough.
pub fn rotate_log_files(log_path: &Path, max_size: u64, max_files: u32) -> io::Result<()> {
    let size = match fs::metadata(log_path) {
        Ok(meta) => meta.len(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if size < max_size {
        return Ok(());
    }
    if max_files == 0 {
        return fs::remove_file(log_path);
    }

    remove_if_present(&rotated_path(log_path, max_files))?;
    for index in (1..max_files).rev() {
        let from = rotated_path(log_path, index);
        if from.exists() {
            fs::rename(&from, rotated_path(log_path, index + 1))?;
        }
    }
    fs::rename(log_path, rotated_path(log_path, 1))
}

// ── internal helpers ────────────────────────────────────────────────────────

fn rotated_path(base: &Path, index: u32) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{index}"));
    base.with_file_name(name)
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

// ── tests ───────────────────────────────────────────────────────────────────
