//! Logging initialization.
//!
//! With `--print-logs` logs go to stderr. Otherwise they are appended to a
//! file in the platform log directory so they never mix with command output.

use sidecode_util::log::{LogConfig, LogLevel};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Initialize logging. Returns the log file path when logging to a file.
pub fn init_logging(print: bool, level: LogLevel) -> Option<PathBuf> {
    if print {
        sidecode_util::log::init(LogConfig {
            print: true,
            level,
            include_location: level == LogLevel::Trace,
        });
        return None;
    }

    let log_dir = get_log_dir();
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {e}");
        return None;
    }

    let log_file = log_dir.join("sidecode.log");
    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
    {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Warning: Could not open log file: {e}");
            return None;
        }
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(file)
        .try_init();
    if result.is_err() {
        return None;
    }

    Some(log_file)
}

/// Get the log directory path.
pub fn get_log_dir() -> PathBuf {
    // macOS: ~/Library/Logs/sidecode
    // Linux: ~/.local/state/sidecode/logs
    // Windows: %LOCALAPPDATA%/sidecode/logs

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = dirs::home_dir() {
            return home.join("Library/Logs/sidecode");
        }
    }

    #[cfg(target_os = "linux")]
    {
        if let Some(state_dir) = dirs::state_dir() {
            return state_dir.join("sidecode/logs");
        }
    }

    if let Some(data_dir) = sidecode_util::log::default_data_dir() {
        return data_dir.join("logs");
    }

    PathBuf::from(".sidecode/logs")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_dir_is_namespaced() {
        let dir = get_log_dir();
        assert!(dir.to_string_lossy().contains("sidecode"));
    }
}
