//! Logging configuration
//!
//! Describes where and how much the binary logs. The subscriber itself is
//! installed by the application; this crate only emits `tracing` events.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;

/// Prefix of every log file name
const LOG_FILE_PREFIX: &str = "framepulse";

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default level ("error", "warn", "info", "debug", "trace")
    pub level: String,
    /// Directory holding the log files
    pub log_path: PathBuf,
    /// Log files kept on startup, newest first
    pub max_files: usize,
    /// Log to stderr
    pub console_output: bool,
    /// Log to a file
    pub file_output: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        let log_path = dirs::data_local_dir()
            .map(|dir| dir.join("FramePulse").join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));

        Self {
            level: "info".to_string(),
            log_path,
            max_files: 10,
            console_output: true,
            file_output: false,
        }
    }
}

impl LogConfig {
    /// Level as a filter, INFO when unparseable
    pub fn parse_level(&self) -> LevelFilter {
        self.level.parse().unwrap_or(LevelFilter::INFO)
    }

    /// Create the log directory if needed
    pub fn ensure_log_directory(&self) -> io::Result<()> {
        fs::create_dir_all(&self.log_path)
    }

    /// File for this run, stamped with the start date and time
    pub fn current_log_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.log_path
            .join(format!("{}_{}.log", LOG_FILE_PREFIX, stamp))
    }

    /// Delete all but the newest `max_files` log files; returns how many went
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_path.exists() {
            return Ok(0);
        }

        let mut logs: Vec<PathBuf> = fs::read_dir(&self.log_path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "log")
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(LOG_FILE_PREFIX))
            })
            .collect();

        if logs.len() <= self.max_files {
            return Ok(0);
        }

        // date-stamped names sort chronologically
        logs.sort();
        let excess = logs.len() - self.max_files;
        for path in &logs[..excess] {
            fs::remove_file(path)?;
        }
        Ok(excess)
    }
}
