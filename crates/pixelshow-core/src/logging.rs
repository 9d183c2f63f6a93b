//! Logging configuration.
//!
//! The subscriber itself is installed by the binary; this module only
//! describes where logs go and manages the log directory.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::PathBuf;
use tracing::Level;

/// Prefix of every log file name
const LOG_FILE_PREFIX: &str = "pixelshow_";

/// Where and how much to log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Level name: trace, debug, info, warn, error
    pub level: String,
    /// Log to stderr
    pub console_output: bool,
    /// Log to a timestamped file in `log_dir`
    pub file_output: bool,
    /// Directory for log files
    pub log_dir: PathBuf,
    /// Number of log files to keep
    pub max_files: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: false,
            log_dir: default_log_dir(),
            max_files: 10,
        }
    }
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|mut p| {
            p.push("PixelShow");
            p.push("logs");
            p
        })
        .unwrap_or_else(|| PathBuf::from("logs"))
}

impl LogConfig {
    /// Parsed level, `INFO` when the name is not recognised
    pub fn parse_level(&self) -> Level {
        self.level.trim().parse().unwrap_or(Level::INFO)
    }

    /// Create the log directory if needed
    pub fn ensure_log_directory(&self) -> io::Result<()> {
        fs::create_dir_all(&self.log_dir)
    }

    /// Path of the log file for this process
    pub fn current_log_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.log_dir.join(format!("{}{}.log", LOG_FILE_PREFIX, stamp))
    }

    /// Delete the oldest log files, keeping at most `max_files`
    pub fn cleanup_old_logs(&self) -> io::Result<usize> {
        if !self.log_dir.exists() {
            return Ok(0);
        }

        let mut logs: Vec<PathBuf> = fs::read_dir(&self.log_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(LOG_FILE_PREFIX) && n.ends_with(".log"))
            })
            .collect();

        if logs.len() <= self.max_files {
            return Ok(0);
        }

        // Timestamped names sort chronologically
        logs.sort();
        let excess = logs.len() - self.max_files;
        let mut removed = 0;
        for path in logs.into_iter().take(excess) {
            fs::remove_file(&path)?;
            removed += 1;
        }
        Ok(removed)
    }
}
