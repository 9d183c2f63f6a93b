//! Tracing subscriber installation.

use anyhow::{Context, Result};
use pixelshow_core::LogConfig;
use std::fs::File;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// Keeps the file writer thread alive; hold it until exit
pub struct LogGuard {
    _guard: WorkerGuard,
}

/// Install console and file logging as configured. `RUST_LOG` overrides the
/// configured level.
pub fn init(config: &LogConfig) -> Result<Option<LogGuard>> {
    let filter = || {
        EnvFilter::builder()
            .with_default_directive(config.parse_level().into())
            .from_env_lossy()
    };

    // stdout is reserved for the show summary
    let console_layer = config.console_output.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter())
    });

    let (file_layer, guard) = if config.file_output {
        config
            .ensure_log_directory()
            .context("Failed to create log directory")?;
        if let Err(e) = config.cleanup_old_logs() {
            eprintln!("Warning: failed to clean up old log files: {}", e);
        }

        let log_path = config.current_log_path();
        let file = File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        let (writer, worker_guard) = tracing_appender::non_blocking(file);
        eprintln!("Logging to file: {:?}", log_path);

        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(filter());
        (Some(layer), Some(LogGuard { _guard: worker_guard }))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::debug!("Logging initialized at level {}", config.level);
    Ok(guard)
}
