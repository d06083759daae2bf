//! Tracing setup
//!
//! - Console: colored, compact format
//! - File (optional): daily rotation under `LogConfig::log_dir`

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default log file prefix (files look like `mcpool.2026-01-22.log`)
const LOG_PREFIX: &str = "mcpool";

/// Logging options for hosts embedding the pool.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Directory for rotated log files; console only when `None`
    pub log_dir: Option<PathBuf>,
    /// Filter used when `RUST_LOG` is unset (e.g. "info,mcpool_mcp=trace")
    pub default_filter: Option<String>,
    /// Colored console output
    pub ansi: bool,
}

impl LogConfig {
    pub fn console() -> Self {
        Self {
            ansi: true,
            ..Default::default()
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_default_filter(mut self, filter: impl Into<String>) -> Self {
        self.default_filter = Some(filter.into());
        self
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    // RUST_LOG takes precedence
    EnvFilter::try_from_default_env().unwrap_or_else(|_| match &config.default_filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::new("info,mcpool_core=debug,mcpool_mcp=debug"),
    })
}

/// Install the global subscriber.
///
/// Returns the file writer guard when file logging is enabled; it must be kept
/// alive for the duration of the program. A subscriber that is already
/// installed is left in place.
pub fn init_tracing(config: LogConfig) -> Option<WorkerGuard> {
    let console_layer = fmt::layer()
        .with_ansi(config.ansi)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    let mut guard = None;
    let file_layer = config.log_dir.as_ref().and_then(|dir| {
        if let Err(e) = std::fs::create_dir_all(dir) {
            eprintln!("Warning: Failed to create logs directory: {}", e);
            return None;
        }
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_PREFIX)
            .filename_suffix("log")
            .build(dir)
            .map_err(|e| eprintln!("Warning: Failed to create log file appender: {}", e))
            .ok()?;
        let (writer, file_guard) = tracing_appender::non_blocking(appender);
        guard = Some(file_guard);
        Some(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true)
                .boxed(),
        )
    });

    let _ = tracing_subscriber::registry()
        .with(env_filter(&config))
        .with(console_layer)
        .with(file_layer)
        .try_init();

    guard
}
