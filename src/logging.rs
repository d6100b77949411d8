//! Tracing setup for services embedding the engine: env-filtered stdout
//! output, plus a daily-rolling file appender when `SKILLFORGE_ENABLE_FILE_LOGS`
//! is set.

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "skillforge.log";

/// Keeps the non-blocking file writer flushing until dropped. Hold it for the
/// lifetime of the process.
pub struct FileLogGuard {
    _guard: WorkerGuard,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// Directory for rolled log files; `None` keeps output on stdout only.
    pub file_dir: Option<String>,
}

impl LoggingConfig {
    pub fn from_env() -> Self {
        let level =
            std::env::var("SKILLFORGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let file_logs = std::env::var("SKILLFORGE_ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let file_dir = file_logs.then(|| {
            std::env::var("SKILLFORGE_LOG_DIR").unwrap_or_else(|_| "./logs".to_string())
        });
        Self { level, file_dir }
    }
}

/// Initializes the global subscriber. Safe to call more than once; later
/// calls leave the first subscriber in place. Returns a guard only when the
/// file layer is active.
pub fn init_tracing(config: &LoggingConfig) -> Option<FileLogGuard> {
    let env_filter =
        EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_target(true);
    let base = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer);

    match config.file_dir.as_deref().and_then(file_writer) {
        Some((writer, guard)) => {
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            let _ = base.with(file_layer).try_init();
            Some(FileLogGuard { _guard: guard })
        }
        None => {
            let _ = base.try_init();
            None
        }
    }
}

fn file_writer(dir: &str) -> Option<(NonBlocking, WorkerGuard)> {
    if let Err(err) = std::fs::create_dir_all(dir) {
        eprintln!("failed to create log directory {dir}: {err}");
        return None;
    }
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
    Some(tracing_appender::non_blocking(appender))
}
