//! Tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured filter. Events always go to stderr;
//! when a log directory is configured they are also written, without ANSI
//! colours, to a daily rolling file in that directory.

use crate::config::{AppConfig, APP_ID};
use crate::error::{AppError, Result, ResultExt};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter from `RUST_LOG`, falling back to `fallback`.
pub fn env_filter(fallback: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .map_err(|e| AppError::Logging(format!("Failed to create log filter: {}", e)))
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped and must be held
/// for the life of the process.
pub fn init_logging(config: &AppConfig) -> Result<Option<WorkerGuard>> {
    let filter = env_filter(config.log_filter())?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_names(true)
        .compact();

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, format!("{}.log", APP_ID));
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Logging(format!("Failed to install subscriber: {}", e)))?;

    Ok(guard)
}

/// Route events to the test harness. Safe to call repeatedly.
#[cfg(test)]
pub fn init_test_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("vision_stream=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer().with_target(false).compact())
            .try_init()
            .ok();
    });
}
