//! Structured logging initialization.
//!
//! Console output is always on; a rolling file appender is added when
//! the config enables it. The security log mirrors its audit entries
//! through this pipeline at their mapped levels, so format, filtering,
//! and file rotation apply to the audit trail as well.

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

/// Initialize the global subscriber from config.
///
/// Returns the file writer's flush guard when file logging is active;
/// the caller holds it for the process lifetime so buffered lines are
/// flushed on shutdown.
pub fn init_with_config(cfg: &LoggingConfig) -> Option<WorkerGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(console_layer(cfg.format));

    let mut guard = None;
    if cfg.enable_file_logging {
        match file_writer(cfg) {
            Some((writer, file_guard)) => {
                layers.push(file_layer(cfg.format, writer));
                guard = Some(file_guard);
            }
            None => {
                eprintln!(
                    "Failed to create log directory '{}', continuing with console logs only",
                    cfg.dir
                );
            }
        }
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(resolve_filter(cfg))
        .try_init();
    guard
}

/// Filter precedence: config level, then the RUST_LOG environment
/// variable, then "info".
fn resolve_filter(cfg: &LoggingConfig) -> EnvFilter {
    match &cfg.level {
        Some(level) => EnvFilter::new(level.as_str()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

fn console_layer(format: LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(std::io::stdout)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, writer: NonBlocking) -> Box<dyn Layer<Registry> + Send + Sync> {
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_timer(UtcTime::rfc_3339())
            .with_writer(writer)
            .boxed(),
    }
}

/// Build the non-blocking rolling file writer, or None when the log
/// directory cannot be created.
fn file_writer(cfg: &LoggingConfig) -> Option<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(&cfg.dir).ok()?;

    let rotation = match cfg.rotation.to_lowercase().as_str() {
        "hourly" => tracing_appender::rolling::Rotation::HOURLY,
        "never" => tracing_appender::rolling::Rotation::NEVER,
        _ => tracing_appender::rolling::Rotation::DAILY,
    };
    let appender =
        tracing_appender::rolling::RollingFileAppender::new(rotation, &cfg.dir, &cfg.filename);
    Some(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_config_level_wins_over_environment() {
        let cfg = LoggingConfig {
            level: Some(LogLevel::Debug),
            ..Default::default()
        };
        assert_eq!(resolve_filter(&cfg).to_string(), "debug");
    }

    #[test]
    fn test_missing_level_falls_back_to_info() {
        std::env::remove_var("RUST_LOG");
        let cfg = LoggingConfig::default();
        assert_eq!(resolve_filter(&cfg).to_string(), "info");
    }
}
