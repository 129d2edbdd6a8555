//! Tracing bootstrap for binaries and test harnesses embedding the engine.
//!
//! Stdout formatting is always on; a daily-rolling file layer is opt-in via
//! [`LogOptions::file_dir`]. The library itself only emits events and never
//! installs a subscriber.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_FILE_PREFIX: &str = "mastery-engine.log";

/// Where log output goes.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Filter directive, e.g. `"info"` or `"mastery_engine=debug"`.
    /// `None` means `"info"`.
    pub filter: Option<String>,
    /// Directory for the rolling file appender; `None` disables file output.
    pub file_dir: Option<String>,
}

impl LogOptions {
    /// Read `MASTERY_LOG` for the filter and, when `MASTERY_ENABLE_FILE_LOGS`
    /// is truthy, `MASTERY_LOG_DIR` (default `./logs`) for the file layer.
    pub fn from_env() -> Self {
        let filter = std::env::var("MASTERY_LOG").ok();
        let file_logs = std::env::var("MASTERY_ENABLE_FILE_LOGS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let file_dir =
            file_logs.then(|| std::env::var("MASTERY_LOG_DIR").unwrap_or_else(|_| "./logs".to_string()));
        Self { filter, file_dir }
    }
}

/// Keeps the non-blocking file writer flushing. Hold it for the process
/// lifetime when file logging is on.
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Calling it again leaves the existing
/// subscriber in place rather than panicking, so test binaries can
/// initialize freely.
pub fn init_tracing(options: &LogOptions) -> std::io::Result<LogGuard> {
    let filter = options.filter.as_deref().unwrap_or("info");
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let mut file_guard = None;
    let file_layer = match &options.file_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);
            Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .with(file_layer)
        .try_init()
        .ok();

    Ok(LogGuard { _file: file_guard })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_env_without_file_logs() {
        std::env::remove_var("MASTERY_ENABLE_FILE_LOGS");
        std::env::set_var("MASTERY_LOG", "debug");
        let options = LogOptions::from_env();
        assert_eq!(options.filter.as_deref(), Some("debug"));
        assert_eq!(options.file_dir, None);
        std::env::remove_var("MASTERY_LOG");
    }

    #[test]
    fn test_init_tracing_twice_is_safe() {
        let options = LogOptions::default();
        let first = init_tracing(&options).unwrap();
        let second = init_tracing(&options).unwrap();
        drop((first, second));
    }
}
