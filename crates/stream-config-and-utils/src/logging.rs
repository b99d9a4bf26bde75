//! Logging initialization.
//!
//! Thin wrapper over the observability crate: structured JSONL goes to
//! `<base>/logs/stream.jsonl`, the level comes from `RUST_LOG` or the
//! configured default.

use crate::Paths;
use observability::LogConfig;

/// Service name written on every log line.
const SERVICE_NAME: &str = "record-stream";

/// Initialize the logging system for an embedding application.
///
/// Safe to call more than once; only the first call installs a subscriber.
///
/// ```ignore
/// let paths = Paths::new()?;
/// let config = Config::load(&paths)?;
/// init_logging(&config.log_level, &paths);
/// tracing::info!("outbox ready");
/// ```
pub fn init_logging(level: &str, paths: &Paths) {
    let also_stderr = std::env::var("STREAM_LOG_STDERR")
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false);

    observability::init_with_config(LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: default_directive(level),
        log_path: Some(paths.log_file()),
        also_stderr,
    });
}

/// Filter directive for `level`, falling back to `info` for unknown names.
fn default_directive(level: &str) -> String {
    parse_level(level).to_string().to_lowercase()
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
