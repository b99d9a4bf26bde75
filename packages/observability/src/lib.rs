//! # Observability
//!
//! Centralized tracing setup for the record stream crates.
//!
//! Library crates never install a subscriber themselves. They use the plain
//! `tracing` macros and leave it to the embedding application to call
//! [`init`] or [`init_with_config`] once at startup.
//!
//! Every event is written as one JSON object per line to an append-only file
//! (default `~/.record-stream/logs/stream.jsonl`), so a running outbox can be
//! followed with `tail -f stream.jsonl | jq`. An optional compact stderr layer
//! mirrors the same events for foreground runs.
//!
//! ## Usage
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "stream".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("outbox started");
//! ```

mod json_layer;
mod writer;

use std::path::PathBuf;

pub use json_layer::LogEntry;
pub use writer::CentralLogWriter;

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line for filtering.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional custom log file path.
    /// Defaults to `~/.record-stream/logs/stream.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr for immediate feedback.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Initialize the observability layer with default settings.
///
/// Returns quietly if a global subscriber is already installed.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize the observability layer with custom configuration.
///
/// Falls back to a stderr-only subscriber when the log file cannot be opened.
pub fn init_with_config(config: LogConfig) {
    writer::init_subscriber(&config);
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
