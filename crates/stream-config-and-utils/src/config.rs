//! Configuration management for the outbox.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default ingestion API URL (can be overridden at compile time via STREAM_API_URL env var).
pub const DEFAULT_API_URL: &str = match option_env!("STREAM_API_URL") {
    Some(url) => url,
    None => "https://api.stream.local",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_BATCH_TTL_MS: u64 = 5 * 60 * 1000;
const DEFAULT_BATCH_MAX_SIZE: usize = 5 * 1024;
const DEFAULT_BATCH_MAX_COUNT: usize = 500;
const DEFAULT_TICK_INTERVAL_MS: u64 = 500;
const DEFAULT_SENT_RETENTION_SECS: u64 = 24 * 60 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

/// Outbox configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the ingestion API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Maximum age of the current batch before it is rotated.
    #[serde(default = "default_batch_ttl_ms")]
    pub batch_ttl_ms: u64,
    /// Serialized size (bytes) at which the current batch is rotated.
    #[serde(default = "default_batch_max_size")]
    pub batch_max_size: usize,
    /// Operation count at which the current batch is rotated.
    #[serde(default = "default_batch_max_count")]
    pub batch_max_count: usize,
    /// Delay between two scheduler ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// How long delivered batches stay in `sent/`.
    #[serde(default = "default_sent_retention_secs")]
    pub sent_retention_secs: u64,
    /// HTTP request timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Model kinds that can never be streamed.
    #[serde(default = "default_blocked_model_kinds")]
    pub blocked_model_kinds: Vec<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_batch_ttl_ms() -> u64 {
    DEFAULT_BATCH_TTL_MS
}

fn default_batch_max_size() -> usize {
    DEFAULT_BATCH_MAX_SIZE
}

fn default_batch_max_count() -> usize {
    DEFAULT_BATCH_MAX_COUNT
}

fn default_tick_interval_ms() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_sent_retention_secs() -> u64 {
    DEFAULT_SENT_RETENTION_SECS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_blocked_model_kinds() -> Vec<String> {
    vec!["ASSINANTE".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            batch_ttl_ms: DEFAULT_BATCH_TTL_MS,
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
            batch_max_count: DEFAULT_BATCH_MAX_COUNT,
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            sent_retention_secs: DEFAULT_SENT_RETENTION_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            blocked_model_kinds: default_blocked_model_kinds(),
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from `<base>/config.json`, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        std::fs::create_dir_all(paths.base_dir())?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("STREAM_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(api_url) = std::env::var("STREAM_API_URL") {
            if !api_url.trim().is_empty() {
                self.api_url = api_url.trim().to_string();
            }
        }
    }

    /// Reject thresholds that would make the outbox rotate on every tick or never tick.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_max_count == 0 {
            return Err(CoreError::Config("batch_max_count must be positive".into()));
        }
        if self.batch_max_size == 0 {
            return Err(CoreError::Config("batch_max_size must be positive".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(CoreError::Config("tick_interval_ms must be positive".into()));
        }
        self.api_url()?;
        Ok(())
    }

    /// Get the API URL as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    pub fn batch_ttl(&self) -> Duration {
        Duration::from_millis(self.batch_ttl_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn sent_retention(&self) -> Duration {
        Duration::from_secs(self.sent_retention_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.api_url, DEFAULT_API_URL);
        assert_eq!(config.batch_ttl(), Duration::from_secs(300));
        assert_eq!(config.batch_max_size, 5120);
        assert_eq!(config.batch_max_count, 500);
        assert_eq!(config.tick_interval(), Duration::from_millis(500));
        assert_eq!(config.sent_retention(), Duration::from_secs(86_400));
        assert_eq!(config.blocked_model_kinds, vec!["ASSINANTE".to_string()]);
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        let config_json = r#"{
            "log_level": "debug",
            "batch_max_count": 2
        }"#;

        std::fs::write(&config_path, config_json).unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.batch_max_count, 2);
        assert_eq!(config.batch_max_size, 5120);
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().join("stream"));

        let config = Config {
            batch_ttl_ms: 1_000,
            sent_retention_secs: 60,
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load(&paths).unwrap();
        assert_eq!(loaded.batch_ttl_ms, 1_000);
        assert_eq!(loaded.sent_retention_secs, 60);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.batch_max_count, 500);
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let config = Config {
            batch_max_count: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::Config(_))));

        let config = Config {
            tick_interval_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_invalid_url() {
        let config = Config {
            api_url: "not a valid url".to_string(),
            ..Config::default()
        };
        assert!(matches!(config.api_url(), Err(CoreError::InvalidUrl(_))));
    }
}
