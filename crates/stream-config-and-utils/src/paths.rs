//! File system layout of the outbox.

use crate::{CoreError, CoreResult};
use std::path::PathBuf;

/// Extension shared by every batch file.
pub const BATCH_EXTENSION: &str = "pbt";

/// Directory created under the working directory when no base is configured.
const DEFAULT_DIR_NAME: &str = ".stream";

/// Environment variable overriding the parent of the outbox directory.
const BASEDIR_ENV: &str = "STREAM_BASEDIR";

/// Manages file system paths for the outbox.
///
/// ```text
/// <base>/current.pbt      the mutable batch being filled
/// <base>/accumulated/     rotated batches waiting for delivery
/// <base>/sent/            delivered batches kept for the retention window
/// <base>/logs/            JSONL log output
/// <base>/config.json
/// ```
#[derive(Debug, Clone)]
pub struct Paths {
    base_dir: PathBuf,
}

impl Paths {
    /// Resolve the outbox directory as `<STREAM_BASEDIR or cwd>/.stream`.
    pub fn new() -> CoreResult<Self> {
        let parent = match std::env::var(BASEDIR_ENV) {
            Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir.trim()),
            _ => std::env::current_dir().map_err(|e| {
                CoreError::Path(format!("Could not determine working directory: {}", e))
            })?,
        };

        Ok(Self {
            base_dir: parent.join(DEFAULT_DIR_NAME),
        })
    }

    /// Create a new Paths instance rooted at exactly `base_dir`.
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the outbox base directory.
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the current batch file path (`<base>/current.pbt`).
    pub fn current_batch_file(&self) -> PathBuf {
        self.base_dir.join(format!("current.{}", BATCH_EXTENSION))
    }

    /// Get the directory of batches awaiting delivery.
    pub fn accumulated_dir(&self) -> PathBuf {
        self.base_dir.join("accumulated")
    }

    /// Get the directory of delivered batches.
    pub fn sent_dir(&self) -> PathBuf {
        self.base_dir.join("sent")
    }

    /// Get the config file path (`<base>/config.json`).
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the logs directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Get the JSONL log file path.
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("stream.jsonl")
    }

    /// Ensure all required directories exist.
    pub fn ensure_dirs(&self) -> CoreResult<()> {
        std::fs::create_dir_all(&self.base_dir)?;
        std::fs::create_dir_all(self.accumulated_dir())?;
        std::fs::create_dir_all(self.sent_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_paths_with_base_dir() {
        let base = PathBuf::from("/tmp/test-stream");
        let paths = Paths::with_base_dir(base.clone());

        assert_eq!(paths.base_dir(), &base);
        assert_eq!(paths.current_batch_file(), base.join("current.pbt"));
        assert_eq!(paths.accumulated_dir(), base.join("accumulated"));
        assert_eq!(paths.sent_dir(), base.join("sent"));
        assert_eq!(paths.config_file(), base.join("config.json"));
        assert_eq!(paths.logs_dir(), base.join("logs"));
        assert_eq!(paths.log_file(), base.join("logs/stream.jsonl"));
    }

    #[test]
    fn test_ensure_dirs_creates_directories() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("stream");
        let paths = Paths::with_base_dir(base.clone());

        assert!(!base.exists());

        paths.ensure_dirs().unwrap();

        assert!(base.is_dir());
        assert!(paths.accumulated_dir().is_dir());
        assert!(paths.sent_dir().is_dir());
        assert!(paths.logs_dir().is_dir());
    }

    #[test]
    fn test_ensure_dirs_idempotent() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();

        assert!(paths.accumulated_dir().exists());
    }

    #[test]
    fn test_new_ends_with_default_dir_name() {
        let paths = Paths::new().unwrap();
        assert!(paths.base_dir().ends_with(DEFAULT_DIR_NAME));
    }
}
