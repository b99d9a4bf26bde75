//! On-disk layout of the outbox.
//!
//! ```text
//! <base>/current.pbt          batch being filled
//! <base>/accumulated/*.pbt    rotated, awaiting delivery
//! <base>/sent/*.pbt           delivered, kept for the retention window
//! ```

use crate::batch::{decode_filename, Batch};
use crate::OutboxResult;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::time::Duration;
use stream_config_and_utils::{Paths, BATCH_EXTENSION};
use tracing::{debug, info, warn};

/// Directory-backed batch storage.
#[derive(Debug, Clone)]
pub struct BatchStore {
    paths: Paths,
}

impl BatchStore {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Load the current batch left by a previous run, or start a new one.
    pub fn load_current(&self) -> OutboxResult<Batch> {
        let path = self.paths.current_batch_file();
        let batch = Batch::load_from_file(&path)?;
        if !batch.is_empty() {
            info!(operations = batch.len(), "Recovered pending operations from current batch");
        }
        Ok(batch)
    }

    pub fn save_current(&self, batch: &Batch) -> OutboxResult<()> {
        batch.save_to_file(&self.paths.current_batch_file())
    }

    /// Write `batch` into `accumulated/`.
    ///
    /// If a file with the same name already exists the batch's timestamp is
    /// bumped by a millisecond until the name is free.
    pub fn accumulate(&self, batch: &mut Batch) -> OutboxResult<PathBuf> {
        let dir = self.paths.accumulated_dir();
        while dir.join(batch.filename()).exists() {
            batch.set_created_at(batch.created_at() + chrono::Duration::milliseconds(1));
        }
        let path = batch.save_to_directory(&dir)?;
        debug!(
            batch = %batch.filename(),
            operations = batch.len(),
            priority = batch.is_priority(),
            "Batch accumulated"
        );
        Ok(path)
    }

    /// Accumulated batch files in delivery order: priority first, then
    /// oldest first.
    pub fn list_accumulated(&self) -> OutboxResult<Vec<PathBuf>> {
        list_batches(&self.paths.accumulated_dir())
    }

    pub fn has_accumulated(&self) -> OutboxResult<bool> {
        Ok(!self.list_accumulated()?.is_empty())
    }

    pub fn list_sent(&self) -> OutboxResult<Vec<PathBuf>> {
        list_batches(&self.paths.sent_dir())
    }

    /// Move a delivered batch from `accumulated/` to `sent/`.
    pub fn mark_sent(&self, batch: &Batch) -> OutboxResult<PathBuf> {
        batch.move_between_directories(&self.paths.accumulated_dir(), &self.paths.sent_dir())
    }

    /// Delete delivered batches older than `retention` as of `now`.
    ///
    /// Returns how many files were removed.
    pub fn purge_sent(&self, now: DateTime<Utc>, retention: Duration) -> OutboxResult<usize> {
        let mut removed = 0;
        for path in self.list_sent()? {
            let Some((created_at, _)) = decode_filename(&path) else {
                continue;
            };
            let age = (now - created_at).to_std().unwrap_or_default();
            if age > retention {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "Purged delivered batches past retention");
        }
        Ok(removed)
    }
}

/// Batch files in `dir`, sorted by name. Files whose names do not decode
/// are skipped.
fn list_batches(dir: &Path) -> OutboxResult<Vec<PathBuf>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(BATCH_EXTENSION) {
            continue;
        }
        if decode_filename(&path).is_none() {
            warn!(path = %path.display(), "Ignoring batch file with unexpected name");
            continue;
        }
        files.push(path);
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
