//! When the current batch is rotated out.

use crate::batch::Batch;
use chrono::{DateTime, Utc};
use std::time::Duration;
use stream_config_and_utils::Config;

/// Which threshold a batch crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Count,
    Size,
    Age,
}

impl std::fmt::Display for Expiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expiry::Count => write!(f, "count"),
            Expiry::Size => write!(f, "size"),
            Expiry::Age => write!(f, "age"),
        }
    }
}

/// Rotation thresholds. A batch is expired as soon as any one is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_count: usize,
    /// Serialized size in bytes.
    pub max_size: usize,
    pub max_age: Duration,
}

impl RotationPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_count: config.batch_max_count,
            max_size: config.batch_max_size,
            max_age: config.batch_ttl(),
        }
    }

    /// Count or size threshold reached.
    pub fn is_full(&self, batch: &Batch) -> Option<Expiry> {
        if batch.len() >= self.max_count {
            Some(Expiry::Count)
        } else if batch.size() >= self.max_size {
            Some(Expiry::Size)
        } else {
            None
        }
    }

    pub fn expiry(&self, batch: &Batch, now: DateTime<Utc>) -> Option<Expiry> {
        self.is_full(batch).or_else(|| {
            let age = (now - batch.created_at()).to_std().unwrap_or_default();
            (age >= self.max_age).then_some(Expiry::Age)
        })
    }

    pub fn is_expired(&self, batch: &Batch, now: DateTime<Utc>) -> bool {
        self.expiry(batch, now).is_some()
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
