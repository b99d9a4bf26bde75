//! Lifecycle events and caller hooks.

use crate::error::ErrorClass;
use crate::operation::{OperationKey, Record};
use serde_json::Value;

/// Events published by the batch processor on its broadcast channel.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// A batch was posted to `/stream/data` and answered 200.
    BatchSent {
        batch: String,
        operations: usize,
        priority: bool,
        status: u16,
        response: Value,
    },
    /// The server reported failed operations that are not in the batch.
    /// The batch was archived and nothing was requeued.
    UnmatchedFailures {
        batch: String,
        reported: Vec<OperationKey>,
    },
    /// A tick failed. The scheduler keeps running.
    Error { class: ErrorClass, message: String },
}

/// Hooks consulted before an operation is queued. Returning `false`
/// cancels the operation.
pub trait StreamObserver: Send + Sync {
    fn before_save(&self, _record: &Record, _tenant_id: Option<&str>) -> bool {
        true
    }

    fn before_delete(&self, _record: &Record, _tenant_id: Option<&str>) -> bool {
        true
    }
}

/// Pluggable record validation for saves.
pub trait RecordValidator: Send + Sync {
    fn validate(&self, record: &Record) -> Result<(), String>;
}

/// Validator that accepts every record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl RecordValidator for AcceptAll {
    fn validate(&self, _record: &Record) -> Result<(), String> {
        Ok(())
    }
}
