//! Durable client-side outbox for record mutations.
//!
//! Callers [`save`](BatchProcessor::save) and [`delete`](BatchProcessor::delete)
//! records; operations are buffered in a current batch on disk, rotated into
//! `accumulated/` when full or old, and delivered to the ingestion API by a
//! background loop. Delivered batches move to `sent/` and are pruned after a
//! retention window.
//!
//! ```text
//! save/delete ──▶ current.pbt ──rotate──▶ accumulated/*.pbt ──POST──▶ sent/*.pbt ──TTL──▶ ∅
//!                                              ▲                │
//!                                              └─ 0_*.pbt ◀─────┘ partial failure
//! ```
//!
//! Delivery is at-least-once; a later mutation of the same record replaces
//! the pending one inside the current batch.

mod batch;
mod error;
mod events;
mod operation;
mod pending;
mod processor;
mod rotation;
mod sender;
mod store;

pub use batch::{decode_filename, encode_filename, Batch, PRIORITY_PREFIX};
pub use error::{ErrorClass, OutboxError, OutboxResult};
pub use events::{AcceptAll, RecordValidator, StreamEvent, StreamObserver};
pub use operation::{Operation, OperationKey, Record};
pub use pending::{PendingResources, PENDING_RESOURCES_PAGE_SIZE};
pub use processor::{BatchProcessor, ProcessorConfig, ProcessorState};
pub use rotation::{Expiry, RotationPolicy};
pub use sender::{DataSender, DeliveryOutcome, ReportedOperation};
pub use store::BatchStore;
