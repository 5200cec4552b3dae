//! Document lifecycle state machine.
//!
//! ```text
//! UPLOADING ──Start──▶ PROCESSING ──Complete──▶ READY
//!     │                    │
//!     └───────Fail─────────┴──────Fail────────▶ FAILED
//! ```
//!
//! [`transition`] is pure: storage layers load the current status, apply
//! the event, and persist the result. Re-applying the event that produced
//! the current state is a no-op, and READY/FAILED accept nothing else.

use crate::error::RagError;
use crate::models::DocumentStatus;

/// An event in a document's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    /// Ingestion picked the document up.
    Start,
    /// At least the required share of chunks was embedded.
    Complete,
    /// Extraction, chunking, or every chunk failed.
    Fail,
}

/// Apply `event` to `current`, returning the next status.
///
/// # Errors
///
/// Returns a [`Storage`](crate::ErrorKind::Storage) error for transitions
/// the lifecycle does not allow, e.g. `READY + Start`.
pub fn transition(current: DocumentStatus, event: StatusEvent) -> Result<DocumentStatus, RagError> {
    use DocumentStatus::*;
    use StatusEvent::*;

    match (current, event) {
        (Uploading, Start) | (Processing, Start) => Ok(Processing),
        (Processing, Complete) | (Ready, Complete) => Ok(Ready),
        (Uploading, Fail) | (Processing, Fail) | (Failed, Fail) => Ok(Failed),
        (from, ev) => Err(RagError::storage(format!(
            "invalid status transition: {} on {:?}",
            from, ev
        ))),
    }
}
