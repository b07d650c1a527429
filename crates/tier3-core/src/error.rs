//! Engine-level errors.
//!
//! Only infrastructure faults surface here. Decision outcomes — invalid
//! loyalty id, age not verified, unknown UPC — are ordinary field values that
//! flow through the pipeline and end up in the response.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A storage operation failed; the request aborts after the
    /// validation-log best effort already made in stage one.
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    /// The age-verification audit row could not be persisted. Fatal: the
    /// row is legally required before any response leaves the engine.
    #[error("age verification audit write failed: {0}")]
    AvtAuditWrite(StoreError),

    /// The transaction and its lines could not be persisted.
    #[error("transaction write failed: {0}")]
    TransactionWrite(StoreError),
}
