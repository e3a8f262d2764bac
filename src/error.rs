//! Error taxonomy for staging operations.
//!
//! Record-scoped failures (parse errors, field validation errors, per-record
//! import failures) are recorded as data on the affected record and never
//! surface here; this enum covers the caller-facing failures that abort a
//! single operation.

use crate::models::{BatchStatus, RecordStatus};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("batch not found: {0}")]
    BatchNotFound(String),

    #[error("staged record not found: {0}")]
    RecordNotFound(String),

    #[error("staging duplicate not found: {0}")]
    DuplicateNotFound(String),

    #[error("invalid status filter: '{0}'")]
    InvalidStatusFilter(String),

    #[error("invalid duplicate resolution: '{0}'")]
    InvalidResolution(String),

    #[error("invalid batch transition: {from} -> {to}")]
    InvalidTransition {
        from: BatchStatus,
        to: BatchStatus,
    },

    #[error("record {staged_id} is not reviewable in status '{status}'")]
    RecordNotReviewable {
        staged_id: String,
        status: RecordStatus,
    },

    #[error("batch {batch_id} is not importable in status '{status}'")]
    BatchNotImportable {
        batch_id: String,
        status: BatchStatus,
    },

    #[error("batch {0} was modified concurrently; reload and retry")]
    ConcurrencyConflict(String),

    #[error("identifier space exhausted for base '{0}'")]
    IdentifierExhausted(String),

    #[error(transparent)]
    Db(#[from] sqlx::Error),

    #[error("corrupt validation error payload: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
