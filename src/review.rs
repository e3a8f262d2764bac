//! Review orchestration.
//!
//! Approve/reject/resolve operations over a batch's staged records. Every
//! mutation validates its preconditions first, then applies the record
//! transitions, recomputes the owning batch's aggregate counts, and writes
//! batch status + counts in the same transaction as the record mutation —
//! the counts are never observably out of sync with the records. Batch
//! writes are keyed on the version stamp; losing the race yields
//! `ConcurrencyConflict` and the caller retries with fresh state.

use sqlx::SqlitePool;
use tracing::info;

use crate::batch::status_after_review;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    BatchStatus, RecordStatus, Resolution, StagedRecord, StagingDuplicate, UploadBatch,
};
use crate::store;

/// One page of a batch's records, optionally filtered by status.
pub async fn list_records(
    pool: &SqlitePool,
    config: &Config,
    batch_id: &str,
    status_filter: Option<&str>,
    page: i64,
) -> Result<Vec<StagedRecord>> {
    // Unknown batch and bogus filters are caller errors, not empty pages.
    store::get_batch(pool, batch_id).await?;
    let status = match status_filter {
        Some(s) => Some(
            RecordStatus::parse(s).ok_or_else(|| Error::InvalidStatusFilter(s.to_string()))?,
        ),
        None => None,
    };
    store::fetch_records_page(pool, batch_id, status, page, config.review.page_size).await
}

/// Applies approvals and rejections in one atomic step and returns the
/// refreshed batch.
///
/// Approval requires `pending`; rejection is also accepted from
/// `validation_failed` and `duplicate_flagged` (rejecting a flagged record
/// stands in for resolving it — the record leaves the unresolved set).
pub async fn review(
    pool: &SqlitePool,
    batch_id: &str,
    approvals: &[String],
    rejections: &[String],
) -> Result<UploadBatch> {
    let batch = store::get_batch(pool, batch_id).await?;
    if approvals.is_empty() && rejections.is_empty() {
        return Ok(batch);
    }
    if !batch.status.reviewable() {
        return Err(Error::InvalidTransition {
            from: batch.status,
            to: BatchStatus::Reviewing,
        });
    }

    // Check every precondition before mutating anything.
    let mut approve_ids = Vec::with_capacity(approvals.len());
    for staged_id in approvals {
        let record = fetch_in_batch(pool, batch_id, staged_id).await?;
        if record.status != RecordStatus::Pending {
            return Err(Error::RecordNotReviewable {
                staged_id: record.staged_id,
                status: record.status,
            });
        }
        approve_ids.push(record.staged_id);
    }
    let mut reject_ids = Vec::with_capacity(rejections.len());
    for staged_id in rejections {
        let record = fetch_in_batch(pool, batch_id, staged_id).await?;
        if !matches!(
            record.status,
            RecordStatus::Pending | RecordStatus::ValidationFailed | RecordStatus::DuplicateFlagged
        ) {
            return Err(Error::RecordNotReviewable {
                staged_id: record.staged_id,
                status: record.status,
            });
        }
        reject_ids.push(record.staged_id);
    }

    let mut tx = pool.begin().await?;
    for staged_id in &approve_ids {
        store::update_record_status(&mut *tx, staged_id, RecordStatus::Approved).await?;
    }
    for staged_id in &reject_ids {
        store::update_record_status(&mut *tx, staged_id, RecordStatus::Rejected).await?;
    }
    let counts = store::recompute_counts(&mut *tx, batch_id).await?;
    let next = status_after_review(&counts);
    store::write_batch(&mut *tx, batch_id, batch.version, next, &counts).await?;
    tx.commit().await?;

    info!(
        batch_id,
        approved = approve_ids.len(),
        rejected = reject_ids.len(),
        status = %next,
        "review applied"
    );
    store::get_batch(pool, batch_id).await
}

/// Resolves a flagged duplicate. `keep_new` and `keep_both` return the
/// record to the approval-eligible pool; `discard_new` rejects it;
/// `keep_existing` rejects it with the authoritative match already recorded
/// on the duplicate link as the reason.
pub async fn resolve_duplicate(
    pool: &SqlitePool,
    duplicate_id: &str,
    resolution: Resolution,
) -> Result<StagingDuplicate> {
    if resolution == Resolution::Unresolved {
        return Err(Error::InvalidResolution(resolution.to_string()));
    }

    let duplicate = store::fetch_duplicate(pool, duplicate_id).await?;
    let record = store::fetch_record(pool, &duplicate.staged_id).await?;
    let batch = store::get_batch(pool, &record.batch_id).await?;

    if !batch.status.reviewable() {
        return Err(Error::InvalidTransition {
            from: batch.status,
            to: BatchStatus::Reviewing,
        });
    }
    if record.status != RecordStatus::DuplicateFlagged {
        return Err(Error::RecordNotReviewable {
            staged_id: record.staged_id,
            status: record.status,
        });
    }

    let next_record_status = match resolution {
        Resolution::KeepNew | Resolution::KeepBoth => RecordStatus::Pending,
        Resolution::KeepExisting | Resolution::DiscardNew => RecordStatus::Rejected,
        Resolution::Unresolved => unreachable!(),
    };

    let mut tx = pool.begin().await?;
    store::set_duplicate_resolution(&mut *tx, duplicate_id, resolution).await?;
    store::update_record_status(&mut *tx, &record.staged_id, next_record_status).await?;
    let counts = store::recompute_counts(&mut *tx, &record.batch_id).await?;
    let next = status_after_review(&counts);
    store::write_batch(&mut *tx, &record.batch_id, batch.version, next, &counts).await?;
    tx.commit().await?;

    info!(
        duplicate_id,
        staged_id = %record.staged_id,
        resolution = %resolution,
        record_status = %next_record_status,
        "duplicate resolved"
    );
    store::fetch_duplicate(pool, duplicate_id).await
}

/// Discards a batch before import begins. The batch moves to `failed` and
/// no authoritative writes ever occur for it.
pub async fn discard_batch(pool: &SqlitePool, batch_id: &str) -> Result<UploadBatch> {
    let batch = store::get_batch(pool, batch_id).await?;
    if !batch.status.discardable() {
        return Err(Error::InvalidTransition {
            from: batch.status,
            to: BatchStatus::Failed,
        });
    }

    let mut tx = pool.begin().await?;
    store::refresh_batch(&mut *tx, batch_id, batch.version, BatchStatus::Failed).await?;
    tx.commit().await?;

    info!(batch_id, "batch discarded");
    store::get_batch(pool, batch_id).await
}

async fn fetch_in_batch(
    pool: &SqlitePool,
    batch_id: &str,
    staged_id: &str,
) -> Result<StagedRecord> {
    let record = store::fetch_record(pool, staged_id).await?;
    if record.batch_id != batch_id {
        return Err(Error::RecordNotFound(staged_id.to_string()));
    }
    Ok(record)
}
