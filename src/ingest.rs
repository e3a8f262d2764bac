//! Upload pipeline orchestration.
//!
//! Coordinates the full staging flow for one document: parse → validate →
//! assign identifiers → detect duplicates → stage. The whole pipeline runs
//! synchronously and deterministically; the batch passes through
//! `uploaded → validating → validated` and every parsed block ends up
//! either staged or recorded as a parse error.

use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::dedup;
use crate::error::{Error, Result};
use crate::identifier::IdAssigner;
use crate::models::{
    BatchCounts, BatchStatus, BatchSummary, FieldError, RecordStatus, StagedRecord, UploadBatch,
};
use crate::parser;
use crate::store;
use crate::validate;

/// Parses `document_text` and stages every candidate under a new batch.
///
/// Malformed blocks become recorded parse errors; candidates that fail
/// validation (or exhaust the identifier space) are staged as
/// `validation_failed`; everything else is assigned an identifier and
/// checked for duplicates. Returns a summary of what was staged.
pub async fn create_batch(
    pool: &SqlitePool,
    config: &Config,
    document_text: &str,
    source_name: &str,
) -> Result<BatchSummary> {
    let parsed = parser::parse_document(document_text);
    info!(
        source_name,
        candidates = parsed.candidates.len(),
        parse_errors = parsed.errors.len(),
        "creating upload batch"
    );

    let batch_id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().timestamp();

    let batch = UploadBatch {
        batch_id: batch_id.clone(),
        source_name: source_name.to_string(),
        status: BatchStatus::Uploaded,
        created_at: now,
        version: 0,
        counts: BatchCounts {
            total: parsed.candidates.len() as i64,
            ..Default::default()
        },
    };
    store::insert_batch(pool, &batch).await?;
    store::insert_parse_errors(pool, &batch_id, &parsed.errors).await?;

    advance(pool, &batch_id, BatchStatus::Validating).await?;

    // Validate and assign identifiers in parse order. The assigner tracks
    // sequences per base key so repeated composites within the batch
    // number consecutively.
    let mut assigner = IdAssigner::new();
    let mut records = Vec::with_capacity(parsed.candidates.len());
    let mut validation_failed = 0usize;

    for (order, candidate) in parsed.candidates.iter().enumerate() {
        let mut errors = validate::validate_candidate(candidate, &config.taxonomy);
        let mut assigned_id = None;

        if errors.is_empty() {
            match assigner
                .assign(
                    pool,
                    &candidate.topic,
                    &candidate.subtopic,
                    &candidate.difficulty,
                    &candidate.qtype,
                )
                .await
            {
                Ok(id) => assigned_id = Some(id),
                Err(Error::IdentifierExhausted(base)) => {
                    errors.push(FieldError {
                        field: "assigned_id".to_string(),
                        message: format!("identifier space exhausted for base '{}'", base),
                    });
                }
                Err(other) => return Err(other),
            }
        }

        let status = if errors.is_empty() {
            RecordStatus::Pending
        } else {
            validation_failed += 1;
            RecordStatus::ValidationFailed
        };

        records.push(StagedRecord {
            staged_id: Uuid::new_v4().to_string(),
            batch_id: batch_id.clone(),
            parse_order: order as i64,
            source_line: candidate.source_line as i64,
            topic: candidate.topic.clone(),
            subtopic: candidate.subtopic.clone(),
            difficulty: candidate.difficulty.clone(),
            qtype: candidate.qtype.clone(),
            question: candidate.question.clone(),
            answer: candidate.answer.clone(),
            notes: candidate.notes.clone(),
            status,
            validation_errors: errors,
            assigned_id,
            import_error: None,
            created_at: now,
        });
    }

    store::stage_records(pool, &records).await?;

    let staged = store::fetch_all_records(pool, &batch_id).await?;
    let flagged = dedup::detect_batch(pool, &config.dedup, &staged).await?;

    advance(pool, &batch_id, BatchStatus::Validated).await?;

    info!(
        batch_id = %batch_id,
        staged = records.len(),
        validation_failed,
        duplicate_flagged = flagged.len(),
        "batch validated"
    );

    Ok(BatchSummary {
        batch_id,
        status: BatchStatus::Validated,
        staged: records.len(),
        parse_errors: parsed.errors,
        validation_failed,
        duplicate_flagged: flagged.len(),
    })
}

/// Moves the batch to `to` with a version-checked write, recomputing the
/// aggregate counts in the same transaction.
async fn advance(pool: &SqlitePool, batch_id: &str, to: BatchStatus) -> Result<()> {
    let batch = store::get_batch(pool, batch_id).await?;
    if !batch.status.can_transition(to) {
        return Err(Error::InvalidTransition {
            from: batch.status,
            to,
        });
    }
    let mut tx = pool.begin().await?;
    store::refresh_batch(&mut *tx, batch_id, batch.version, to).await?;
    tx.commit().await?;
    Ok(())
}
