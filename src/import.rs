//! Importer: moves approved staged records into the authoritative store.
//!
//! Each record is inserted inside its own transaction; one failure never
//! rolls back or blocks a sibling. Identifiers are re-verified at insert
//! time — a concurrently imported batch may have claimed an id after it was
//! assigned — and a conflicting record is re-assigned once and retried once
//! before it is marked `import_failed`. Re-running the importer only
//! touches records that are not yet `imported`, so a second invocation is
//! idempotent for everything that already succeeded.
//!
//! Records reach this module only through the review path (approval
//! requires `pending`, and a flagged record re-enters `pending` solely via
//! a keep-new/keep-both resolution), so an approved record never carries an
//! unresolved or discarded duplicate.

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::batch::status_after_import;
use crate::error::{Error, Result};
use crate::identifier::IdAssigner;
use crate::models::{BatchStatus, ImportOutcome, RecordStatus, StagedRecord};
use crate::store;

/// Imports a batch's approved records. Requires `ready_to_import` (or a
/// finished import status, for retry runs). Returns one outcome per
/// attempted record, in parse order.
pub async fn import_batch(pool: &SqlitePool, batch_id: &str) -> Result<Vec<ImportOutcome>> {
    let batch = store::get_batch(pool, batch_id).await?;
    if !batch.status.importable() {
        return Err(Error::BatchNotImportable {
            batch_id: batch_id.to_string(),
            status: batch.status,
        });
    }

    // Claiming the version stamp here serializes importers: a second call
    // racing this one fails its conditional write and retries later.
    let mut tx = pool.begin().await?;
    store::refresh_batch(&mut *tx, batch_id, batch.version, BatchStatus::Importing).await?;
    tx.commit().await?;

    let records = store::fetch_all_records(pool, batch_id).await?;
    let eligible: Vec<&StagedRecord> = records
        .iter()
        .filter(|r| matches!(r.status, RecordStatus::Approved | RecordStatus::ImportFailed))
        .collect();

    info!(batch_id, eligible = eligible.len(), "import started");

    let mut outcomes = Vec::with_capacity(eligible.len());
    for record in eligible {
        let outcome = import_record(pool, batch_id, record).await?;
        if outcome.status == RecordStatus::ImportFailed {
            warn!(
                staged_id = %outcome.staged_id,
                reason = outcome.reason.as_deref().unwrap_or(""),
                "record import failed"
            );
        }
        outcomes.push(outcome);
    }

    let current = store::get_batch(pool, batch_id).await?;
    let mut tx = pool.begin().await?;
    let counts = store::recompute_counts(&mut *tx, batch_id).await?;
    let final_status = status_after_import(&counts);
    store::write_batch(&mut *tx, batch_id, current.version, final_status, &counts).await?;
    tx.commit().await?;

    info!(
        batch_id,
        imported = counts.imported,
        failed = counts.import_failed,
        status = %final_status,
        "import finished"
    );
    Ok(outcomes)
}

/// Attempts one record: insert under its assigned id, re-assigning and
/// retrying once on an identifier conflict. Failures are recorded on the
/// record and never propagate to siblings.
async fn import_record(
    pool: &SqlitePool,
    batch_id: &str,
    record: &StagedRecord,
) -> Result<ImportOutcome> {
    let mut assigner = IdAssigner::new();

    let assigned = match &record.assigned_id {
        Some(id) => id.clone(),
        None => {
            match assigner
                .assign(pool, &record.topic, &record.subtopic, &record.difficulty, &record.qtype)
                .await
            {
                Ok(id) => id,
                Err(Error::IdentifierExhausted(base)) => {
                    let reason = format!("identifier space exhausted for base '{}'", base);
                    return mark_failed(pool, record, None, reason).await;
                }
                Err(other) => return Err(other),
            }
        }
    };

    match try_insert(pool, batch_id, record, &assigned).await {
        Ok(true) => {
            return Ok(ImportOutcome {
                staged_id: record.staged_id.clone(),
                assigned_id: Some(assigned),
                status: RecordStatus::Imported,
                reason: None,
            });
        }
        Ok(false) => {}
        Err(Error::Db(db_err)) => {
            return mark_failed(pool, record, Some(&assigned), db_err.to_string()).await;
        }
        Err(other) => return Err(other),
    }

    // Identifier was claimed by another batch since assignment: re-assign
    // once and retry once.
    let reassigned = match assigner
        .assign(pool, &record.topic, &record.subtopic, &record.difficulty, &record.qtype)
        .await
    {
        Ok(id) => id,
        Err(Error::IdentifierExhausted(base)) => {
            let reason = format!("identifier space exhausted for base '{}'", base);
            return mark_failed(pool, record, Some(&assigned), reason).await;
        }
        Err(other) => return Err(other),
    };

    match try_insert(pool, batch_id, record, &reassigned).await {
        Ok(true) => Ok(ImportOutcome {
            staged_id: record.staged_id.clone(),
            assigned_id: Some(reassigned),
            status: RecordStatus::Imported,
            reason: None,
        }),
        Ok(false) => {
            let reason = format!(
                "identifier conflict: '{}' and retry '{}' both taken",
                assigned, reassigned
            );
            mark_failed(pool, record, Some(&reassigned), reason).await
        }
        Err(Error::Db(db_err)) => {
            mark_failed(pool, record, Some(&reassigned), db_err.to_string()).await
        }
        Err(other) => Err(other),
    }
}

/// Inserts the record into the authoritative store under `assigned_id`,
/// inside a single transaction that also marks the staged record imported.
/// Returns `Ok(false)` when the identifier is already taken.
async fn try_insert(
    pool: &SqlitePool,
    batch_id: &str,
    record: &StagedRecord,
    assigned_id: &str,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let taken: Option<i64> = sqlx::query_scalar("SELECT 1 FROM questions WHERE question_id = ?")
        .bind(assigned_id)
        .fetch_optional(&mut *tx)
        .await?;
    if taken.is_some() {
        return Ok(false);
    }

    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO questions (
            question_id, topic, subtopic, difficulty, qtype,
            question, answer, notes, source_batch, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(assigned_id)
    .bind(&record.topic)
    .bind(&record.subtopic)
    .bind(&record.difficulty)
    .bind(&record.qtype)
    .bind(&record.question)
    .bind(&record.answer)
    .bind(&record.notes)
    .bind(batch_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;

    sqlx::query("INSERT INTO questions_fts (question_id, question) VALUES (?, ?)")
        .bind(assigned_id)
        .bind(&record.question)
        .execute(&mut *tx)
        .await?;

    store::set_assigned_id(&mut *tx, &record.staged_id, assigned_id).await?;
    store::update_record_status(&mut *tx, &record.staged_id, RecordStatus::Imported).await?;
    store::set_import_error(&mut *tx, &record.staged_id, None).await?;

    tx.commit().await?;
    Ok(true)
}

async fn mark_failed(
    pool: &SqlitePool,
    record: &StagedRecord,
    assigned_id: Option<&str>,
    reason: String,
) -> Result<ImportOutcome> {
    let mut tx = pool.begin().await?;
    store::update_record_status(&mut *tx, &record.staged_id, RecordStatus::ImportFailed).await?;
    store::set_import_error(&mut *tx, &record.staged_id, Some(&reason)).await?;
    tx.commit().await?;

    Ok(ImportOutcome {
        staged_id: record.staged_id.clone(),
        assigned_id: assigned_id.map(|s| s.to_string()),
        status: RecordStatus::ImportFailed,
        reason: Some(reason),
    })
}
