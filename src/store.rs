//! Staging store persistence.
//!
//! All reads and writes for upload batches, staged records, duplicate links,
//! and recorded parse errors. Batch rows are never written unconditionally:
//! every mutation goes through [`refresh_batch`], which recomputes the
//! aggregate counts from the records and performs a conditional write keyed
//! on the batch's version stamp. A stale version means another caller won
//! the race, and the operation fails with `ConcurrencyConflict` instead of
//! silently overwriting.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::error::{Error, Result};
use crate::models::{
    BatchCounts, BatchStatus, FieldError, MatchKind, ParseError, RecordStatus, Resolution,
    StagedRecord, StagingDuplicate, UploadBatch,
};

fn decode_err(message: String) -> Error {
    Error::Db(sqlx::Error::Decode(message.into()))
}

fn batch_from_row(row: &SqliteRow) -> Result<UploadBatch> {
    let status_str: String = row.get("status");
    let status = BatchStatus::parse(&status_str)
        .ok_or_else(|| decode_err(format!("unknown batch status '{}'", status_str)))?;
    Ok(UploadBatch {
        batch_id: row.get("batch_id"),
        source_name: row.get("source_name"),
        status,
        created_at: row.get("created_at"),
        version: row.get("version"),
        counts: BatchCounts {
            total: row.get("total_records"),
            pending: row.get("pending_count"),
            validation_failed: row.get("validation_failed_count"),
            duplicate_flagged: row.get("duplicate_flagged_count"),
            approved: row.get("approved_count"),
            rejected: row.get("rejected_count"),
            imported: row.get("imported_count"),
            import_failed: row.get("import_failed_count"),
        },
    })
}

fn record_from_row(row: &SqliteRow) -> Result<StagedRecord> {
    let status_str: String = row.get("status");
    let status = RecordStatus::parse(&status_str)
        .ok_or_else(|| decode_err(format!("unknown record status '{}'", status_str)))?;
    let errors_json: String = row.get("validation_errors");
    let validation_errors: Vec<FieldError> = serde_json::from_str(&errors_json)?;
    Ok(StagedRecord {
        staged_id: row.get("staged_id"),
        batch_id: row.get("batch_id"),
        parse_order: row.get("parse_order"),
        source_line: row.get("source_line"),
        topic: row.get("topic"),
        subtopic: row.get("subtopic"),
        difficulty: row.get("difficulty"),
        qtype: row.get("qtype"),
        question: row.get("question"),
        answer: row.get("answer"),
        notes: row.get("notes"),
        status,
        validation_errors,
        assigned_id: row.get("assigned_id"),
        import_error: row.get("import_error"),
        created_at: row.get("created_at"),
    })
}

fn duplicate_from_row(row: &SqliteRow) -> Result<StagingDuplicate> {
    let kind_str: String = row.get("match_kind");
    let match_kind = MatchKind::parse(&kind_str)
        .ok_or_else(|| decode_err(format!("unknown match kind '{}'", kind_str)))?;
    let resolution_str: String = row.get("resolution");
    let resolution = Resolution::parse(&resolution_str)
        .ok_or_else(|| decode_err(format!("unknown resolution '{}'", resolution_str)))?;
    Ok(StagingDuplicate {
        duplicate_id: row.get("duplicate_id"),
        staged_id: row.get("staged_id"),
        match_kind,
        matched_ref: row.get("matched_ref"),
        similarity: row.get("similarity"),
        resolution,
    })
}

// ============ Batches ============

pub async fn insert_batch(pool: &SqlitePool, batch: &UploadBatch) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO upload_batches (batch_id, source_name, status, version, created_at, total_records)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&batch.batch_id)
    .bind(&batch.source_name)
    .bind(batch.status.as_str())
    .bind(batch.version)
    .bind(batch.created_at)
    .bind(batch.counts.total)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn get_batch(pool: &SqlitePool, batch_id: &str) -> Result<UploadBatch> {
    let row = sqlx::query("SELECT * FROM upload_batches WHERE batch_id = ?")
        .bind(batch_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::BatchNotFound(batch_id.to_string()))?;
    batch_from_row(&row)
}

pub async fn list_batches(
    pool: &SqlitePool,
    status_filter: Option<BatchStatus>,
    page: i64,
    page_size: i64,
) -> Result<Vec<UploadBatch>> {
    let offset = (page.max(1) - 1) * page_size;
    let rows = match status_filter {
        Some(status) => {
            sqlx::query(
                r#"
                SELECT * FROM upload_batches WHERE status = ?
                ORDER BY created_at DESC, batch_id ASC LIMIT ? OFFSET ?
                "#,
            )
            .bind(status.as_str())
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT * FROM upload_batches
                ORDER BY created_at DESC, batch_id ASC LIMIT ? OFFSET ?
                "#,
            )
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };
    rows.iter().map(batch_from_row).collect()
}

/// Recomputes the batch's aggregate counts from its records and writes them
/// together with `status`, keyed on `expected_version`. Zero rows updated
/// means the stamp was stale.
pub async fn refresh_batch(
    conn: &mut SqliteConnection,
    batch_id: &str,
    expected_version: i64,
    status: BatchStatus,
) -> Result<BatchCounts> {
    let counts = recompute_counts(&mut *conn, batch_id).await?;
    write_batch(conn, batch_id, expected_version, status, &counts).await?;
    Ok(counts)
}

/// Conditional batch write keyed on the version stamp. The counts must come
/// from [`recompute_counts`] inside the same transaction.
pub async fn write_batch(
    conn: &mut SqliteConnection,
    batch_id: &str,
    expected_version: i64,
    status: BatchStatus,
    counts: &BatchCounts,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        UPDATE upload_batches SET
            status = ?,
            version = version + 1,
            total_records = ?,
            pending_count = ?,
            validation_failed_count = ?,
            duplicate_flagged_count = ?,
            approved_count = ?,
            rejected_count = ?,
            imported_count = ?,
            import_failed_count = ?
        WHERE batch_id = ? AND version = ?
        "#,
    )
    .bind(status.as_str())
    .bind(counts.total)
    .bind(counts.pending)
    .bind(counts.validation_failed)
    .bind(counts.duplicate_flagged)
    .bind(counts.approved)
    .bind(counts.rejected)
    .bind(counts.imported)
    .bind(counts.import_failed)
    .bind(batch_id)
    .bind(expected_version)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(Error::ConcurrencyConflict(batch_id.to_string()));
    }
    Ok(())
}

pub async fn recompute_counts(
    conn: &mut SqliteConnection,
    batch_id: &str,
) -> Result<BatchCounts> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM staged_records WHERE batch_id = ? GROUP BY status",
    )
    .bind(batch_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut counts = BatchCounts::default();
    for row in &rows {
        let status_str: String = row.get("status");
        let n: i64 = row.get("n");
        let status = RecordStatus::parse(&status_str)
            .ok_or_else(|| decode_err(format!("unknown record status '{}'", status_str)))?;
        counts.total += n;
        match status {
            RecordStatus::Pending => counts.pending += n,
            RecordStatus::ValidationFailed => counts.validation_failed += n,
            RecordStatus::DuplicateFlagged => counts.duplicate_flagged += n,
            RecordStatus::Approved => counts.approved += n,
            RecordStatus::Rejected => counts.rejected += n,
            RecordStatus::Imported => counts.imported += n,
            RecordStatus::ImportFailed => counts.import_failed += n,
        }
    }
    Ok(counts)
}

// ============ Parse errors ============

pub async fn insert_parse_errors(
    pool: &SqlitePool,
    batch_id: &str,
    errors: &[ParseError],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for err in errors {
        sqlx::query("INSERT INTO upload_parse_errors (batch_id, line, reason) VALUES (?, ?, ?)")
            .bind(batch_id)
            .bind(err.line as i64)
            .bind(&err.reason)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn fetch_parse_errors(pool: &SqlitePool, batch_id: &str) -> Result<Vec<ParseError>> {
    let rows =
        sqlx::query("SELECT line, reason FROM upload_parse_errors WHERE batch_id = ? ORDER BY line")
            .bind(batch_id)
            .fetch_all(pool)
            .await?;
    Ok(rows
        .iter()
        .map(|row| ParseError {
            line: row.get::<i64, _>("line") as usize,
            reason: row.get("reason"),
        })
        .collect())
}

// ============ Staged records ============

pub async fn stage_records(pool: &SqlitePool, records: &[StagedRecord]) -> Result<()> {
    let mut tx = pool.begin().await?;
    for record in records {
        let errors_json = serde_json::to_string(&record.validation_errors)?;
        sqlx::query(
            r#"
            INSERT INTO staged_records (
                staged_id, batch_id, parse_order, source_line,
                topic, subtopic, difficulty, qtype, question, answer, notes,
                status, validation_errors, assigned_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.staged_id)
        .bind(&record.batch_id)
        .bind(record.parse_order)
        .bind(record.source_line)
        .bind(&record.topic)
        .bind(&record.subtopic)
        .bind(&record.difficulty)
        .bind(&record.qtype)
        .bind(&record.question)
        .bind(&record.answer)
        .bind(&record.notes)
        .bind(record.status.as_str())
        .bind(errors_json)
        .bind(&record.assigned_id)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

pub async fn fetch_record(pool: &SqlitePool, staged_id: &str) -> Result<StagedRecord> {
    let row = sqlx::query("SELECT * FROM staged_records WHERE staged_id = ?")
        .bind(staged_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::RecordNotFound(staged_id.to_string()))?;
    record_from_row(&row)
}

/// All records of a batch in parse order.
pub async fn fetch_all_records(pool: &SqlitePool, batch_id: &str) -> Result<Vec<StagedRecord>> {
    let rows = sqlx::query("SELECT * FROM staged_records WHERE batch_id = ? ORDER BY parse_order")
        .bind(batch_id)
        .fetch_all(pool)
        .await?;
    rows.iter().map(record_from_row).collect()
}

/// One page of a batch's records, optionally filtered by status.
pub async fn fetch_records_page(
    pool: &SqlitePool,
    batch_id: &str,
    status_filter: Option<RecordStatus>,
    page: i64,
    page_size: i64,
) -> Result<Vec<StagedRecord>> {
    let offset = (page.max(1) - 1) * page_size;
    let rows = match status_filter {
        Some(status) => {
            sqlx::query(
                r#"
                SELECT * FROM staged_records WHERE batch_id = ? AND status = ?
                ORDER BY parse_order LIMIT ? OFFSET ?
                "#,
            )
            .bind(batch_id)
            .bind(status.as_str())
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT * FROM staged_records WHERE batch_id = ?
                ORDER BY parse_order LIMIT ? OFFSET ?
                "#,
            )
            .bind(batch_id)
            .bind(page_size)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };
    rows.iter().map(record_from_row).collect()
}

pub async fn update_record_status(
    conn: &mut SqliteConnection,
    staged_id: &str,
    status: RecordStatus,
) -> Result<()> {
    sqlx::query("UPDATE staged_records SET status = ? WHERE staged_id = ?")
        .bind(status.as_str())
        .bind(staged_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_assigned_id(
    conn: &mut SqliteConnection,
    staged_id: &str,
    assigned_id: &str,
) -> Result<()> {
    sqlx::query("UPDATE staged_records SET assigned_id = ? WHERE staged_id = ?")
        .bind(assigned_id)
        .bind(staged_id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_import_error(
    conn: &mut SqliteConnection,
    staged_id: &str,
    reason: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE staged_records SET import_error = ? WHERE staged_id = ?")
        .bind(reason)
        .bind(staged_id)
        .execute(conn)
        .await?;
    Ok(())
}

// ============ Duplicates ============

pub async fn insert_duplicate(
    conn: &mut SqliteConnection,
    duplicate: &StagingDuplicate,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO staging_duplicates (duplicate_id, staged_id, match_kind, matched_ref, similarity, resolution)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&duplicate.duplicate_id)
    .bind(&duplicate.staged_id)
    .bind(duplicate.match_kind.as_str())
    .bind(&duplicate.matched_ref)
    .bind(duplicate.similarity)
    .bind(duplicate.resolution.as_str())
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_duplicate(pool: &SqlitePool, duplicate_id: &str) -> Result<StagingDuplicate> {
    let row = sqlx::query("SELECT * FROM staging_duplicates WHERE duplicate_id = ?")
        .bind(duplicate_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::DuplicateNotFound(duplicate_id.to_string()))?;
    duplicate_from_row(&row)
}

pub async fn fetch_duplicate_for_record(
    pool: &SqlitePool,
    staged_id: &str,
) -> Result<Option<StagingDuplicate>> {
    let row = sqlx::query("SELECT * FROM staging_duplicates WHERE staged_id = ?")
        .bind(staged_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(duplicate_from_row).transpose()
}

/// All duplicate links for a batch's records, in parse order.
pub async fn fetch_batch_duplicates(
    pool: &SqlitePool,
    batch_id: &str,
) -> Result<Vec<StagingDuplicate>> {
    let rows = sqlx::query(
        r#"
        SELECT d.* FROM staging_duplicates d
        JOIN staged_records r ON r.staged_id = d.staged_id
        WHERE r.batch_id = ?
        ORDER BY r.parse_order
        "#,
    )
    .bind(batch_id)
    .fetch_all(pool)
    .await?;
    rows.iter().map(duplicate_from_row).collect()
}

pub async fn set_duplicate_resolution(
    conn: &mut SqliteConnection,
    duplicate_id: &str,
    resolution: Resolution,
) -> Result<()> {
    sqlx::query("UPDATE staging_duplicates SET resolution = ? WHERE duplicate_id = ?")
        .bind(resolution.as_str())
        .bind(duplicate_id)
        .execute(conn)
        .await?;
    Ok(())
}
