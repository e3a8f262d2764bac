use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates all tables and indexes. Idempotent — safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Authoritative content table. Physically distinct from staging.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            question_id TEXT PRIMARY KEY,
            topic TEXT NOT NULL,
            subtopic TEXT NOT NULL,
            difficulty TEXT NOT NULL,
            qtype TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            notes TEXT,
            source_batch TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_batches (
            batch_id TEXT PRIMARY KEY,
            source_name TEXT NOT NULL,
            status TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            total_records INTEGER NOT NULL DEFAULT 0,
            pending_count INTEGER NOT NULL DEFAULT 0,
            validation_failed_count INTEGER NOT NULL DEFAULT 0,
            duplicate_flagged_count INTEGER NOT NULL DEFAULT 0,
            approved_count INTEGER NOT NULL DEFAULT 0,
            rejected_count INTEGER NOT NULL DEFAULT 0,
            imported_count INTEGER NOT NULL DEFAULT 0,
            import_failed_count INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staged_records (
            staged_id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            parse_order INTEGER NOT NULL,
            source_line INTEGER NOT NULL,
            topic TEXT NOT NULL,
            subtopic TEXT NOT NULL,
            difficulty TEXT NOT NULL,
            qtype TEXT NOT NULL,
            question TEXT NOT NULL,
            answer TEXT NOT NULL,
            notes TEXT,
            status TEXT NOT NULL,
            validation_errors TEXT NOT NULL DEFAULT '[]',
            assigned_id TEXT,
            import_error TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(batch_id, parse_order),
            FOREIGN KEY (batch_id) REFERENCES upload_batches(batch_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS staging_duplicates (
            duplicate_id TEXT PRIMARY KEY,
            staged_id TEXT NOT NULL UNIQUE,
            match_kind TEXT NOT NULL,
            matched_ref TEXT NOT NULL,
            similarity REAL NOT NULL,
            resolution TEXT NOT NULL DEFAULT 'unresolved',
            FOREIGN KEY (staged_id) REFERENCES staged_records(staged_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS upload_parse_errors (
            batch_id TEXT NOT NULL,
            line INTEGER NOT NULL,
            reason TEXT NOT NULL,
            FOREIGN KEY (batch_id) REFERENCES upload_batches(batch_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Trigram FTS index over the authoritative question text, used to
    // prefilter duplicate-detection candidates.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='questions_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE questions_fts USING fts5(
                question_id UNINDEXED,
                question,
                tokenize = 'trigram'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_staged_records_batch_id ON staged_records(batch_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_staged_records_assigned_id ON staged_records(assigned_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_questions_topic ON questions(topic)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_upload_batches_status ON upload_batches(status)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_upload_batches_created_at ON upload_batches(created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
