//! Library-level staging workflow tests: review transitions, duplicate
//! resolution, aggregate-count invariants, import isolation, and identifier
//! conflict retries. These drive the operations directly against a
//! temporary database so they can inspect and manipulate state the CLI
//! does not expose.

use sqlx::SqlitePool;
use tempfile::TempDir;

use qbank::config::{self, Config};
use qbank::error::Error;
use qbank::models::{BatchCounts, BatchStatus, MatchKind, RecordStatus, Resolution};
use qbank::{db, import, ingest, migrate, review, store};

const SINGLE_DOC: &str = "\
# Topic: ACC
## Subtopic: Ratios
### Difficulty: Basic
#### Type: Definition
**Question:** What is the current ratio?
**Answer:** Current assets divided by current liabilities.
";

const TRIO_DOC: &str = "\
# Topic: Accounting
## Subtopic: Revenue Recognition
### Difficulty: Basic
#### Type: Definition
**Question:** What is ASC 606?
**Answer:** The revenue recognition standard for contracts with customers.

**Question:** What is deferred revenue?
**Answer:** Cash received before it is earned.

**Question:** What is unbilled revenue?
**Answer:** Revenue earned before it can be invoiced.
";

async fn setup() -> (TempDir, Config, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("qbank.toml");
    std::fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{}/qbank.sqlite"

[server]
bind = "127.0.0.1:7461"
"#,
            tmp.path().display()
        ),
    )
    .unwrap();
    let cfg = config::load_config(&config_path).unwrap();
    migrate::run_migrations(&cfg).await.unwrap();
    let pool = db::connect(&cfg).await.unwrap();
    (tmp, cfg, pool)
}

/// Inserts directly into the authoritative store, including the trigram
/// index, the way the importer does.
async fn seed_question(pool: &SqlitePool, question_id: &str, topic: &str, question: &str) {
    sqlx::query(
        r#"
        INSERT INTO questions (question_id, topic, subtopic, difficulty, qtype,
                               question, answer, notes, source_batch, created_at, updated_at)
        VALUES (?, ?, 'Seeded', 'Basic', 'Definition', ?, 'Seeded answer.', NULL, NULL, 0, 0)
        "#,
    )
    .bind(question_id)
    .bind(topic)
    .bind(question)
    .execute(pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO questions_fts (question_id, question) VALUES (?, ?)")
        .bind(question_id)
        .bind(question)
        .execute(pool)
        .await
        .unwrap();
}

/// The invariant every mutating call must preserve: batch aggregate counts
/// equal the histogram of its records' statuses.
async fn assert_counts_consistent(pool: &SqlitePool, batch_id: &str) {
    let batch = store::get_batch(pool, batch_id).await.unwrap();
    let records = store::fetch_all_records(pool, batch_id).await.unwrap();
    let mut expected = BatchCounts {
        total: records.len() as i64,
        ..Default::default()
    };
    for record in &records {
        match record.status {
            RecordStatus::Pending => expected.pending += 1,
            RecordStatus::ValidationFailed => expected.validation_failed += 1,
            RecordStatus::DuplicateFlagged => expected.duplicate_flagged += 1,
            RecordStatus::Approved => expected.approved += 1,
            RecordStatus::Rejected => expected.rejected += 1,
            RecordStatus::Imported => expected.imported += 1,
            RecordStatus::ImportFailed => expected.import_failed += 1,
        }
    }
    assert_eq!(batch.counts, expected, "counts drifted for batch {}", batch_id);
}

#[tokio::test]
async fn test_counts_stay_consistent_through_review_and_import() {
    let (_tmp, cfg, pool) = setup().await;

    let summary = ingest::create_batch(&pool, &cfg, TRIO_DOC, "trio.md").await.unwrap();
    assert_counts_consistent(&pool, &summary.batch_id).await;

    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();
    let ids: Vec<String> = records.iter().map(|r| r.staged_id.clone()).collect();

    review::review(&pool, &summary.batch_id, &ids[..2], &[]).await.unwrap();
    assert_counts_consistent(&pool, &summary.batch_id).await;

    review::review(&pool, &summary.batch_id, &[], &ids[2..]).await.unwrap();
    assert_counts_consistent(&pool, &summary.batch_id).await;

    import::import_batch(&pool, &summary.batch_id).await.unwrap();
    assert_counts_consistent(&pool, &summary.batch_id).await;

    let batch = store::get_batch(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Imported);
    assert_eq!(batch.counts.imported, 2);
    assert_eq!(batch.counts.rejected, 1);
}

#[tokio::test]
async fn test_existing_record_duplicate_flagged_with_full_score() {
    let (_tmp, cfg, pool) = setup().await;
    seed_question(&pool, "ACC-SEED-B-D-001", "ACC", "What is the current ratio?").await;

    let summary = ingest::create_batch(&pool, &cfg, SINGLE_DOC, "single.md").await.unwrap();
    assert_eq!(summary.duplicate_flagged, 1);

    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(records[0].status, RecordStatus::DuplicateFlagged);

    let duplicate = store::fetch_duplicate_for_record(&pool, &records[0].staged_id)
        .await
        .unwrap()
        .expect("flagged record has a duplicate link");
    assert_eq!(duplicate.match_kind, MatchKind::ExistingRecord);
    assert_eq!(duplicate.matched_ref, "ACC-SEED-B-D-001");
    assert_eq!(duplicate.similarity, 1.0);
    assert_eq!(duplicate.resolution, Resolution::Unresolved);

    // Import before resolution is rejected and leaves everything untouched.
    let err = import::import_batch(&pool, &summary.batch_id).await.unwrap_err();
    assert!(matches!(err, Error::BatchNotImportable { .. }));

    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(records[0].status, RecordStatus::DuplicateFlagged);
    let duplicate = store::fetch_duplicate(&pool, &duplicate.duplicate_id).await.unwrap();
    assert_eq!(duplicate.resolution, Resolution::Unresolved);
    assert_counts_consistent(&pool, &summary.batch_id).await;
}

#[tokio::test]
async fn test_authoritative_match_wins_over_in_batch_match() {
    let (_tmp, cfg, pool) = setup().await;
    seed_question(&pool, "ACC-SEED-B-D-001", "Accounting", "What is ASC 606?").await;

    // The second record matches both the seeded authoritative question and
    // the first record at score 1.0; existing content takes precedence.
    let doc = "\
# Topic: Accounting
## Subtopic: Revenue Recognition
### Difficulty: Basic
#### Type: Definition
**Question:** What is ASC 606?
**Answer:** The revenue recognition standard.

**Question:** What is ASC 606?
**Answer:** A restatement of the same question.
";
    let summary = ingest::create_batch(&pool, &cfg, doc, "twins.md").await.unwrap();
    assert_eq!(summary.duplicate_flagged, 2);

    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();
    for record in &records {
        let duplicate = store::fetch_duplicate_for_record(&pool, &record.staged_id)
            .await
            .unwrap()
            .expect("both records flagged");
        assert_eq!(duplicate.match_kind, MatchKind::ExistingRecord);
        assert_eq!(duplicate.matched_ref, "ACC-SEED-B-D-001");
        assert_eq!(duplicate.similarity, 1.0);
    }
}

#[tokio::test]
async fn test_resolution_transitions() {
    let (_tmp, cfg, pool) = setup().await;
    seed_question(&pool, "ACC-SEED-B-D-001", "ACC", "What is the current ratio?").await;

    let summary = ingest::create_batch(&pool, &cfg, SINGLE_DOC, "single.md").await.unwrap();
    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();
    let duplicate = store::fetch_duplicate_for_record(&pool, &records[0].staged_id)
        .await
        .unwrap()
        .unwrap();

    // Unresolved is not a caller-suppliable value.
    let err = review::resolve_duplicate(&pool, &duplicate.duplicate_id, Resolution::Unresolved)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidResolution(_)));

    // keep_new returns the record to the approvable pool.
    let resolved = review::resolve_duplicate(&pool, &duplicate.duplicate_id, Resolution::KeepNew)
        .await
        .unwrap();
    assert_eq!(resolved.resolution, Resolution::KeepNew);
    let record = store::fetch_record(&pool, &records[0].staged_id).await.unwrap();
    assert_eq!(record.status, RecordStatus::Pending);
    assert_counts_consistent(&pool, &summary.batch_id).await;

    // Resolving a second time fails: the record is no longer flagged.
    let err = review::resolve_duplicate(&pool, &duplicate.duplicate_id, Resolution::DiscardNew)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RecordNotReviewable { .. }));
}

#[tokio::test]
async fn test_rejecting_flagged_record_unblocks_batch() {
    let (_tmp, cfg, pool) = setup().await;
    seed_question(&pool, "ACC-SEED-B-D-001", "ACC", "What is the current ratio?").await;

    let summary = ingest::create_batch(&pool, &cfg, SINGLE_DOC, "single.md").await.unwrap();
    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();

    let batch = review::review(&pool, &summary.batch_id, &[], &[records[0].staged_id.clone()])
        .await
        .unwrap();
    assert_eq!(batch.status, BatchStatus::ReadyToImport);

    let outcomes = import::import_batch(&pool, &summary.batch_id).await.unwrap();
    assert!(outcomes.is_empty());
    let batch = store::get_batch(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Imported);
}

#[tokio::test]
async fn test_approve_requires_pending() {
    let (_tmp, cfg, pool) = setup().await;
    seed_question(&pool, "ACC-SEED-B-D-001", "ACC", "What is the current ratio?").await;

    let summary = ingest::create_batch(&pool, &cfg, SINGLE_DOC, "single.md").await.unwrap();
    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();

    // Flagged records cannot be approved without a resolution.
    let err = review::review(&pool, &summary.batch_id, &[records[0].staged_id.clone()], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RecordNotReviewable { .. }));
}

#[tokio::test]
async fn test_stale_version_is_a_concurrency_conflict() {
    let (_tmp, cfg, pool) = setup().await;
    let summary = ingest::create_batch(&pool, &cfg, TRIO_DOC, "trio.md").await.unwrap();
    let batch = store::get_batch(&pool, &summary.batch_id).await.unwrap();

    let mut tx = pool.begin().await.unwrap();
    let err = store::refresh_batch(
        &mut *tx,
        &summary.batch_id,
        batch.version + 5,
        BatchStatus::Reviewing,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::ConcurrencyConflict(_)));
}

#[tokio::test]
async fn test_partial_import_isolates_record_failures() {
    let (_tmp, cfg, pool) = setup().await;

    let doc = "\
# Topic: ACC
## Subtopic: Ratios
### Difficulty: Basic
#### Type: Definition
**Question:** What is the quick ratio poison pill?
**Answer:** A deliberately blocked record.

**Question:** What is the cash ratio?
**Answer:** Cash and equivalents over current liabilities.
";
    let summary = ingest::create_batch(&pool, &cfg, doc, "mixed.md").await.unwrap();
    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();
    let ids: Vec<String> = records.iter().map(|r| r.staged_id.clone()).collect();
    review::review(&pool, &summary.batch_id, &ids, &[]).await.unwrap();

    // Block inserts of the poisoned question at the database layer so the
    // failure happens mid-import, after the sibling's own transaction.
    sqlx::query(
        "CREATE TRIGGER poison_block BEFORE INSERT ON questions \
         WHEN NEW.question LIKE '%poison%' \
         BEGIN SELECT RAISE(ABORT, 'poisoned record'); END",
    )
    .execute(&pool)
    .await
    .unwrap();

    let outcomes = import::import_batch(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(outcomes.len(), 2);

    let failed: Vec<_> = outcomes
        .iter()
        .filter(|o| o.status == RecordStatus::ImportFailed)
        .collect();
    let imported: Vec<_> = outcomes
        .iter()
        .filter(|o| o.status == RecordStatus::Imported)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(imported.len(), 1);
    assert!(failed[0].reason.as_deref().unwrap_or("").contains("poisoned record"));

    let batch = store::get_batch(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::PartiallyImported);
    assert_counts_consistent(&pool, &summary.batch_id).await;

    // With the blocker removed, a re-run retries only the failed record.
    sqlx::query("DROP TRIGGER poison_block").execute(&pool).await.unwrap();
    let outcomes = import::import_batch(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].status, RecordStatus::Imported);

    let batch = store::get_batch(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Imported);
    assert_eq!(batch.counts.imported, 2);
    assert_counts_consistent(&pool, &summary.batch_id).await;
}

#[tokio::test]
async fn test_identifier_conflict_reassigns_once_and_retries() {
    let (_tmp, cfg, pool) = setup().await;

    // Two batches whose records derive the same base key.
    let first = ingest::create_batch(&pool, &cfg, SINGLE_DOC, "first.md").await.unwrap();
    let second = ingest::create_batch(&pool, &cfg, SINGLE_DOC, "second.md").await.unwrap();

    let first_records = store::fetch_all_records(&pool, &first.batch_id).await.unwrap();
    let second_records = store::fetch_all_records(&pool, &second.batch_id).await.unwrap();
    let first_id = first_records[0].assigned_id.clone().unwrap();

    // Simulate the race: the second batch believes it owns the identifier
    // the first batch is about to claim.
    sqlx::query("UPDATE staged_records SET assigned_id = ? WHERE staged_id = ?")
        .bind(&first_id)
        .bind(&second_records[0].staged_id)
        .execute(&pool)
        .await
        .unwrap();

    review::review(&pool, &first.batch_id, &[first_records[0].staged_id.clone()], &[])
        .await
        .unwrap();
    review::review(&pool, &second.batch_id, &[second_records[0].staged_id.clone()], &[])
        .await
        .unwrap();

    let outcomes = import::import_batch(&pool, &first.batch_id).await.unwrap();
    assert_eq!(outcomes[0].status, RecordStatus::Imported);
    assert_eq!(outcomes[0].assigned_id.as_deref(), Some(first_id.as_str()));

    // The second import detects the conflict at insert time and lands on a
    // freshly assigned identifier.
    let outcomes = import::import_batch(&pool, &second.batch_id).await.unwrap();
    assert_eq!(outcomes[0].status, RecordStatus::Imported);
    let retried_id = outcomes[0].assigned_id.clone().unwrap();
    assert_ne!(retried_id, first_id);

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM questions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(total, 2);
}

#[tokio::test]
async fn test_identifier_exhaustion_is_a_validation_error() {
    let (_tmp, cfg, pool) = setup().await;
    seed_question(&pool, "ACC-RATIOS-B-D-999", "ACC", "Unrelated seeded question text.").await;

    let summary = ingest::create_batch(&pool, &cfg, SINGLE_DOC, "single.md").await.unwrap();
    assert_eq!(summary.validation_failed, 1);

    let records = store::fetch_all_records(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(records[0].status, RecordStatus::ValidationFailed);
    assert!(records[0].assigned_id.is_none());
    assert!(records[0]
        .validation_errors
        .iter()
        .any(|e| e.field == "assigned_id" && e.message.contains("exhausted")));

    // The batch itself still validated; the failure is record-scoped.
    let batch = store::get_batch(&pool, &summary.batch_id).await.unwrap();
    assert_eq!(batch.status, BatchStatus::Validated);
}
