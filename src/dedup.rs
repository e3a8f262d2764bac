//! Duplicate detection for staged candidates.
//!
//! Each pending record in a batch is scored against (1) authoritative
//! records in the same topic, prefiltered through the trigram FTS index,
//! and (2) records earlier in the same batch's parse order. The first
//! qualifying match wins — a candidate is never multiply-flagged — with
//! deterministic tie-breaking: an existing-record match beats an in-batch
//! match; among existing matches the highest score wins and exact ties go
//! to the lexicographically smallest question id; among in-batch matches
//! the highest score wins and ties go to the earliest parse order.

use sqlx::{Row, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::config::DedupConfig;
use crate::error::Result;
use crate::models::{MatchKind, RecordStatus, Resolution, StagedRecord, StagingDuplicate};
use crate::similarity::{normalize, trigram_similarity};
use crate::store;

/// A scored candidate pair before flagging.
#[derive(Debug, Clone)]
struct ScoredMatch {
    kind: MatchKind,
    matched_ref: String,
    score: f64,
}

/// Builds an FTS5 match expression from the question's words: each word of
/// three or more characters becomes a quoted phrase, joined with OR. With
/// the trigram tokenizer a quoted phrase matches as a substring, so any row
/// sharing a word survives the prefilter. Returns `None` when the text has
/// no usable word.
fn fts_match_expr(question: &str) -> Option<String> {
    let normalized = normalize(question);
    let phrases: Vec<String> = normalized
        .split(' ')
        .map(|w| w.chars().filter(|c| c.is_alphanumeric()).collect::<String>())
        .filter(|w| w.chars().count() >= 3)
        .map(|w| format!("\"{}\"", w))
        .collect();
    if phrases.is_empty() {
        None
    } else {
        Some(phrases.join(" OR "))
    }
}

/// Authoritative candidates for one staged question, restricted to the same
/// topic and capped at `candidate_k`.
async fn fetch_existing_candidates(
    pool: &SqlitePool,
    topic: &str,
    question: &str,
    candidate_k: i64,
) -> Result<Vec<(String, String)>> {
    let rows = match fts_match_expr(question) {
        Some(expr) => {
            sqlx::query(
                r#"
                SELECT q.question_id, q.question
                FROM questions_fts
                JOIN questions q ON q.question_id = questions_fts.question_id
                WHERE questions_fts MATCH ? AND q.topic = ?
                ORDER BY q.question_id
                LIMIT ?
                "#,
            )
            .bind(expr)
            .bind(topic)
            .bind(candidate_k)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                SELECT question_id, question FROM questions
                WHERE topic = ? ORDER BY question_id LIMIT ?
                "#,
            )
            .bind(topic)
            .bind(candidate_k)
            .fetch_all(pool)
            .await?
        }
    };

    Ok(rows
        .iter()
        .map(|row| (row.get("question_id"), row.get("question")))
        .collect())
}

/// Best authoritative match at or above the threshold, if any.
fn best_existing(
    record: &StagedRecord,
    candidates: &[(String, String)],
    threshold: f64,
) -> Option<ScoredMatch> {
    let mut best: Option<ScoredMatch> = None;
    for (question_id, question) in candidates {
        let score = trigram_similarity(&record.question, question);
        if score < threshold {
            continue;
        }
        let better = match &best {
            None => true,
            Some(current) => {
                score > current.score
                    || (score == current.score && question_id < &current.matched_ref)
            }
        };
        if better {
            best = Some(ScoredMatch {
                kind: MatchKind::ExistingRecord,
                matched_ref: question_id.clone(),
                score,
            });
        }
    }
    best
}

/// Best earlier-in-batch match at or above the threshold, if any. Earlier
/// records are scanned in parse order, so the first record holding the top
/// score wins ties.
fn best_in_batch(
    record: &StagedRecord,
    earlier: &[&StagedRecord],
    threshold: f64,
) -> Option<ScoredMatch> {
    let mut best: Option<ScoredMatch> = None;
    let mut best_score = 0.0f64;
    for other in earlier {
        let score = trigram_similarity(&record.question, &other.question);
        if score < threshold {
            continue;
        }
        if best.is_none() || score > best_score {
            best_score = score;
            best = Some(ScoredMatch {
                kind: MatchKind::InBatchCandidate,
                matched_ref: other.staged_id.clone(),
                score,
            });
        }
    }
    best
}

/// Runs duplicate detection over a batch's pending records, creating one
/// [`StagingDuplicate`] per flagged record and moving it to
/// `duplicate_flagged`. Returns the created links. Counts are the caller's
/// to refresh.
pub async fn detect_batch(
    pool: &SqlitePool,
    config: &DedupConfig,
    records: &[StagedRecord],
) -> Result<Vec<StagingDuplicate>> {
    let mut flagged = Vec::new();

    // Records keep participating as comparison targets after being flagged;
    // only validation failures are excluded.
    let comparable: Vec<&StagedRecord> = records
        .iter()
        .filter(|r| r.status != RecordStatus::ValidationFailed)
        .collect();

    for (idx, &record) in comparable.iter().enumerate() {
        if record.status != RecordStatus::Pending {
            continue;
        }

        let existing =
            fetch_existing_candidates(pool, &record.topic, &record.question, config.candidate_k)
                .await?;
        let best = best_existing(record, &existing, config.threshold)
            .or_else(|| best_in_batch(record, &comparable[..idx], config.threshold));

        if let Some(found) = best {
            debug!(
                staged_id = %record.staged_id,
                matched = %found.matched_ref,
                score = found.score,
                "flagged duplicate"
            );
            flagged.push(StagingDuplicate {
                duplicate_id: Uuid::new_v4().to_string(),
                staged_id: record.staged_id.clone(),
                match_kind: found.kind,
                matched_ref: found.matched_ref,
                similarity: found.score,
                resolution: Resolution::Unresolved,
            });
        }
    }

    if !flagged.is_empty() {
        let mut tx = pool.begin().await?;
        for duplicate in &flagged {
            store::insert_duplicate(&mut *tx, duplicate).await?;
            store::update_record_status(&mut *tx, &duplicate.staged_id, RecordStatus::DuplicateFlagged)
                .await?;
        }
        tx.commit().await?;
    }

    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(staged_id: &str, parse_order: i64, question: &str) -> StagedRecord {
        StagedRecord {
            staged_id: staged_id.to_string(),
            batch_id: "b1".to_string(),
            parse_order,
            source_line: 1,
            topic: "Accounting".to_string(),
            subtopic: "Ratios".to_string(),
            difficulty: "Basic".to_string(),
            qtype: "Definition".to_string(),
            question: question.to_string(),
            answer: "An answer.".to_string(),
            notes: None,
            status: RecordStatus::Pending,
            validation_errors: Vec::new(),
            assigned_id: None,
            import_error: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_fts_match_expr_quotes_words() {
        let expr = fts_match_expr("What is the current ratio?").unwrap();
        assert!(expr.contains("\"what\""));
        assert!(expr.contains("\"current\""));
        assert!(expr.contains(" OR "));
        // words under three chars are dropped
        assert!(!expr.contains("\"is\""));
    }

    #[test]
    fn test_fts_match_expr_empty_for_short_words() {
        assert!(fts_match_expr("a b cd").is_none());
    }

    #[test]
    fn test_best_existing_prefers_highest_score() {
        let r = record("s1", 0, "What is the current ratio?");
        let candidates = vec![
            ("Q-B".to_string(), "What is the current ratio?".to_string()),
            ("Q-A".to_string(), "What is a current ratio again?".to_string()),
        ];
        let best = best_existing(&r, &candidates, 0.5).unwrap();
        assert_eq!(best.matched_ref, "Q-B");
        assert_eq!(best.score, 1.0);
    }

    #[test]
    fn test_best_existing_score_tie_breaks_lexicographically() {
        let r = record("s1", 0, "What is the current ratio?");
        let candidates = vec![
            ("Q-B".to_string(), "What is the current ratio?".to_string()),
            ("Q-A".to_string(), "What is the current ratio?".to_string()),
        ];
        let best = best_existing(&r, &candidates, 0.5).unwrap();
        assert_eq!(best.matched_ref, "Q-A");
    }

    #[test]
    fn test_best_existing_respects_threshold() {
        let r = record("s1", 0, "What is the current ratio?");
        let candidates = vec![(
            "Q-A".to_string(),
            "Walk me through a discounted cash flow.".to_string(),
        )];
        assert!(best_existing(&r, &candidates, 0.8).is_none());
    }

    #[test]
    fn test_best_in_batch_tie_breaks_on_parse_order() {
        let target = record("s3", 2, "What is working capital?");
        let first = record("s1", 0, "What is working capital?");
        let second = record("s2", 1, "What is working capital?");
        let earlier: Vec<&StagedRecord> = vec![&first, &second];
        let best = best_in_batch(&target, &earlier, 0.8).unwrap();
        assert_eq!(best.matched_ref, "s1");
    }
}
