//! Semantic identifier assignment.
//!
//! Identifiers follow the pattern `{TOPIC}-{SUB}-{D}-{T}-{NNN}`: a topic
//! code, a subtopic code, the difficulty initial, a single-letter type
//! code, and a zero-padded sequence scoped to that base key. The sequence
//! is derived from both namespaces — the authoritative `questions` table
//! and already-staged records — plus an in-batch tracker so one batch never
//! hands out the same identifier twice. Collision retries are bounded;
//! exhaustion is surfaced per record, never per batch.

use std::collections::HashMap;

use sqlx::SqlitePool;

use crate::error::{Error, Result};

/// Upper bound on collision retries before giving up on a base key.
pub const MAX_ID_ATTEMPTS: u32 = 25;
/// Sequences are three digits; anything past this is exhausted.
pub const MAX_SEQUENCE: i64 = 999;

const MAX_TOPIC_CODE_LEN: usize = 10;
const MAX_SUBTOPIC_CODE_LEN: usize = 8;

const STOP_WORDS: [&str; 9] = ["the", "and", "of", "for", "to", "in", "on", "at", "by"];

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Derives the topic code: a parenthesized abbreviation when present
/// (`"Discounted Cash Flow (DCF)"` → `DCF`), otherwise initials of the
/// significant words, falling back to a prefix of the first word.
pub fn topic_code(topic: &str) -> String {
    if let Some(open) = topic.find('(') {
        if let Some(close_rel) = topic[open..].find(')') {
            let inner = &topic[open + 1..open + close_rel];
            let abbrev: String = inner.chars().filter(|c| c.is_alphanumeric()).collect();
            if !abbrev.is_empty() && abbrev.chars().count() <= MAX_TOPIC_CODE_LEN {
                return abbrev.to_uppercase();
            }
        }
    }

    // Strip any parenthetical content, then everything but letters, digits,
    // and spaces.
    let mut cleaned = String::new();
    let mut depth = 0usize;
    for c in topic.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && (c.is_alphanumeric() || c.is_whitespace()) => cleaned.push(c),
            _ => {}
        }
    }

    let words: Vec<&str> = cleaned.split_whitespace().collect();
    let significant: Vec<&str> = {
        let filtered: Vec<&str> = words
            .iter()
            .copied()
            .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.to_lowercase().as_str()))
            .collect();
        if filtered.is_empty() {
            words.clone()
        } else {
            filtered
        }
    };

    if significant.is_empty() {
        return "UNKNOWN".to_string();
    }
    if significant.len() == 1 {
        return truncate_chars(significant[0], MAX_TOPIC_CODE_LEN).to_uppercase();
    }

    let initials: String = significant
        .iter()
        .take(4)
        .filter_map(|w| w.chars().next())
        .collect::<String>()
        .to_uppercase();
    if initials.chars().count() < 3 {
        return truncate_chars(significant[0], 4.min(MAX_TOPIC_CODE_LEN)).to_uppercase();
    }
    truncate_chars(&initials, MAX_TOPIC_CODE_LEN)
}

/// Derives the subtopic code: an embedded all-caps abbreviation wins
/// (`"WACC Calculation"` → `WACC`), then word initials, then a prefix.
pub fn subtopic_code(subtopic: &str) -> String {
    let cleaned: String = subtopic
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect();
    let words: Vec<&str> = cleaned.split_whitespace().collect();

    if words.is_empty() {
        return "UNKNOWN".to_string();
    }
    if words.len() == 1 {
        return truncate_chars(words[0], MAX_SUBTOPIC_CODE_LEN).to_uppercase();
    }

    if let Some(abbrev) = words.iter().find(|w| {
        w.chars().count() > 1
            && w.chars().any(|c| c.is_alphabetic())
            && w.chars().filter(|c| c.is_alphabetic()).all(|c| c.is_uppercase())
    }) {
        return truncate_chars(abbrev, MAX_SUBTOPIC_CODE_LEN);
    }

    let initials: String = words
        .iter()
        .filter_map(|w| w.chars().next())
        .collect::<String>()
        .to_uppercase();
    if initials.chars().count() <= MAX_SUBTOPIC_CODE_LEN {
        return initials;
    }

    if words[0].chars().count() <= 4 {
        let rest: String = words[1..]
            .iter()
            .filter_map(|w| w.chars().next())
            .collect::<String>()
            .to_uppercase();
        let combined = format!("{}{}", words[0].to_uppercase(), rest);
        return truncate_chars(&combined, MAX_SUBTOPIC_CODE_LEN);
    }

    truncate_chars(words[0], MAX_SUBTOPIC_CODE_LEN).to_uppercase()
}

fn difficulty_code(difficulty: &str) -> char {
    difficulty
        .chars()
        .next()
        .map(|c| c.to_ascii_uppercase())
        .unwrap_or('X')
}

fn type_code(qtype: &str) -> char {
    match qtype {
        "GenConcept" => 'G',
        "Problem" => 'P',
        "Definition" => 'D',
        "Calculation" => 'C',
        "Analysis" => 'A',
        _ => 'G',
    }
}

/// Base key without the sequence, e.g. `DCF-WACC-B-G`.
pub fn base_key(topic: &str, subtopic: &str, difficulty: &str, qtype: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        topic_code(topic),
        subtopic_code(subtopic),
        difficulty_code(difficulty),
        type_code(qtype)
    )
}

fn sequence_suffix(id: &str) -> Option<i64> {
    id.rsplit_once('-').and_then(|(_, suffix)| suffix.parse().ok())
}

async fn max_sequence_like(pool: &SqlitePool, sql: &str, pattern: &str) -> Result<i64> {
    let ids: Vec<String> = sqlx::query_scalar(sql).bind(pattern).fetch_all(pool).await?;
    Ok(ids
        .iter()
        .filter_map(|id| sequence_suffix(id))
        .max()
        .unwrap_or(0))
}

/// Highest sequence already claimed for `base` across the authoritative
/// store and the staging namespace.
async fn next_sequence(pool: &SqlitePool, base: &str) -> Result<i64> {
    let pattern = format!("{}-%", base);
    let in_questions = max_sequence_like(
        pool,
        "SELECT question_id FROM questions WHERE question_id LIKE ?",
        &pattern,
    )
    .await?;
    let in_staging = max_sequence_like(
        pool,
        "SELECT assigned_id FROM staged_records WHERE assigned_id LIKE ?",
        &pattern,
    )
    .await?;
    Ok(in_questions.max(in_staging) + 1)
}

async fn id_taken(pool: &SqlitePool, candidate: &str) -> Result<bool> {
    let in_questions: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM questions WHERE question_id = ?")
            .bind(candidate)
            .fetch_optional(pool)
            .await?;
    if in_questions.is_some() {
        return Ok(true);
    }
    let in_staging: Option<i64> =
        sqlx::query_scalar("SELECT 1 FROM staged_records WHERE assigned_id = ?")
            .bind(candidate)
            .fetch_optional(pool)
            .await?;
    Ok(in_staging.is_some())
}

/// Assigns identifiers for one batch, tracking sequences per base key so
/// repeated composites within the batch number consecutively.
#[derive(Debug, Default)]
pub struct IdAssigner {
    tracker: HashMap<String, i64>,
}

impl IdAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assign(
        &mut self,
        pool: &SqlitePool,
        topic: &str,
        subtopic: &str,
        difficulty: &str,
        qtype: &str,
    ) -> Result<String> {
        let base = base_key(topic, subtopic, difficulty, qtype);

        let mut seq = match self.tracker.get(&base) {
            Some(last) => last + 1,
            None => next_sequence(pool, &base).await?,
        };

        let mut attempts = 0u32;
        loop {
            if seq > MAX_SEQUENCE || attempts >= MAX_ID_ATTEMPTS {
                return Err(Error::IdentifierExhausted(base));
            }
            let candidate = format!("{}-{:03}", base, seq);
            if !id_taken(pool, &candidate).await? {
                self.tracker.insert(base, seq);
                return Ok(candidate);
            }
            seq += 1;
            attempts += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_code_parenthesized_abbreviation() {
        assert_eq!(topic_code("Discounted Cash Flow (DCF)"), "DCF");
        assert_eq!(topic_code("Leveraged Buyouts (LBO)"), "LBO");
    }

    #[test]
    fn test_topic_code_initials_and_prefix_fallback() {
        // "and" is a stop word; two significant words give two initials,
        // which is too short, so the first word's prefix wins.
        assert_eq!(topic_code("Mergers and Acquisitions"), "MERG");
        assert_eq!(topic_code("Accounting"), "ACCOUNTING");
        assert_eq!(topic_code("Enterprise Value Equity Value"), "EVEV");
    }

    #[test]
    fn test_subtopic_code_strategies() {
        assert_eq!(subtopic_code("WACC Calculation"), "WACC");
        assert_eq!(subtopic_code("Terminal Value"), "TV");
        assert_eq!(subtopic_code("Ratios"), "RATIOS");
        assert_eq!(subtopic_code(""), "UNKNOWN");
    }

    #[test]
    fn test_base_key_shape() {
        assert_eq!(
            base_key("Discounted Cash Flow (DCF)", "WACC Calculation", "Basic", "GenConcept"),
            "DCF-WACC-B-G"
        );
        assert_eq!(
            base_key("Accounting", "Revenue Recognition", "Advanced", "Problem"),
            "ACCOUNTING-RR-A-P"
        );
    }

    #[test]
    fn test_unknown_type_defaults_to_g() {
        assert_eq!(base_key("Accounting", "Ratios", "Basic", "Question"), "ACCOUNTING-RATIOS-B-G");
    }

    #[test]
    fn test_sequence_suffix_extraction() {
        assert_eq!(sequence_suffix("DCF-WACC-B-G-007"), Some(7));
        assert_eq!(sequence_suffix("DCF-WACC-B-G-abc"), None);
        assert_eq!(sequence_suffix("noseparator"), None);
    }

    async fn test_pool() -> SqlitePool {
        // A single connection keeps every query on the same in-memory db.
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE questions (question_id TEXT PRIMARY KEY)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("CREATE TABLE staged_records (staged_id TEXT PRIMARY KEY, assigned_id TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_assign_starts_after_existing_sequences() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO questions (question_id) VALUES ('DCF-WACC-B-G-001'), ('DCF-WACC-B-G-002')")
            .execute(&pool)
            .await
            .unwrap();

        let mut assigner = IdAssigner::new();
        let id = assigner
            .assign(&pool, "Discounted Cash Flow (DCF)", "WACC Calculation", "Basic", "GenConcept")
            .await
            .unwrap();
        assert_eq!(id, "DCF-WACC-B-G-003");
    }

    #[tokio::test]
    async fn test_assign_numbers_consecutively_within_batch() {
        let pool = test_pool().await;
        let mut assigner = IdAssigner::new();
        let first = assigner
            .assign(&pool, "Accounting", "Ratios", "Basic", "Definition")
            .await
            .unwrap();
        let second = assigner
            .assign(&pool, "Accounting", "Ratios", "Basic", "Definition")
            .await
            .unwrap();
        assert_eq!(first, "ACCOUNTING-RATIOS-B-D-001");
        assert_eq!(second, "ACCOUNTING-RATIOS-B-D-002");
    }

    #[tokio::test]
    async fn test_assign_skips_taken_identifiers() {
        let pool = test_pool().await;
        // Staged namespace claims 001; sequence lookup misses it only if the
        // suffix were malformed, so also claim an out-of-order id directly.
        sqlx::query("INSERT INTO staged_records (staged_id, assigned_id) VALUES ('s1', 'ACC-RATIOS-B-D-001')")
            .execute(&pool)
            .await
            .unwrap();
        let mut assigner = IdAssigner::new();
        let id = assigner
            .assign(&pool, "ACC", "Ratios", "Basic", "Definition")
            .await
            .unwrap();
        assert_eq!(id, "ACC-RATIOS-B-D-002");
    }

    #[tokio::test]
    async fn test_exhaustion_past_max_sequence() {
        let pool = test_pool().await;
        sqlx::query("INSERT INTO questions (question_id) VALUES (?)")
            .bind(format!("ACC-RATIOS-B-D-{:03}", MAX_SEQUENCE))
            .execute(&pool)
            .await
            .unwrap();
        let mut assigner = IdAssigner::new();
        let err = assigner
            .assign(&pool, "ACC", "Ratios", "Basic", "Definition")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentifierExhausted(_)));
    }
}
