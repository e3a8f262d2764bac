//! Field-level candidate validation.
//!
//! Every rule is checked independently — a candidate accumulates all of its
//! errors in one pass rather than failing on the first. Candidates that fail
//! are still staged (as `validation_failed`) so reviewers see them in
//! context; nothing is dropped here.

use crate::config::TaxonomyConfig;
use crate::models::{FieldError, RawCandidate};

fn field_error(field: &str, message: String) -> FieldError {
    FieldError {
        field: field.to_string(),
        message,
    }
}

fn has_forbidden_control_chars(text: &str) -> bool {
    text.chars()
        .any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t')
}

fn check_text(
    errors: &mut Vec<FieldError>,
    field: &str,
    value: &str,
    min_len: usize,
    max_len: usize,
) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        errors.push(field_error(field, format!("{} must not be empty", field)));
    } else if trimmed.len() < min_len {
        errors.push(field_error(
            field,
            format!("{} must be at least {} characters", field, min_len),
        ));
    }
    if value.len() > max_len {
        errors.push(field_error(
            field,
            format!("{} exceeds {} characters", field, max_len),
        ));
    }
    if has_forbidden_control_chars(value) {
        errors.push(field_error(
            field,
            format!("{} contains control characters", field),
        ));
    }
}

/// Validates one candidate against the taxonomy. Returns the ordered list
/// of field errors; empty means valid.
pub fn validate_candidate(candidate: &RawCandidate, taxonomy: &TaxonomyConfig) -> Vec<FieldError> {
    let mut errors = Vec::new();

    check_text(
        &mut errors,
        "topic",
        &candidate.topic,
        taxonomy.min_text_len,
        taxonomy.max_topic_len,
    );
    check_text(
        &mut errors,
        "subtopic",
        &candidate.subtopic,
        taxonomy.min_text_len,
        taxonomy.max_subtopic_len,
    );

    if !taxonomy.difficulties.iter().any(|d| d == &candidate.difficulty) {
        errors.push(field_error(
            "difficulty",
            format!(
                "invalid difficulty '{}'; must be one of: {}",
                candidate.difficulty,
                taxonomy.difficulties.join(", ")
            ),
        ));
    }

    if !taxonomy.types.iter().any(|t| t == &candidate.qtype) {
        errors.push(field_error(
            "type",
            format!(
                "invalid type '{}'; must be one of: {}",
                candidate.qtype,
                taxonomy.types.join(", ")
            ),
        ));
    }

    check_text(
        &mut errors,
        "question",
        &candidate.question,
        taxonomy.min_text_len,
        taxonomy.max_question_len,
    );
    check_text(
        &mut errors,
        "answer",
        &candidate.answer,
        taxonomy.min_text_len,
        taxonomy.max_answer_len,
    );

    if let Some(notes) = &candidate.notes {
        if has_forbidden_control_chars(notes) {
            errors.push(field_error("notes", "notes contains control characters".into()));
        }
    }

    errors
}
