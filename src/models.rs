//! Core data models for the staging pipeline.
//!
//! These types represent the candidates, staged records, batches, and
//! duplicate links that flow through the upload → review → import pipeline.
//! Status enums are closed: every persisted string round-trips through
//! `as_str`/`parse`, and unknown strings are rejected at the boundary.

use serde::{Deserialize, Serialize};

/// Raw candidate produced by the parser before validation.
///
/// Carries the section context (topic/subtopic/difficulty/type) that was in
/// effect at the block's `**Question:**` marker, plus the 1-based line
/// number of that marker for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCandidate {
    pub topic: String,
    pub subtopic: String,
    pub difficulty: String,
    pub qtype: String,
    pub question: String,
    pub answer: String,
    pub notes: Option<String>,
    pub source_line: usize,
}

/// A block-scoped parse failure. Recorded, never fatal for the document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParseError {
    pub line: usize,
    pub reason: String,
}

/// A single field-level validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// Lifecycle of an upload batch.
///
/// Forward-only: `Uploaded → Validating → Validated → Reviewing →
/// ReadyToImport → Importing → Imported | PartiallyImported | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Uploaded,
    Validating,
    Validated,
    Reviewing,
    ReadyToImport,
    Importing,
    Imported,
    PartiallyImported,
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Uploaded => "uploaded",
            BatchStatus::Validating => "validating",
            BatchStatus::Validated => "validated",
            BatchStatus::Reviewing => "reviewing",
            BatchStatus::ReadyToImport => "ready_to_import",
            BatchStatus::Importing => "importing",
            BatchStatus::Imported => "imported",
            BatchStatus::PartiallyImported => "partially_imported",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(BatchStatus::Uploaded),
            "validating" => Some(BatchStatus::Validating),
            "validated" => Some(BatchStatus::Validated),
            "reviewing" => Some(BatchStatus::Reviewing),
            "ready_to_import" => Some(BatchStatus::ReadyToImport),
            "importing" => Some(BatchStatus::Importing),
            "imported" => Some(BatchStatus::Imported),
            "partially_imported" => Some(BatchStatus::PartiallyImported),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a staged record within its batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    ValidationFailed,
    DuplicateFlagged,
    Approved,
    Rejected,
    Imported,
    ImportFailed,
}

impl RecordStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::ValidationFailed => "validation_failed",
            RecordStatus::DuplicateFlagged => "duplicate_flagged",
            RecordStatus::Approved => "approved",
            RecordStatus::Rejected => "rejected",
            RecordStatus::Imported => "imported",
            RecordStatus::ImportFailed => "import_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordStatus::Pending),
            "validation_failed" => Some(RecordStatus::ValidationFailed),
            "duplicate_flagged" => Some(RecordStatus::DuplicateFlagged),
            "approved" => Some(RecordStatus::Approved),
            "rejected" => Some(RecordStatus::Rejected),
            "imported" => Some(RecordStatus::Imported),
            "import_failed" => Some(RecordStatus::ImportFailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a staging duplicate matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    ExistingRecord,
    InBatchCandidate,
}

impl MatchKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchKind::ExistingRecord => "existing_record",
            MatchKind::InBatchCandidate => "in_batch_candidate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "existing_record" => Some(MatchKind::ExistingRecord),
            "in_batch_candidate" => Some(MatchKind::InBatchCandidate),
            _ => None,
        }
    }
}

/// Reviewer decision on a flagged duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Unresolved,
    KeepNew,
    KeepExisting,
    KeepBoth,
    DiscardNew,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Unresolved => "unresolved",
            Resolution::KeepNew => "keep_new",
            Resolution::KeepExisting => "keep_existing",
            Resolution::KeepBoth => "keep_both",
            Resolution::DiscardNew => "discard_new",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unresolved" => Some(Resolution::Unresolved),
            "keep_new" => Some(Resolution::KeepNew),
            "keep_existing" => Some(Resolution::KeepExisting),
            "keep_both" => Some(Resolution::KeepBoth),
            "discard_new" => Some(Resolution::DiscardNew),
            _ => None,
        }
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-status record counts within a batch.
///
/// Derived exclusively by recomputation over the batch's staged records;
/// after every mutating operation these equal the sum of record statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub total: i64,
    pub pending: i64,
    pub validation_failed: i64,
    pub duplicate_flagged: i64,
    pub approved: i64,
    pub rejected: i64,
    pub imported: i64,
    pub import_failed: i64,
}

/// An upload batch row. Owned by the batch manager; callers never edit the
/// counts or status directly.
#[derive(Debug, Clone, Serialize)]
pub struct UploadBatch {
    pub batch_id: String,
    pub source_name: String,
    pub status: BatchStatus,
    pub created_at: i64,
    pub version: i64,
    #[serde(flatten)]
    pub counts: BatchCounts,
}

/// A staged record held for review.
#[derive(Debug, Clone, Serialize)]
pub struct StagedRecord {
    pub staged_id: String,
    pub batch_id: String,
    pub parse_order: i64,
    pub source_line: i64,
    pub topic: String,
    pub subtopic: String,
    pub difficulty: String,
    pub qtype: String,
    pub question: String,
    pub answer: String,
    pub notes: Option<String>,
    pub status: RecordStatus,
    pub validation_errors: Vec<FieldError>,
    pub assigned_id: Option<String>,
    pub import_error: Option<String>,
    pub created_at: i64,
}

/// One-directional duplicate link from a staged record to its best match.
///
/// Resolution state lives only here; the matched target is never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct StagingDuplicate {
    pub duplicate_id: String,
    pub staged_id: String,
    pub match_kind: MatchKind,
    pub matched_ref: String,
    pub similarity: f64,
    pub resolution: Resolution,
}

/// Committed record in the authoritative store.
#[derive(Debug, Clone, Serialize)]
#[allow(dead_code)]
pub struct Question {
    pub question_id: String,
    pub topic: String,
    pub subtopic: String,
    pub difficulty: String,
    pub qtype: String,
    pub question: String,
    pub answer: String,
    pub notes: Option<String>,
    pub source_batch: Option<String>,
    pub created_at: i64,
}

/// Summary returned by `create_batch`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub status: BatchStatus,
    pub staged: usize,
    pub parse_errors: Vec<ParseError>,
    pub validation_failed: usize,
    pub duplicate_flagged: usize,
}

/// Per-record outcome of an import run.
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub staged_id: String,
    pub assigned_id: Option<String>,
    pub status: RecordStatus,
    pub reason: Option<String>,
}
