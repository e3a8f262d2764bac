//! Batch lifecycle rules.
//!
//! The batch status machine is forward-only:
//!
//! ```text
//! Uploaded → Validating → Validated → Reviewing → ReadyToImport
//!          → Importing → Imported | PartiallyImported | Failed
//! ```
//!
//! The three import outcomes are terminal for the normal flow; an importer
//! re-run may re-enter `Importing` from them to retry failed records. A
//! batch can be discarded (→ `Failed`) at any point before importing
//! begins; after that there is no cancellation.

use crate::models::{BatchCounts, BatchStatus};

impl BatchStatus {
    /// Whether the normal forward machine permits `self → to`.
    pub fn can_transition(self, to: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, to),
            (Uploaded, Validating)
                | (Validating, Validated)
                | (Validated, Reviewing)
                | (Validated, ReadyToImport)
                | (Reviewing, ReadyToImport)
                | (ReadyToImport, Importing)
                | (Importing, Imported)
                | (Importing, PartiallyImported)
                | (Importing, Failed)
        )
    }

    /// Import may start from `ReadyToImport`, or re-enter from a finished
    /// import to retry records that failed.
    pub fn importable(self) -> bool {
        use BatchStatus::*;
        matches!(self, ReadyToImport | Imported | PartiallyImported | Failed)
    }

    /// Discard is only defined before importing begins.
    pub fn discardable(self) -> bool {
        use BatchStatus::*;
        matches!(self, Uploaded | Validating | Validated | Reviewing | ReadyToImport)
    }

    /// Record mutations (approve/reject/resolve) are only accepted while
    /// the batch is under review.
    pub fn reviewable(self) -> bool {
        use BatchStatus::*;
        matches!(self, Validated | Reviewing)
    }
}

/// Batch status after a review mutation: once no record is pending and no
/// flagged duplicate is unresolved, the batch is ready to import.
pub fn status_after_review(counts: &BatchCounts) -> BatchStatus {
    if counts.pending == 0 && counts.duplicate_flagged == 0 {
        BatchStatus::ReadyToImport
    } else {
        BatchStatus::Reviewing
    }
}

/// Final batch status after an import run, from the recomputed counts.
/// Zero failures resolves the batch cleanly even when nothing was inserted
/// (a fully rejected batch is not a failure).
pub fn status_after_import(counts: &BatchCounts) -> BatchStatus {
    if counts.import_failed == 0 {
        BatchStatus::Imported
    } else if counts.imported > 0 {
        BatchStatus::PartiallyImported
    } else {
        BatchStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use BatchStatus::*;

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(Uploaded.can_transition(Validating));
        assert!(Validating.can_transition(Validated));
        assert!(Validated.can_transition(Reviewing));
        assert!(Reviewing.can_transition(ReadyToImport));
        assert!(ReadyToImport.can_transition(Importing));
        assert!(Importing.can_transition(Imported));
        assert!(Importing.can_transition(PartiallyImported));
        assert!(Importing.can_transition(Failed));
    }

    #[test]
    fn test_backward_and_skip_transitions_rejected() {
        assert!(!Validated.can_transition(Uploaded));
        assert!(!Uploaded.can_transition(Imported));
        assert!(!Imported.can_transition(Reviewing));
        assert!(!Reviewing.can_transition(Importing));
    }

    #[test]
    fn test_discard_window_closes_at_importing() {
        assert!(Uploaded.discardable());
        assert!(Reviewing.discardable());
        assert!(ReadyToImport.discardable());
        assert!(!Importing.discardable());
        assert!(!Imported.discardable());
        assert!(!PartiallyImported.discardable());
    }

    #[test]
    fn test_review_completion() {
        let mut counts = BatchCounts {
            total: 3,
            approved: 2,
            rejected: 1,
            ..Default::default()
        };
        assert_eq!(status_after_review(&counts), ReadyToImport);

        counts.pending = 1;
        assert_eq!(status_after_review(&counts), Reviewing);

        counts.pending = 0;
        counts.duplicate_flagged = 1;
        assert_eq!(status_after_review(&counts), Reviewing);
    }

    #[test]
    fn test_import_final_status() {
        let clean = BatchCounts {
            total: 3,
            imported: 2,
            rejected: 1,
            ..Default::default()
        };
        assert_eq!(status_after_import(&clean), Imported);

        let mixed = BatchCounts {
            total: 3,
            imported: 2,
            import_failed: 1,
            ..Default::default()
        };
        assert_eq!(status_after_import(&mixed), PartiallyImported);

        let none = BatchCounts {
            total: 2,
            import_failed: 2,
            ..Default::default()
        };
        assert_eq!(status_after_import(&none), Failed);

        // Fully rejected, nothing attempted: resolves cleanly.
        let rejected_only = BatchCounts {
            total: 2,
            rejected: 2,
            ..Default::default()
        };
        assert_eq!(status_after_import(&rejected_only), Imported);
    }

    #[test]
    fn test_importable_states() {
        assert!(ReadyToImport.importable());
        assert!(PartiallyImported.importable());
        assert!(Failed.importable());
        assert!(Imported.importable());
        assert!(!Reviewing.importable());
        assert!(!Uploaded.importable());
    }
}
