//! SDE Conflict Detection
//!
//! Finds what can go wrong before a diff batch touches a file.
//!
//! # Core Concepts
//!
//! - [`RangeValidator`]: per-diff bounds and pairwise overlap classification
//! - [`ConflictDetector`]: runs [`ConflictPass`]es (overlap, dependency,
//!   syntax, semantic) and scores dangerous operations
//! - [`SemanticAnalyzer`]: before/after contract comparison used after apply
//!
//! The dependency and semantic passes are pattern heuristics over Rust,
//! TypeScript/JavaScript and Python source. They are best-effort and can
//! both miss real problems and flag harmless edits.
//!
//! # Example
//!
//! ```rust
//! use sde_buffer::{DiffOperation, FileId, TextBuffer};
//! use sde_conflict::{ConflictDetector, OverlapKind, RangeValidator};
//!
//! let buffer = TextBuffer::from_text(&"x\n".repeat(20));
//! let diffs = [DiffOperation::replace(5, 10, "a"), DiffOperation::replace(8, 12, "b")];
//!
//! let ranges = RangeValidator::new().validate(buffer.line_count(), &diffs);
//! assert_eq!(ranges.overlaps[0].kind, OverlapKind::Partial);
//!
//! let report = ConflictDetector::with_defaults().detect(&FileId::new("f"), &buffer, &diffs);
//! assert_eq!(report.conflicts.len(), 1);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod conflict;
pub mod danger;
mod detector;
mod pass;
pub mod patterns;
mod range;
mod semantic;

pub use conflict::{Conflict, ConflictType, ResolutionAction, ResolutionOption, Severity};
pub use danger::{DangerKind, DangerWarning};
pub use detector::{ConflictDetector, ConflictReport};
pub use pass::{
    ConflictPass, DependencyPass, DetectionContext, OverlapPass, SemanticPass, SyntaxPass,
};
pub use range::{ConflictError, Overlap, OverlapKind, RangeReport, RangeValidator, RangeViolation};
pub use semantic::{BreakingChange, BreakingKind, SemanticAnalyzer, SemanticImpact};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod integration_tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sde_buffer::{DiffOperation, FileId, TextBuffer};

    fn numbered(n: usize) -> TextBuffer {
        let text: String = (1..=n).map(|i| format!("line {i}\n")).collect();
        TextBuffer::from_text(&text)
    }

    #[test]
    fn overlap_classification_matches_detector() {
        let buffer = numbered(20);
        let file = FileId::new("f.txt");
        let detector = ConflictDetector::with_defaults();

        let partial = [DiffOperation::replace(5, 10, "a"), DiffOperation::replace(8, 12, "b")];
        let report = detector.detect(&file, &buffer, &partial);
        assert_eq!(report.conflicts[0].conflict_type, ConflictType::LineOverlap);
        assert_eq!(report.conflicts[0].severity, Severity::High);

        let complete = [DiffOperation::replace(5, 10, "a"), DiffOperation::replace(6, 8, "b")];
        let report = detector.detect(&file, &buffer, &complete);
        assert!(report.has_critical());
    }

    #[test]
    fn analyzer_and_detector_agree_on_dangling_export() {
        let before = "pub fn helper() -> u8 {\n    1\n}\n\npub fn run() -> u8 {\n    helper()\n}\n";
        let buffer = TextBuffer::from_text(before);
        let diffs = [DiffOperation::delete(1, 4)];

        let report =
            ConflictDetector::with_defaults().detect(&FileId::new("lib.rs"), &buffer, &diffs);
        assert!(report.has_critical());

        let mut after = buffer.clone();
        after.apply(&diffs[0]).unwrap();
        let impact = SemanticAnalyzer::new().impact(before, &after.text());
        assert_eq!(impact.dangling_references, vec!["helper".to_string()]);
        assert!(!impact.is_valid);
    }
}
