//! Conflict detector: runs the registered passes over a batch

use crate::conflict::{Conflict, Severity};
use crate::danger::{self, DangerWarning};
use crate::pass::{ConflictPass, DependencyPass, DetectionContext, OverlapPass, SemanticPass, SyntaxPass};
use crate::range::{RangeReport, RangeValidator};
use sde_buffer::{DiffOperation, FileId, TextBuffer};
use std::sync::Arc;

/// Everything found for one batch
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    /// Conflicts from every pass
    pub conflicts: Vec<Conflict>,
    /// Dangerous-operation warnings
    pub warnings: Vec<DangerWarning>,
}

impl ConflictReport {
    /// No conflicts and no warnings
    #[inline]
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty() && self.warnings.is_empty()
    }

    /// Any conflict blocks the apply
    #[inline]
    #[must_use]
    pub fn has_critical(&self) -> bool {
        self.conflicts.iter().any(Conflict::is_critical)
    }

    /// Number of critical conflicts
    #[must_use]
    pub fn critical_count(&self) -> usize {
        self.conflicts.iter().filter(|c| c.is_critical()).count()
    }

    /// Highest severity found
    #[must_use]
    pub fn max_severity(&self) -> Option<Severity> {
        self.conflicts.iter().map(|c| c.severity).max()
    }

    /// Warnings on diffs that are also part of a critical conflict
    #[must_use]
    pub fn blocking_warnings(&self) -> Vec<&DangerWarning> {
        self.warnings
            .iter()
            .filter(|w| {
                self.conflicts
                    .iter()
                    .any(|c| c.is_critical() && c.diff_indices.contains(&w.index))
            })
            .collect()
    }
}

/// Runs conflict passes over a diff batch
#[derive(Debug, Clone, Default)]
pub struct ConflictDetector {
    passes: Vec<Arc<dyn ConflictPass>>,
    ranges: RangeValidator,
}

impl ConflictDetector {
    /// Create detector with no passes
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create detector with the built-in passes
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new()
            .with_pass(OverlapPass)
            .with_pass(DependencyPass)
            .with_pass(SyntaxPass)
            .with_pass(SemanticPass)
    }

    /// Register a pass
    #[must_use]
    pub fn with_pass(mut self, pass: impl ConflictPass + 'static) -> Self {
        self.passes.push(Arc::new(pass));
        self
    }

    /// Names of registered passes, in run order
    #[must_use]
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Bounds and overlap check only
    #[inline]
    #[must_use]
    pub fn validate_ranges(&self, buffer: &TextBuffer, diffs: &[DiffOperation]) -> RangeReport {
        self.ranges.validate(buffer.line_count(), diffs)
    }

    /// Run every pass and score dangerous operations
    #[must_use]
    pub fn detect(&self, file_id: &FileId, buffer: &TextBuffer, diffs: &[DiffOperation]) -> ConflictReport {
        let ctx = DetectionContext {
            file_id,
            buffer,
            diffs,
        };
        let mut conflicts = Vec::new();
        for pass in &self.passes {
            let found = pass.check(&ctx);
            if !found.is_empty() {
                tracing::debug!(pass = pass.name(), file = %file_id, count = found.len(), "conflicts found");
            }
            conflicts.extend(found);
        }
        let warnings = danger::scan(buffer, diffs);
        ConflictReport {
            conflicts,
            warnings,
        }
    }
}
