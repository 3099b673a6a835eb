//! Line-range validity and pairwise overlap checks
//!
//! Every diff is bounds-checked against the current buffer, then every pair
//! is compared. Two ranged edits overlap when they share a line; an insert
//! only collides with a ranged edit when it would land strictly inside the
//! lines that edit removes. Inserts never collide with each other: several
//! inserts at one line are placed in listing order.

use crate::conflict::{Conflict, ConflictType, ResolutionAction, Severity};
use sde_buffer::{DiffError, DiffKind, DiffOperation, FileId, LineRange};
use serde::{Deserialize, Serialize};

/// How two ranges overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapKind {
    /// One range fully contains the other
    Complete,
    /// Ranges share some lines
    Partial,
}

/// Overlap between two diffs of one batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    /// Index of the earlier diff in the batch
    pub first: usize,
    /// Index of the later diff in the batch
    pub second: usize,
    /// Overlap classification
    pub kind: OverlapKind,
    /// Lines both diffs touch
    pub lines: LineRange,
    /// Both diffs were marked mergeable
    pub mergeable: bool,
}

impl Overlap {
    /// Whether this overlap must be reported as a conflict
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self.kind {
            OverlapKind::Complete => true,
            OverlapKind::Partial => !self.mergeable,
        }
    }

    /// Severity of the resulting conflict
    #[inline]
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self.kind {
            OverlapKind::Complete => Severity::Critical,
            OverlapKind::Partial => Severity::High,
        }
    }
}

/// Range check failure for one diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeViolation {
    /// Index in the batch
    pub index: usize,
    /// What is wrong with it
    pub error: DiffError,
}

/// Result of [`RangeValidator::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeReport {
    /// Diffs whose range does not fit the buffer
    pub errors: Vec<RangeViolation>,
    /// Every overlapping pair, conflicting or not
    pub overlaps: Vec<Overlap>,
}

impl RangeReport {
    /// No invalid ranges and no conflicting overlaps
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty() && self.overlaps.iter().all(|o| !o.is_conflict())
    }

    /// Overlaps that must be reported as conflicts
    pub fn conflicting(&self) -> impl Iterator<Item = &Overlap> {
        self.overlaps.iter().filter(|o| o.is_conflict())
    }

    /// Turn the report into a hard error if anything is wrong
    ///
    /// # Errors
    /// The first range violation, else the first conflicting overlap
    pub fn ensure_valid(&self) -> Result<(), ConflictError> {
        if let Some(violation) = self.errors.first() {
            return Err(ConflictError::InvalidRange {
                index: violation.index,
                source: violation.error.clone(),
            });
        }
        if let Some(overlap) = self.conflicting().next() {
            return Err(ConflictError::Overlap {
                first: overlap.first,
                second: overlap.second,
                kind: overlap.kind,
                lines: overlap.lines,
            });
        }
        Ok(())
    }

    /// Human-readable messages for every problem
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        let ranges = self
            .errors
            .iter()
            .map(|v| format!("diff {}: {}", v.index, v.error));
        let overlaps = self.conflicting().map(|o| {
            format!(
                "diffs {} and {} overlap ({:?}) on lines {}",
                o.first, o.second, o.kind, o.lines
            )
        });
        ranges.chain(overlaps).collect()
    }

    /// Conflicting overlaps as [`Conflict`] records
    #[must_use]
    pub fn to_conflicts(&self, file_id: &FileId, diffs: &[DiffOperation]) -> Vec<Conflict> {
        self.conflicting()
            .map(|o| {
                let description = format!(
                    "{} overlap between {} and {} on lines {}",
                    match o.kind {
                        OverlapKind::Complete => "complete",
                        OverlapKind::Partial => "partial",
                    },
                    diffs[o.first].label(),
                    diffs[o.second].label(),
                    o.lines
                );
                let conflict = Conflict::new(
                    file_id.clone(),
                    ConflictType::LineOverlap,
                    o.severity(),
                    description,
                )
                .with_lines(o.lines.lines())
                .with_diff(o.first, &diffs[o.first])
                .with_diff(o.second, &diffs[o.second]);
                match o.kind {
                    OverlapKind::Complete => conflict
                        .with_resolution(ResolutionAction::Manual, 0.8)
                        .with_resolution(ResolutionAction::AcceptIncoming, 0.4)
                        .with_resolution(ResolutionAction::AcceptCurrent, 0.4),
                    OverlapKind::Partial => conflict
                        .with_resolution(ResolutionAction::Merge, 0.6)
                        .with_resolution(ResolutionAction::Manual, 0.5),
                }
            })
            .collect()
    }
}

/// Errors raised when a range report is turned into a hard failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConflictError {
    /// A diff does not fit the buffer
    #[error("diff {index}: {source}")]
    InvalidRange {
        index: usize,
        #[source]
        source: DiffError,
    },

    /// Two diffs overlap in a way that cannot be merged
    #[error("diffs {first} and {second} overlap ({kind:?}) on lines {lines}")]
    Overlap {
        first: usize,
        second: usize,
        kind: OverlapKind,
        lines: LineRange,
    },
}

/// Bounds and overlap checks for a diff batch
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeValidator;

impl RangeValidator {
    /// Create validator
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Check every diff against `line_count` and every pair against each other
    #[must_use]
    pub fn validate(&self, line_count: usize, diffs: &[DiffOperation]) -> RangeReport {
        let mut report = RangeReport::default();
        for (index, diff) in diffs.iter().enumerate() {
            if let Err(error) = diff.validate_against(line_count) {
                report.errors.push(RangeViolation { index, error });
            }
        }
        for i in 0..diffs.len() {
            for j in i + 1..diffs.len() {
                if let Some(overlap) = Self::overlap(i, &diffs[i], j, &diffs[j]) {
                    report.overlaps.push(overlap);
                }
            }
        }
        report
    }

    fn overlap(i: usize, a: &DiffOperation, j: usize, b: &DiffOperation) -> Option<Overlap> {
        let mergeable = a.mergeable && b.mergeable;
        let (kind, lines) = match (a.kind, b.kind) {
            (DiffKind::Insert, DiffKind::Insert) => return None,
            (DiffKind::Insert, _) => (OverlapKind::Complete, Self::insert_hit(a, b)?),
            (_, DiffKind::Insert) => (OverlapKind::Complete, Self::insert_hit(b, a)?),
            _ => {
                if !a.range.intersects(&b.range) {
                    return None;
                }
                let lines = LineRange::new(
                    a.range.start.max(b.range.start),
                    a.range.end.min(b.range.end),
                );
                let kind = if a.range.contains(&b.range) || b.range.contains(&a.range) {
                    OverlapKind::Complete
                } else {
                    OverlapKind::Partial
                };
                (kind, lines)
            }
        };
        Some(Overlap {
            first: i,
            second: j,
            kind,
            lines,
            mergeable,
        })
    }

    /// An insert before line `s` lands inside `ranged` when `start < s <= end`
    fn insert_hit(insert: &DiffOperation, ranged: &DiffOperation) -> Option<LineRange> {
        let at = insert.range.start;
        (ranged.range.start < at && at <= ranged.range.end).then(|| LineRange::single(at))
    }
}
