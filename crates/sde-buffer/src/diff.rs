//! Line-addressed diff operations
//!
//! A [`DiffOperation`] is one structured edit over a 1-indexed, inclusive
//! line range. Operations are plain data: they can arrive from a parser over
//! streamed model output or from any external producer as JSON.
//!
//! # Invariants
//! - `range.start >= 1`
//! - `range.end >= range.start`
//! - delete/replace/modify ranges never extend past the buffer's last line
//! - inserts may target `line_count + 1` (append at end of file)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;

/// Kind of edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    /// Insert content so that it starts at `range.start`
    Insert,
    /// Replace the range with new content
    Replace,
    /// Remove the range
    Delete,
    /// Rewrite the range in place
    Modify,
}

impl DiffKind {
    /// Whether the operation removes existing lines
    #[inline]
    #[must_use]
    pub fn removes_lines(&self) -> bool {
        !matches!(self, Self::Insert)
    }

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::Modify => "modify",
        }
    }
}

impl fmt::Display for DiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-indexed inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineRange {
    /// First line (1-indexed)
    pub start: usize,
    /// Last line (inclusive)
    pub end: usize,
}

impl LineRange {
    /// Create range `[start, end]`
    #[inline]
    #[must_use]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Single-line range
    #[inline]
    #[must_use]
    pub const fn single(line: usize) -> Self {
        Self::new(line, line)
    }

    /// Number of lines covered
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            self.end - self.start + 1
        }
    }

    /// True if the range covers no lines
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `line` falls inside the range
    #[inline]
    #[must_use]
    pub fn contains_line(&self, line: usize) -> bool {
        self.start <= line && line <= self.end
    }

    /// Whether `other` lies entirely inside this range
    #[inline]
    #[must_use]
    pub fn contains(&self, other: &LineRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether the two ranges share at least one line
    #[inline]
    #[must_use]
    pub fn intersects(&self, other: &LineRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Smallest range covering both
    #[inline]
    #[must_use]
    pub fn union(&self, other: &LineRange) -> LineRange {
        LineRange::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Iterate line numbers
    #[inline]
    #[must_use]
    pub fn lines(&self) -> RangeInclusive<usize> {
        self.start..=self.end
    }
}

impl fmt::Display for LineRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One structured edit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffOperation {
    /// Edit kind
    pub kind: DiffKind,
    /// Target lines
    pub range: LineRange,
    /// Replacement or inserted text (ignored for deletes)
    #[serde(default)]
    pub content: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Producer confidence in `[0, 1]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Rendered preview for review UIs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
    /// Partial overlaps with other mergeable diffs are tolerated
    #[serde(default)]
    pub mergeable: bool,
}

impl DiffOperation {
    fn with_kind(kind: DiffKind, range: LineRange, content: impl Into<String>) -> Self {
        Self {
            kind,
            range,
            content: content.into(),
            description: None,
            confidence: None,
            preview: None,
            mergeable: false,
        }
    }

    /// Insert `content` so it starts at line `at`
    #[inline]
    #[must_use]
    pub fn insert(at: usize, content: impl Into<String>) -> Self {
        Self::with_kind(DiffKind::Insert, LineRange::single(at), content)
    }

    /// Replace `[start, end]` with `content`
    #[inline]
    #[must_use]
    pub fn replace(start: usize, end: usize, content: impl Into<String>) -> Self {
        Self::with_kind(DiffKind::Replace, LineRange::new(start, end), content)
    }

    /// Delete `[start, end]`
    #[inline]
    #[must_use]
    pub fn delete(start: usize, end: usize) -> Self {
        Self::with_kind(DiffKind::Delete, LineRange::new(start, end), String::new())
    }

    /// Modify `[start, end]` in place
    #[inline]
    #[must_use]
    pub fn modify(start: usize, end: usize, content: impl Into<String>) -> Self {
        Self::with_kind(DiffKind::Modify, LineRange::new(start, end), content)
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With confidence (clamped to `[0, 1]`)
    #[inline]
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// With preview text
    #[inline]
    #[must_use]
    pub fn with_preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    /// Mark as mergeable with partially overlapping diffs
    #[inline]
    #[must_use]
    pub fn mergeable(mut self) -> Self {
        self.mergeable = true;
        self
    }

    /// Lines of the new content
    #[must_use]
    pub fn content_lines(&self) -> Vec<&str> {
        if self.kind == DiffKind::Delete || self.content.is_empty() {
            return Vec::new();
        }
        self.content.lines().collect()
    }

    /// Net change in line count once applied
    #[must_use]
    pub fn line_delta(&self) -> isize {
        let added = self.content_lines().len() as isize;
        let removed = if self.kind.removes_lines() {
            self.range.len() as isize
        } else {
            0
        };
        added - removed
    }

    /// Check the operation against a buffer of `line_count` lines
    ///
    /// # Errors
    /// Returns the first violated range invariant
    pub fn validate_against(&self, line_count: usize) -> Result<(), DiffError> {
        let LineRange { start, end } = self.range;
        if start == 0 {
            return Err(DiffError::ZeroLine { kind: self.kind });
        }
        if end < start {
            return Err(DiffError::InvertedRange { start, end });
        }
        match self.kind {
            DiffKind::Insert => {
                if start > line_count + 1 {
                    return Err(DiffError::OutOfBounds {
                        kind: self.kind,
                        range: self.range,
                        line_count,
                    });
                }
            }
            DiffKind::Replace | DiffKind::Delete | DiffKind::Modify => {
                if end > line_count {
                    return Err(DiffError::OutOfBounds {
                        kind: self.kind,
                        range: self.range,
                        line_count,
                    });
                }
            }
        }
        Ok(())
    }

    /// Apply to a line vector in place
    ///
    /// # Errors
    /// Returns error if the range is invalid for `lines`
    pub fn apply_to(&self, lines: &mut Vec<String>) -> Result<(), DiffError> {
        self.validate_against(lines.len())?;
        let new_lines = self.content_lines().into_iter().map(str::to_string);
        let start = self.range.start - 1;
        match self.kind {
            DiffKind::Insert => {
                lines.splice(start..start, new_lines);
            }
            DiffKind::Replace | DiffKind::Modify | DiffKind::Delete => {
                lines.splice(start..self.range.end, new_lines);
            }
        }
        Ok(())
    }

    /// Short label for logs and audit entries
    #[must_use]
    pub fn label(&self) -> String {
        match &self.description {
            Some(description) => format!("{} {}: {}", self.kind, self.range, description),
            None => format!("{} {}", self.kind, self.range),
        }
    }
}

/// Indices of `diffs` in the order they must be applied so that no edit
/// shifts the lines of one still waiting to be applied.
///
/// Start lines descend. On a tie, ranged edits go before inserts, and inserts
/// at the same line go in reverse listing order so they end up in listing
/// order in the result.
#[must_use]
pub fn bottom_up_order(diffs: &[DiffOperation]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..diffs.len()).collect();
    order.sort_by(|&a, &b| {
        let (da, db) = (&diffs[a], &diffs[b]);
        db.range
            .start
            .cmp(&da.range.start)
            .then_with(|| {
                let ia = da.kind == DiffKind::Insert;
                let ib = db.kind == DiffKind::Insert;
                ia.cmp(&ib)
            })
            .then_with(|| b.cmp(&a))
    });
    order
}

/// Errors specific to diff operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiffError {
    /// Line 0 used in a 1-indexed range
    #[error("{kind} targets line 0; lines are 1-indexed")]
    ZeroLine { kind: DiffKind },

    /// `end < start`
    #[error("inverted range: start {start} > end {end}")]
    InvertedRange { start: usize, end: usize },

    /// Range past the end of the buffer
    #[error("{kind} range {range} exceeds buffer of {line_count} lines")]
    OutOfBounds {
        kind: DiffKind,
        range: LineRange,
        line_count: usize,
    },

    /// Builder missing a required field
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// Builder for diff operations
#[derive(Debug, Default)]
pub struct DiffBuilder {
    kind: Option<DiffKind>,
    range: Option<LineRange>,
    content: String,
    description: Option<String>,
    confidence: Option<f64>,
    preview: Option<String>,
    mergeable: bool,
}

impl DiffBuilder {
    /// Create new builder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set kind
    #[inline]
    #[must_use]
    pub fn kind(mut self, kind: DiffKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Set range
    #[inline]
    #[must_use]
    pub fn lines(mut self, start: usize, end: usize) -> Self {
        self.range = Some(LineRange::new(start, end));
        self
    }

    /// Set content
    #[inline]
    #[must_use]
    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Set description
    #[inline]
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set confidence
    #[inline]
    #[must_use]
    pub fn confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Set preview
    #[inline]
    #[must_use]
    pub fn preview(mut self, preview: impl Into<String>) -> Self {
        self.preview = Some(preview.into());
        self
    }

    /// Mark mergeable
    #[inline]
    #[must_use]
    pub fn mergeable(mut self, mergeable: bool) -> Self {
        self.mergeable = mergeable;
        self
    }

    /// Build operation
    ///
    /// # Errors
    /// Returns error if kind or range is missing
    pub fn build(self) -> Result<DiffOperation, DiffError> {
        let kind = self.kind.ok_or(DiffError::MissingField("kind"))?;
        let range = self.range.ok_or(DiffError::MissingField("range"))?;
        Ok(DiffOperation {
            kind,
            range,
            content: self.content,
            description: self.description,
            confidence: self.confidence,
            preview: self.preview,
            mergeable: self.mergeable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {i}")).collect()
    }

    #[test]
    fn range_relations() {
        let outer = LineRange::new(5, 10);
        assert!(outer.contains(&LineRange::new(6, 8)));
        assert!(!outer.contains(&LineRange::new(8, 12)));
        assert!(outer.intersects(&LineRange::new(8, 12)));
        assert!(!outer.intersects(&LineRange::new(11, 12)));
        assert_eq!(outer.union(&LineRange::new(8, 12)), LineRange::new(5, 12));
        assert_eq!(outer.len(), 6);
    }

    #[test]
    fn validate_rejects_zero_and_inverted() {
        assert_eq!(
            DiffOperation::delete(0, 2).validate_against(5),
            Err(DiffError::ZeroLine {
                kind: DiffKind::Delete
            })
        );
        assert!(matches!(
            DiffOperation::replace(4, 2, "x").validate_against(5),
            Err(DiffError::InvertedRange { start: 4, end: 2 })
        ));
    }

    #[test]
    fn validate_bounds_by_kind() {
        assert!(DiffOperation::insert(6, "tail").validate_against(5).is_ok());
        assert!(DiffOperation::insert(7, "tail").validate_against(5).is_err());
        assert!(DiffOperation::delete(4, 5).validate_against(5).is_ok());
        assert!(DiffOperation::delete(4, 6).validate_against(5).is_err());
        assert!(DiffOperation::insert(1, "first").validate_against(0).is_ok());
    }

    #[test]
    fn apply_insert_replace_delete() {
        let mut buf = lines(3);
        DiffOperation::insert(2, "new").apply_to(&mut buf).unwrap();
        assert_eq!(buf, vec!["line 1", "new", "line 2", "line 3"]);

        DiffOperation::replace(2, 3, "a\nb\nc").apply_to(&mut buf).unwrap();
        assert_eq!(buf, vec!["line 1", "a", "b", "c", "line 3"]);

        DiffOperation::delete(1, 2).apply_to(&mut buf).unwrap();
        assert_eq!(buf, vec!["b", "c", "line 3"]);
    }

    #[test]
    fn line_delta_counts() {
        assert_eq!(DiffOperation::replace(2, 3, "x").line_delta(), -1);
        assert_eq!(DiffOperation::delete(7, 8).line_delta(), -2);
        assert_eq!(DiffOperation::insert(1, "a\nb").line_delta(), 2);
    }

    #[test]
    fn bottom_up_order_sorts_descending() {
        let diffs = vec![
            DiffOperation::replace(2, 3, "x"),
            DiffOperation::delete(7, 8),
            DiffOperation::insert(7, "ins"),
        ];
        assert_eq!(bottom_up_order(&diffs), vec![1, 2, 0]);
    }

    #[test]
    fn builder_requires_kind_and_range() {
        assert_eq!(
            DiffBuilder::new().lines(1, 1).build(),
            Err(DiffError::MissingField("kind"))
        );
        let op = DiffBuilder::new()
            .kind(DiffKind::Modify)
            .lines(3, 4)
            .content("x")
            .confidence(1.7)
            .build()
            .unwrap();
        assert_eq!(op.confidence, Some(1.0));
        assert_eq!(op.label(), "modify 3-4");
    }

    #[test]
    fn deserializes_from_producer_json() {
        let json = r#"{"kind":"replace","range":{"start":2,"end":3},"content":"x"}"#;
        let op: DiffOperation = serde_json::from_str(json).unwrap();
        assert_eq!(op, DiffOperation::replace(2, 3, "x"));
    }
}
