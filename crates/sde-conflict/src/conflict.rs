//! Conflict records and resolution options

use sde_buffer::{ConflictId, DiffOperation, FileId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of incompatibility was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    /// Two diffs touch the same lines
    LineOverlap,
    /// Diff imports a module already imported differently
    DependencyConflict,
    /// Diff leaves the buffer structurally unbalanced
    SyntaxConflict,
    /// Diff changes an externally visible contract
    SemanticConflict,
}

impl ConflictType {
    /// Wire name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LineOverlap => "line_overlap",
            Self::DependencyConflict => "dependency_conflict",
            Self::SyntaxConflict => "syntax_conflict",
            Self::SemanticConflict => "semantic_conflict",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Conflict severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Worth a look
    #[default]
    Low,
    /// Likely to need attention
    Medium,
    /// Likely to break something
    High,
    /// Blocks the apply
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        })
    }
}

/// Suggested way out of a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Combine the involved diffs
    Merge,
    /// Keep the buffer as it is
    AcceptCurrent,
    /// Take the proposed diffs
    AcceptIncoming,
    /// Needs a human
    Manual,
}

/// Resolution action with a confidence in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionOption {
    /// Suggested action
    pub action: ResolutionAction,
    /// How sure the detector is
    pub confidence: f64,
}

impl ResolutionOption {
    /// Create option, clamping confidence
    #[inline]
    #[must_use]
    pub fn new(action: ResolutionAction, confidence: f64) -> Self {
        Self {
            action,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// One detected conflict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    /// Unique id
    pub id: ConflictId,
    /// File the conflict belongs to
    pub file_id: FileId,
    /// Kind of conflict
    pub conflict_type: ConflictType,
    /// Human-readable description
    pub description: String,
    /// How bad it is
    pub severity: Severity,
    /// 1-based line numbers affected
    pub affected_lines: Vec<usize>,
    /// Diff operations involved
    pub diffs: Vec<DiffOperation>,
    /// Positions of `diffs` in the submitted batch
    pub diff_indices: Vec<usize>,
    /// Suggested resolutions, most confident first
    pub resolutions: Vec<ResolutionOption>,
}

impl Conflict {
    /// Create conflict with no lines, diffs or resolutions attached
    #[must_use]
    pub fn new(
        file_id: FileId,
        conflict_type: ConflictType,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: ConflictId::new(),
            file_id,
            conflict_type,
            description: description.into(),
            severity,
            affected_lines: Vec::new(),
            diffs: Vec::new(),
            diff_indices: Vec::new(),
            resolutions: Vec::new(),
        }
    }

    /// Attach affected lines (sorted, deduplicated)
    #[must_use]
    pub fn with_lines(mut self, lines: impl IntoIterator<Item = usize>) -> Self {
        self.affected_lines.extend(lines);
        self.affected_lines.sort_unstable();
        self.affected_lines.dedup();
        self
    }

    /// Attach an involved diff by its batch index
    #[must_use]
    pub fn with_diff(mut self, index: usize, diff: &DiffOperation) -> Self {
        self.diff_indices.push(index);
        self.diffs.push(diff.clone());
        self
    }

    /// Attach a resolution option
    #[must_use]
    pub fn with_resolution(mut self, action: ResolutionAction, confidence: f64) -> Self {
        self.resolutions
            .push(ResolutionOption::new(action, confidence));
        self.resolutions
            .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        self
    }

    /// Whether the conflict blocks the apply
    #[inline]
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    /// Most confident resolution, if any
    #[inline]
    #[must_use]
    pub fn suggested(&self) -> Option<ResolutionAction> {
        self.resolutions.first().map(|r| r.action)
    }
}
