//! Pluggable detection passes
//!
//! Each [`ConflictPass`] looks at the whole batch against the current
//! buffer and returns the conflicts it finds. Passes are independent and
//! run in registration order.

use crate::conflict::{Conflict, ConflictType, ResolutionAction, Severity};
use crate::patterns;
use crate::range::RangeValidator;
use crate::semantic::{self, BreakingKind};
use sde_buffer::{balance, DiffKind, DiffOperation, FileId, TextBuffer};

/// Everything a pass may look at
#[derive(Debug, Clone, Copy)]
pub struct DetectionContext<'a> {
    /// File the batch targets
    pub file_id: &'a FileId,
    /// Current content
    pub buffer: &'a TextBuffer,
    /// Proposed batch
    pub diffs: &'a [DiffOperation],
}

impl DetectionContext<'_> {
    /// Buffer with only diff `index` applied, or `None` if it does not fit
    #[must_use]
    pub fn apply_alone(&self, index: usize) -> Option<TextBuffer> {
        let mut scratch = self.buffer.clone();
        scratch.apply(&self.diffs[index]).ok()?;
        Some(scratch)
    }

    fn conflict(&self, conflict_type: ConflictType, severity: Severity, description: String) -> Conflict {
        Conflict::new(self.file_id.clone(), conflict_type, severity, description)
    }
}

/// One family of conflict checks
pub trait ConflictPass: Send + Sync + std::fmt::Debug {
    /// Pass name (for logs)
    fn name(&self) -> &'static str;

    /// Conflicts this pass finds in the batch
    fn check(&self, ctx: &DetectionContext<'_>) -> Vec<Conflict>;
}

/// Pairwise line overlaps
#[derive(Debug, Clone, Copy, Default)]
pub struct OverlapPass;

impl ConflictPass for OverlapPass {
    fn name(&self) -> &'static str {
        "overlap"
    }

    fn check(&self, ctx: &DetectionContext<'_>) -> Vec<Conflict> {
        RangeValidator::new()
            .validate(ctx.buffer.line_count(), ctx.diffs)
            .to_conflicts(ctx.file_id, ctx.diffs)
    }
}

/// Imports of a module the buffer already imports differently
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyPass;

impl ConflictPass for DependencyPass {
    fn name(&self) -> &'static str {
        "dependency"
    }

    fn check(&self, ctx: &DetectionContext<'_>) -> Vec<Conflict> {
        let existing = patterns::imports(&ctx.buffer.text());
        let mut conflicts = Vec::new();
        for (index, diff) in ctx.diffs.iter().enumerate() {
            if diff.kind == DiffKind::Delete {
                continue;
            }
            for incoming in patterns::imports(&diff.content) {
                let clash = existing.iter().find(|current| {
                    let line = current.line + 1;
                    let replaced = diff.kind.removes_lines() && diff.range.contains_line(line);
                    current.module == incoming.module
                        && current.clause != incoming.clause
                        && !replaced
                });
                if let Some(current) = clash {
                    let line = current.line + 1;
                    conflicts.push(
                        ctx.conflict(
                            ConflictType::DependencyConflict,
                            Severity::Medium,
                            format!(
                                "`{}` already imported at line {line} as `{}`, diff imports `{}`",
                                incoming.module, current.clause, incoming.clause
                            ),
                        )
                        .with_lines([line])
                        .with_diff(index, diff)
                        .with_resolution(ResolutionAction::Merge, 0.7)
                        .with_resolution(ResolutionAction::AcceptCurrent, 0.5),
                    );
                }
            }
        }
        conflicts
    }
}

/// Diffs that unbalance a balanced buffer when applied alone
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxPass;

impl ConflictPass for SyntaxPass {
    fn name(&self) -> &'static str {
        "syntax"
    }

    fn check(&self, ctx: &DetectionContext<'_>) -> Vec<Conflict> {
        if !balance::scan(&ctx.buffer.text()).is_balanced() {
            return Vec::new();
        }
        let mut conflicts = Vec::new();
        for (index, diff) in ctx.diffs.iter().enumerate() {
            let Some(scratch) = ctx.apply_alone(index) else {
                continue;
            };
            let report = balance::scan(&scratch.text());
            if let Some(problem) = report.describe() {
                conflicts.push(
                    ctx.conflict(
                        ConflictType::SyntaxConflict,
                        Severity::High,
                        format!("{} leaves the file unbalanced: {problem}", diff.label()),
                    )
                    .with_lines(diff.range.lines())
                    .with_diff(index, diff)
                    .with_resolution(ResolutionAction::Manual, 0.9)
                    .with_resolution(ResolutionAction::AcceptCurrent, 0.6),
                );
            }
        }
        conflicts
    }
}

/// Heuristic contract changes and direct state mutation
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticPass;

impl ConflictPass for SemanticPass {
    fn name(&self) -> &'static str {
        "semantic"
    }

    fn check(&self, ctx: &DetectionContext<'_>) -> Vec<Conflict> {
        let before = ctx.buffer.text();
        let mut conflicts = Vec::new();

        for (index, diff) in ctx.diffs.iter().enumerate() {
            let Some(scratch) = ctx.apply_alone(index) else {
                continue;
            };
            let after = scratch.text();

            for change in semantic::breaking_changes(&before, &after) {
                let (severity, lines): (Severity, Vec<usize>) = match change.kind {
                    BreakingKind::RemovedExport => {
                        let outside = ctx.buffer.text_outside(diff.range);
                        if patterns::references(&outside, &change.symbol).is_empty() {
                            continue;
                        }
                        let refs = patterns::references(&before, &change.symbol)
                            .into_iter()
                            .filter(|line| !diff.range.contains_line(*line))
                            .collect();
                        (Severity::Critical, refs)
                    }
                    BreakingKind::AddedRequiredParam | BreakingKind::RemovedRequiredField => {
                        (Severity::High, diff.range.lines().collect())
                    }
                };
                conflicts.push(
                    ctx.conflict(
                        ConflictType::SemanticConflict,
                        severity,
                        format!("{} (heuristic)", change.detail),
                    )
                    .with_lines(lines)
                    .with_diff(index, diff)
                    .with_resolution(ResolutionAction::Manual, 0.8)
                    .with_resolution(ResolutionAction::AcceptCurrent, 0.6),
                );
            }

            let mutations = semantic::direct_state_mutations(&diff.content);
            if !mutations.is_empty() {
                conflicts.push(
                    ctx.conflict(
                        ConflictType::SemanticConflict,
                        Severity::Low,
                        format!(
                            "{} mutates held state directly (heuristic)",
                            diff.label()
                        ),
                    )
                    .with_lines(mutations.into_iter().map(|offset| diff.range.start + offset))
                    .with_diff(index, diff)
                    .with_resolution(ResolutionAction::AcceptIncoming, 0.6)
                    .with_resolution(ResolutionAction::Manual, 0.4),
                );
            }
        }
        conflicts
    }
}
