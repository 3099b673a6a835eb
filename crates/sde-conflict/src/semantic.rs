//! Best-effort semantic impact heuristics
//!
//! Compares the text before and after an edit for changes to externally
//! visible contracts: exported names, function parameter lists and type
//! shapes. Pattern matching can both over- and under-report; nothing here is
//! a type checker and results must be read as hints.

use crate::patterns;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static ACCESSOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\bset\s+[A-Za-z_$][\w$]*\s*\(|\bfn\s+set_\w+|\bfunction\s+set[A-Z_]\w*|\bdef\s+set_\w+|\bsetState\s*\(")
        .expect("valid regex")
});

/// Kind of contract change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakingKind {
    /// Exported name no longer declared
    RemovedExport,
    /// Existing function gained a parameter callers must supply
    AddedRequiredParam,
    /// Existing type lost a required field
    RemovedRequiredField,
}

/// One detected contract change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BreakingChange {
    /// Kind of change
    pub kind: BreakingKind,
    /// Symbol whose contract changed
    pub symbol: String,
    /// What changed
    pub detail: String,
}

/// Outcome of comparing two versions of a file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticImpact {
    /// Contract changes found
    pub breaking_changes: Vec<BreakingChange>,
    /// Removed exports still referenced in the new text
    pub dangling_references: Vec<String>,
    /// Whether the change is acceptable
    pub is_valid: bool,
}

/// Heuristic before/after comparison
#[derive(Debug, Clone, Copy, Default)]
pub struct SemanticAnalyzer {
    strict: bool,
}

impl SemanticAnalyzer {
    /// Analyzer that only rejects dangling references
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also reject any breaking change
    #[inline]
    #[must_use]
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Compare `before` with `after`
    #[must_use]
    pub fn impact(&self, before: &str, after: &str) -> SemanticImpact {
        let breaking_changes = breaking_changes(before, after);
        let dangling_references: Vec<String> = breaking_changes
            .iter()
            .filter(|c| c.kind == BreakingKind::RemovedExport)
            .filter(|c| !patterns::references(after, &c.symbol).is_empty())
            .map(|c| c.symbol.clone())
            .collect();
        let is_valid =
            dangling_references.is_empty() && (!self.strict || breaking_changes.is_empty());
        if !is_valid {
            tracing::debug!(
                breaking = breaking_changes.len(),
                dangling = dangling_references.len(),
                "semantic impact rejected"
            );
        }
        SemanticImpact {
            breaking_changes,
            dangling_references,
            is_valid,
        }
    }
}

/// Contract changes between two versions of a text
#[must_use]
pub fn breaking_changes(before: &str, after: &str) -> Vec<BreakingChange> {
    let mut changes = Vec::new();

    let still_declared = patterns::declared_names(after);
    for name in patterns::exported_names(before) {
        if !still_declared.contains(&name) {
            changes.push(BreakingChange {
                kind: BreakingKind::RemovedExport,
                detail: format!("exported `{name}` removed"),
                symbol: name,
            });
        }
    }

    let old_fns = patterns::functions(before);
    for (name, new_params) in patterns::functions(after) {
        let Some(old_params) = old_fns.get(&name) else {
            continue;
        };
        for param in new_params.iter().filter(|p| !p.optional) {
            if !old_params.iter().any(|old| old.name == param.name) {
                changes.push(BreakingChange {
                    kind: BreakingKind::AddedRequiredParam,
                    symbol: name.clone(),
                    detail: format!("`{name}` gained required parameter `{}`", param.name),
                });
            }
        }
    }

    let old_types = patterns::type_shapes(before);
    for (name, new_fields) in patterns::type_shapes(after) {
        let Some(old_fields) = old_types.get(&name) else {
            continue;
        };
        for field in old_fields.iter().filter(|f| f.required) {
            if !new_fields.iter().any(|f| f.name == field.name) {
                changes.push(BreakingChange {
                    kind: BreakingKind::RemovedRequiredField,
                    symbol: name.clone(),
                    detail: format!("`{name}` lost required field `{}`", field.name),
                });
            }
        }
    }

    changes
}

/// 0-based offsets of lines in `content` that mutate held state directly
///
/// Content that itself declares a setter or calls `setState` is treated as
/// going through an accessor.
#[must_use]
pub fn direct_state_mutations(content: &str) -> Vec<usize> {
    if ACCESSOR.is_match(content) {
        return Vec::new();
    }
    patterns::state_mutations(content)
        .into_iter()
        .map(|line| line - 1)
        .collect()
}
