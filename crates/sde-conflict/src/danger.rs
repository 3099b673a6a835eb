//! Dangerous-operation scoring
//!
//! Warnings only. The pipeline escalates a warning into a failure when the
//! same diff is also part of a critical conflict.

use crate::patterns;
use sde_buffer::{DiffKind, DiffOperation, LineRange, TextBuffer};
use serde::{Deserialize, Serialize};

/// Contiguous deletions longer than this are flagged
pub const LARGE_DELETION_LINES: usize = 10;

/// Why an operation looks dangerous
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DangerKind {
    /// Removes an import/export/function/class/interface-like statement
    RemovesDeclaration,
    /// Deletes more than [`LARGE_DELETION_LINES`] contiguous lines
    LargeDeletion,
}

/// Warning attached to one diff of a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DangerWarning {
    /// Index of the diff in the batch
    pub index: usize,
    /// Kind of danger
    pub kind: DangerKind,
    /// Lines concerned
    pub lines: LineRange,
    /// Human-readable message
    pub message: String,
}

/// Score every diff of a batch against `buffer`
#[must_use]
pub fn scan(buffer: &TextBuffer, diffs: &[DiffOperation]) -> Vec<DangerWarning> {
    let mut warnings = Vec::new();
    for (index, diff) in diffs.iter().enumerate() {
        if !diff.kind.removes_lines() || diff.validate_against(buffer.line_count()).is_err() {
            continue;
        }
        let kept: Vec<&str> = diff.content_lines().into_iter().map(str::trim).collect();
        let removed = buffer.lines_in(diff.range);

        for (offset, line) in removed.iter().enumerate() {
            if patterns::is_structural_statement(line) && !kept.contains(&line.trim()) {
                let at = diff.range.start + offset;
                warnings.push(DangerWarning {
                    index,
                    kind: DangerKind::RemovesDeclaration,
                    lines: LineRange::single(at),
                    message: format!("{} removes `{}` at line {at}", diff.kind, line.trim()),
                });
            }
        }

        let deletes_block = diff.kind == DiffKind::Delete || kept.is_empty();
        if deletes_block && diff.range.len() > LARGE_DELETION_LINES {
            warnings.push(DangerWarning {
                index,
                kind: DangerKind::LargeDeletion,
                lines: diff.range,
                message: format!(
                    "{} deletes {} contiguous lines ({})",
                    diff.kind,
                    diff.range.len(),
                    diff.range
                ),
            });
        }
    }
    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> TextBuffer {
        let text: String = (1..=n).map(|i| format!("line {i}\n")).collect();
        TextBuffer::from_text(&text)
    }

    #[test]
    fn deleting_import_warns() {
        let buffer = TextBuffer::from_text("import a from 'a';\nconst x = 1;\n");
        let warnings = scan(&buffer, &[DiffOperation::delete(1, 1)]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, DangerKind::RemovesDeclaration);
        assert_eq!(warnings[0].lines, LineRange::single(1));
    }

    #[test]
    fn replacing_function_with_itself_is_quiet() {
        let buffer = TextBuffer::from_text("fn run() {\n    old();\n}\n");
        let diff = DiffOperation::replace(1, 2, "fn run() {\n    new();");
        assert!(scan(&buffer, &[diff]).is_empty());
    }

    #[test]
    fn large_deletion_warns() {
        let buffer = numbered(20);
        let warnings = scan(&buffer, &[DiffOperation::delete(2, 12)]);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].kind, DangerKind::LargeDeletion);
        assert!(scan(&buffer, &[DiffOperation::delete(2, 11)]).is_empty());
    }

    #[test]
    fn inserts_never_warn() {
        let buffer = numbered(3);
        assert!(scan(&buffer, &[DiffOperation::insert(1, "")]).is_empty());
    }
}
