//! Versioned, line-addressed text buffer

use crate::diff::{bottom_up_order, DiffError, DiffOperation, LineRange};
use crate::hash::ContentHash;

/// Text split into lines, with a version counter bumped on every edit
///
/// # Invariants
/// - `text()` reproduces the input of `from_text` byte-for-byte for LF input
/// - `version` never decreases
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TextBuffer {
    lines: Vec<String>,
    trailing_newline: bool,
    version: u64,
}

impl TextBuffer {
    /// Split `text` into a buffer at version 0
    #[must_use]
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
            trailing_newline: text.ends_with('\n'),
            version: 0,
        }
    }

    /// Set the starting version
    #[inline]
    #[must_use]
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    /// Rejoin lines
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = self.lines.join("\n");
        if self.trailing_newline && !self.lines.is_empty() {
            out.push('\n');
        }
        out
    }

    /// Number of lines
    #[inline]
    #[must_use]
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// True if the buffer has no lines
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// All lines
    #[inline]
    #[must_use]
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// Line `n` (1-indexed)
    #[inline]
    #[must_use]
    pub fn line(&self, n: usize) -> Option<&str> {
        n.checked_sub(1)
            .and_then(|i| self.lines.get(i))
            .map(String::as_str)
    }

    /// Lines inside `range`, clamped to the buffer
    #[must_use]
    pub fn lines_in(&self, range: LineRange) -> &[String] {
        let start = range.start.saturating_sub(1).min(self.lines.len());
        let end = range.end.min(self.lines.len()).max(start);
        &self.lines[start..end]
    }

    /// Text outside `range`, joined with newlines
    #[must_use]
    pub fn text_outside(&self, range: LineRange) -> String {
        self.lines
            .iter()
            .enumerate()
            .filter(|(i, _)| !range.contains_line(i + 1))
            .map(|(_, l)| l.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Current version
    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Content hash of `text()`
    #[inline]
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        ContentHash::of_text(&self.text())
    }

    /// Apply one operation
    ///
    /// # Errors
    /// Returns error if the operation's range is invalid for this buffer
    pub fn apply(&mut self, op: &DiffOperation) -> Result<(), DiffError> {
        op.apply_to(&mut self.lines)?;
        self.version += 1;
        Ok(())
    }

    /// Apply a batch bottom-up, reporting each operation's outcome in input order
    ///
    /// Failed operations leave the buffer untouched; the rest still apply.
    pub fn apply_bottom_up(&mut self, ops: &[DiffOperation]) -> Vec<Result<(), DiffError>> {
        let mut outcomes: Vec<Result<(), DiffError>> = vec![Ok(()); ops.len()];
        for idx in bottom_up_order(ops) {
            outcomes[idx] = self.apply(&ops[idx]);
        }
        outcomes
    }
}

impl From<&str> for TextBuffer {
    fn from(value: &str) -> Self {
        Self::from_text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn numbered(n: usize) -> TextBuffer {
        let text: Vec<String> = (1..=n).map(|i| format!("line {i}")).collect();
        TextBuffer::from_text(&(text.join("\n") + "\n"))
    }

    #[test]
    fn text_roundtrip_preserves_trailing_newline() {
        assert_eq!(TextBuffer::from_text("a\nb\n").text(), "a\nb\n");
        assert_eq!(TextBuffer::from_text("a\nb").text(), "a\nb");
        assert_eq!(TextBuffer::from_text("").text(), "");
    }

    #[test]
    fn line_lookup_is_one_indexed() {
        let buf = numbered(3);
        assert_eq!(buf.line(1), Some("line 1"));
        assert_eq!(buf.line(0), None);
        assert_eq!(buf.line(4), None);
        assert_eq!(buf.lines_in(LineRange::new(2, 9)).len(), 2);
    }

    #[test]
    fn bottom_up_batch_keeps_untouched_lines_in_order() {
        let mut buf = numbered(10);
        let ops = vec![
            DiffOperation::replace(2, 3, "replacement"),
            DiffOperation::delete(7, 8),
        ];
        let outcomes = buf.apply_bottom_up(&ops);
        assert!(outcomes.iter().all(Result::is_ok));
        assert_eq!(
            buf.lines(),
            &[
                "line 1",
                "replacement",
                "line 4",
                "line 5",
                "line 6",
                "line 9",
                "line 10"
            ]
        );
        assert_eq!(buf.version(), 2);
    }

    #[test]
    fn failed_op_reported_in_input_position() {
        let mut buf = numbered(3);
        let ops = vec![DiffOperation::delete(5, 6), DiffOperation::delete(1, 1)];
        let outcomes = buf.apply_bottom_up(&ops);
        assert!(outcomes[0].is_err());
        assert!(outcomes[1].is_ok());
        assert_eq!(buf.line_count(), 2);
    }

    #[test]
    fn text_outside_skips_range() {
        let buf = numbered(4);
        assert_eq!(buf.text_outside(LineRange::new(2, 3)), "line 1\nline 4");
    }

    proptest! {
        #[test]
        fn bottom_up_matches_top_down_model(
            segments in prop::collection::vec((0usize..4, 1usize..4, any::<bool>()), 0..8),
            tail in 1usize..4,
            reversed in any::<bool>(),
        ) {
            let mut ops = Vec::new();
            let mut expected = Vec::new();
            let mut line = 1;
            for (k, (gap, len, replace)) in segments.iter().enumerate() {
                expected.extend((line..line + gap).map(|i| format!("line {i}")));
                let start = line + gap;
                let end = start + len - 1;
                if *replace {
                    ops.push(DiffOperation::replace(start, end, format!("r{k}")));
                    expected.push(format!("r{k}"));
                } else {
                    ops.push(DiffOperation::delete(start, end));
                }
                line = end + 1;
            }
            let n = line - 1 + tail;
            expected.extend((line..=n).map(|i| format!("line {i}")));
            if reversed {
                ops.reverse();
            }

            let mut buf = numbered(n);
            let outcomes = buf.apply_bottom_up(&ops);
            prop_assert!(outcomes.iter().all(Result::is_ok));
            prop_assert_eq!(buf.lines(), expected.as_slice());
            prop_assert_eq!(buf.version(), ops.len() as u64);
        }
    }
}
