//! Diff extraction from streamed model output
//!
//! Output is read as a list of hunks:
//!
//! ```text
//! @@ replace 2-3 @@ tighten the guard
//! if (!user) return;
//! @@ delete 7-8 @@
//! @@ insert 5 @@
//! log("ready");
//! ```
//!
//! A single line number means `n-n`. Prose before the first header and
//! markdown fences are skipped. Output without any header is taken as the
//! complete new content of the target file.

use once_cell::sync::Lazy;
use regex::Regex;
use sde_buffer::{DiffKind, DiffOperation};

static HEADER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^@@\s*(insert|replace|delete|modify)\s+(\d+)(?:\s*-\s*(\d+))?\s*@@\s*(.*)$")
        .expect("valid regex")
});

/// Malformed hunk text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractError {
    /// Line starts like a header but does not parse as one
    #[error("line {line}: invalid hunk header `{header}`")]
    InvalidHeader { line: usize, header: String },

    /// Content under a delete hunk
    #[error("line {line}: delete hunks take no content")]
    UnexpectedContent { line: usize },
}

struct Hunk {
    kind: DiffKind,
    start: usize,
    end: usize,
    description: Option<String>,
    header_line: usize,
    body: Vec<String>,
}

impl Hunk {
    fn into_diff(mut self) -> Result<DiffOperation, ExtractError> {
        while self.body.last().is_some_and(|l| l.trim().is_empty()) {
            self.body.pop();
        }
        let content = self.body.join("\n");
        let diff = match self.kind {
            DiffKind::Insert => DiffOperation::insert(self.start, content),
            DiffKind::Replace => DiffOperation::replace(self.start, self.end, content),
            DiffKind::Modify => DiffOperation::modify(self.start, self.end, content),
            DiffKind::Delete => {
                if !content.trim().is_empty() {
                    return Err(ExtractError::UnexpectedContent {
                        line: self.header_line + 1,
                    });
                }
                DiffOperation::delete(self.start, self.end)
            }
        };
        Ok(match self.description {
            Some(description) => diff.with_description(description),
            None => diff,
        })
    }
}

/// Turns model output into a diff batch
#[derive(Debug, Clone, Copy, Default)]
pub struct DiffExtractor;

impl DiffExtractor {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Parse `text` against a target of `line_count` lines
    ///
    /// # Errors
    /// `InvalidHeader` for a `@@` line that does not parse,
    /// `UnexpectedContent` for a delete hunk with a body
    pub fn extract(&self, text: &str, line_count: usize) -> Result<Vec<DiffOperation>, ExtractError> {
        if !text.lines().any(|l| l.trim_start().starts_with("@@")) {
            return Ok(full_replacement(text, line_count));
        }

        let mut diffs = Vec::new();
        let mut current: Option<Hunk> = None;
        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let trimmed = raw.trim_start();
            if trimmed.starts_with("```") {
                continue;
            }
            if trimmed.starts_with("@@") {
                if let Some(hunk) = current.take() {
                    diffs.push(hunk.into_diff()?);
                }
                current = Some(parse_header(trimmed.trim_end(), line_no)?);
                continue;
            }
            match current.as_mut() {
                Some(hunk) => hunk.body.push(raw.to_string()),
                None if !trimmed.is_empty() => {
                    tracing::trace!(line = line_no, "skipping text before first hunk");
                }
                None => {}
            }
        }
        if let Some(hunk) = current {
            diffs.push(hunk.into_diff()?);
        }
        tracing::debug!(hunks = diffs.len(), "diffs extracted");
        Ok(diffs)
    }
}

fn parse_header(header: &str, line: usize) -> Result<Hunk, ExtractError> {
    let invalid = || ExtractError::InvalidHeader {
        line,
        header: header.to_string(),
    };
    let caps = HEADER.captures(header).ok_or_else(invalid)?;
    let kind = match &caps[1] {
        "insert" => DiffKind::Insert,
        "replace" => DiffKind::Replace,
        "delete" => DiffKind::Delete,
        _ => DiffKind::Modify,
    };
    let start: usize = caps[2].parse().map_err(|_| invalid())?;
    let end: usize = match caps.get(3) {
        Some(m) => m.as_str().parse().map_err(|_| invalid())?,
        None => start,
    };
    let description = caps
        .get(4)
        .map(|m| m.as_str().trim())
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    Ok(Hunk {
        kind,
        start,
        end,
        description,
        header_line: line,
        body: Vec::new(),
    })
}

fn full_replacement(text: &str, line_count: usize) -> Vec<DiffOperation> {
    let body: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect();
    let content = body.join("\n");
    let content = content.trim_matches('\n');
    match (line_count, content.is_empty()) {
        (0, true) => Vec::new(),
        (0, false) => vec![DiffOperation::insert(1, content)],
        (n, true) => vec![DiffOperation::delete(1, n)],
        (n, false) => vec![DiffOperation::replace(1, n, content)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hunks_with_descriptions() {
        let text = "Here is the change:\n\
                    @@ replace 2-3 @@ tighten guard\n\
                    if (!user) return;\n\
                    @@ delete 7-8 @@\n\
                    \n\
                    @@ insert 5 @@\n\
                    log(\"ready\");\n";
        let diffs = DiffExtractor::new().extract(text, 10).unwrap();
        assert_eq!(diffs.len(), 3);
        assert_eq!(
            diffs[0],
            DiffOperation::replace(2, 3, "if (!user) return;").with_description("tighten guard")
        );
        assert_eq!(diffs[1], DiffOperation::delete(7, 8));
        assert_eq!(diffs[2], DiffOperation::insert(5, "log(\"ready\");"));
    }

    #[test]
    fn fenced_hunks() {
        let text = "```diff\n@@ modify 4 @@\nlet x = 2;\n```\n";
        let diffs = DiffExtractor::new().extract(text, 4).unwrap();
        assert_eq!(diffs, vec![DiffOperation::modify(4, 4, "let x = 2;")]);
    }

    #[test]
    fn headerless_text_replaces_the_file() {
        let extractor = DiffExtractor::new();
        assert_eq!(
            extractor.extract("```ts\nconst a = 1;\n```", 3).unwrap(),
            vec![DiffOperation::replace(1, 3, "const a = 1;")]
        );
        assert_eq!(
            extractor.extract("a\nb\n", 0).unwrap(),
            vec![DiffOperation::insert(1, "a\nb")]
        );
        assert!(extractor.extract("", 0).unwrap().is_empty());
    }

    #[test]
    fn malformed_hunks_are_errors() {
        let extractor = DiffExtractor::new();
        assert_eq!(
            extractor.extract("@@ move 1 @@\n", 3).unwrap_err(),
            ExtractError::InvalidHeader {
                line: 1,
                header: "@@ move 1 @@".into()
            }
        );
        assert_eq!(
            extractor.extract("@@ delete 1-2 @@\nstray\n", 3).unwrap_err(),
            ExtractError::UnexpectedContent { line: 2 }
        );
    }
}
