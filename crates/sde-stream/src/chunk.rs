//! Stream chunks
//!
//! A chunk is immutable once built; the assembler orders chunks strictly by
//! sequence number, never by arrival.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use sde_buffer::{estimate_tokens, ChunkId};
use serde::{Deserialize, Serialize};
use std::fmt;

static IMPORT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(?:import\s|from\s+\S+\s+import\s|use\s+[\w:{]|(?:const|let|var)\s+.+=\s*require\()")
        .expect("valid regex")
});
static EXPORT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:export\s|module\.exports|pub(?:\([^)]*\))?\s)").expect("valid regex"));
static COMMENT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?://|/\*|\*|#(?:[^!\[]|$)|--)").expect("valid regex"));

/// Inferred kind of content in a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChunkCategory {
    #[default]
    Code,
    Comment,
    Structure,
    Import,
    Export,
}

impl ChunkCategory {
    /// Infer a category from chunk text
    #[must_use]
    pub fn infer(content: &str) -> Self {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Self::Code;
        }
        if IMPORT_LINE.is_match(content) {
            return Self::Import;
        }
        if EXPORT_LINE.is_match(content) {
            return Self::Export;
        }
        if trimmed
            .lines()
            .filter(|l| !l.trim().is_empty())
            .all(|l| COMMENT_LINE.is_match(l))
        {
            return Self::Comment;
        }
        if trimmed
            .chars()
            .all(|c| matches!(c, '{' | '}' | '(' | ')' | '[' | ']' | ';' | ',') || c.is_whitespace())
        {
            return Self::Structure;
        }
        Self::Code
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Comment => "comment",
            Self::Structure => "structure",
            Self::Import => "import",
            Self::Export => "export",
        }
    }
}

impl fmt::Display for ChunkCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One fragment of streamed output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamChunk {
    id: ChunkId,
    sequence: u64,
    content: String,
    is_complete: bool,
    has_more: bool,
    token_count: usize,
    category: ChunkCategory,
    timestamp: DateTime<Utc>,
    metadata: IndexMap<String, serde_json::Value>,
}

impl StreamChunk {
    /// Build a chunk, inferring category and token count
    #[must_use]
    pub fn new(sequence: u64, content: impl Into<String>, chars_per_token: usize) -> Self {
        let content = content.into();
        Self {
            id: ChunkId::new(),
            sequence,
            token_count: estimate_tokens(&content, chars_per_token),
            category: ChunkCategory::infer(&content),
            content,
            is_complete: false,
            has_more: true,
            timestamp: Utc::now(),
            metadata: IndexMap::new(),
        }
    }

    /// Mark as the last chunk of the stream
    #[must_use]
    pub fn finished(mut self) -> Self {
        self.is_complete = true;
        self.has_more = false;
        self
    }

    /// Attach producer metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: IndexMap<String, serde_json::Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Record one tag, returning the tagged chunk
    #[must_use]
    pub fn tagged(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ChunkId {
        self.id
    }

    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    #[inline]
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    #[inline]
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.has_more
    }

    #[inline]
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    #[inline]
    #[must_use]
    pub fn category(&self) -> ChunkCategory {
        self.category
    }

    #[inline]
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &IndexMap<String, serde_json::Value> {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories() {
        assert_eq!(ChunkCategory::infer("import x from 'y';"), ChunkCategory::Import);
        assert_eq!(ChunkCategory::infer("use std::fmt;\n"), ChunkCategory::Import);
        assert_eq!(ChunkCategory::infer("from os import path"), ChunkCategory::Import);
        assert_eq!(ChunkCategory::infer("export const a = 1;"), ChunkCategory::Export);
        assert_eq!(ChunkCategory::infer("pub fn a() {}"), ChunkCategory::Export);
        assert_eq!(ChunkCategory::infer("// note\n/* more */"), ChunkCategory::Comment);
        assert_eq!(ChunkCategory::infer("# heading"), ChunkCategory::Comment);
        assert_eq!(ChunkCategory::infer("  });\n}"), ChunkCategory::Structure);
        assert_eq!(ChunkCategory::infer("let x = 1;"), ChunkCategory::Code);
        assert_eq!(ChunkCategory::infer("#[derive(Debug)]"), ChunkCategory::Code);
    }

    #[test]
    fn chunk_fields() {
        let chunk = StreamChunk::new(3, "fn main() {}", 4)
            .finished()
            .tagged("source", serde_json::json!("test"));
        assert_eq!(chunk.sequence(), 3);
        assert_eq!(chunk.token_count(), 3);
        assert!(chunk.is_complete());
        assert!(!chunk.has_more());
        assert_eq!(chunk.metadata()["source"], "test");
    }
}
