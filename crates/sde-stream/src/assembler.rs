//! Content assembly
//!
//! Chunks are kept in a map keyed by sequence number, so the joined text
//! never depends on arrival order. A repeated sequence number is ignored;
//! the first chunk to claim it wins.

use crate::chunk::StreamChunk;
use crate::validator::PartialValidator;
use std::collections::BTreeMap;

/// Result of adding one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyUpdate {
    /// Joined content after the add
    pub content: String,
    /// Lenient validity of that content
    pub is_valid: bool,
    /// The chunk reused a sequence number and was dropped
    pub duplicate: bool,
}

/// Orders chunks by sequence and rejoins them
#[derive(Debug, Clone, Default)]
pub struct ContentAssembler {
    chunks: BTreeMap<u64, StreamChunk>,
    content: String,
    validator: PartialValidator,
}

impl ContentAssembler {
    #[inline]
    #[must_use]
    pub fn new(validator: PartialValidator) -> Self {
        Self {
            chunks: BTreeMap::new(),
            content: String::new(),
            validator,
        }
    }

    /// Insert a chunk and recompute the joined content
    pub fn add_chunk(&mut self, chunk: StreamChunk) -> AssemblyUpdate {
        let duplicate = self.chunks.contains_key(&chunk.sequence());
        if duplicate {
            tracing::debug!(sequence = chunk.sequence(), "duplicate chunk ignored");
        } else {
            self.chunks.insert(chunk.sequence(), chunk);
            self.content = self.chunks.values().map(StreamChunk::content).collect();
        }
        let is_valid = self.validator.validate_partial(&self.content).is_valid;
        AssemblyUpdate {
            content: self.content.clone(),
            is_valid,
            duplicate,
        }
    }

    /// Trimmed final content; repeated calls return the same text
    #[must_use]
    pub fn finalize(&self) -> String {
        self.content.trim().to_string()
    }

    /// Joined content so far, untrimmed
    #[inline]
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Content length in characters
    #[must_use]
    pub fn len(&self) -> usize {
        self.content.chars().count()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Highest sequence number held
    #[must_use]
    pub fn last_sequence(&self) -> Option<u64> {
        self.chunks.keys().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(seq: u64, text: &str) -> StreamChunk {
        StreamChunk::new(seq, text, 4)
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut assembler = ContentAssembler::default();
        assembler.add_chunk(chunk(0, "  fn a() {"));
        assembler.add_chunk(chunk(1, " }\n"));
        let first = assembler.finalize();
        assert_eq!(first, "fn a() { }");
        assert_eq!(assembler.finalize(), first);
    }

    #[test]
    fn out_of_order_matches_in_order() {
        let mut ordered = ContentAssembler::default();
        for (seq, text) in [(0, "a"), (1, "b"), (2, "c")] {
            ordered.add_chunk(chunk(seq, text));
        }
        let mut shuffled = ContentAssembler::default();
        for (seq, text) in [(2, "c"), (0, "a"), (1, "b")] {
            shuffled.add_chunk(chunk(seq, text));
        }
        assert_eq!(ordered.finalize(), "abc");
        assert_eq!(shuffled.finalize(), ordered.finalize());
        assert_eq!(shuffled.last_sequence(), Some(2));
    }

    #[test]
    fn duplicate_sequence_first_wins() {
        let mut assembler = ContentAssembler::default();
        assembler.add_chunk(chunk(0, "first"));
        let update = assembler.add_chunk(chunk(0, "second"));
        assert!(update.duplicate);
        assert_eq!(update.content, "first");
        assert_eq!(assembler.chunk_count(), 1);
    }

    #[test]
    fn partial_validity_is_lenient() {
        let mut assembler = ContentAssembler::default();
        assert!(assembler.add_chunk(chunk(0, "fn a() {")).is_valid);
        assert!(!assembler.add_chunk(chunk(1, "{{{{")).is_valid);
    }
}
