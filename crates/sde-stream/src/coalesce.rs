//! Fragment coalescing
//!
//! Small fragments are buffered until the buffer is long enough or ends on a
//! sentence boundary. This is the only backpressure the engine applies; the
//! token source is never asked to slow down.

use once_cell::sync::Lazy;
use regex::Regex;

static BOUNDARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:[.!?]\s*|\n)$").expect("valid regex"));

/// Buffers fragments into emit-ready chunks
#[derive(Debug, Clone, Default)]
pub struct ChunkCoalescer {
    min_chunk_size: usize,
    pending: String,
}

impl ChunkCoalescer {
    #[inline]
    #[must_use]
    pub fn new(min_chunk_size: usize) -> Self {
        Self {
            min_chunk_size,
            pending: String::new(),
        }
    }

    /// Add a fragment; returns the buffered text once it is ready to emit
    pub fn push(&mut self, fragment: &str) -> Option<String> {
        self.pending.push_str(fragment);
        if self.pending.is_empty() {
            return None;
        }
        let ready = self.min_chunk_size == 0
            || self.pending.chars().count() >= self.min_chunk_size
            || BOUNDARY.is_match(&self.pending);
        ready.then(|| std::mem::take(&mut self.pending))
    }

    /// Emit whatever is still buffered
    pub fn flush(&mut self) -> Option<String> {
        (!self.pending.is_empty()).then(|| std::mem::take(&mut self.pending))
    }

    /// Put flushed text back in front of the buffer
    pub fn restore(&mut self, text: String) {
        self.pending.insert_str(0, &text);
    }

    /// Characters currently buffered
    #[inline]
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_until_min_size() {
        let mut coalescer = ChunkCoalescer::new(8);
        assert_eq!(coalescer.push("fn "), None);
        assert_eq!(coalescer.push("foo"), None);
        assert_eq!(coalescer.push("() {}").as_deref(), Some("fn foo() {}"));
        assert_eq!(coalescer.flush(), None);
    }

    #[test]
    fn sentence_boundary_emits_early() {
        let mut coalescer = ChunkCoalescer::new(100);
        assert_eq!(coalescer.push("Done. ").as_deref(), Some("Done. "));
        assert_eq!(coalescer.push("line\n").as_deref(), Some("line\n"));
        assert_eq!(coalescer.push("tail"), None);
        assert_eq!(coalescer.pending_len(), 4);
        assert_eq!(coalescer.flush().as_deref(), Some("tail"));
    }

    #[test]
    fn zero_min_passes_through() {
        let mut coalescer = ChunkCoalescer::new(0);
        assert_eq!(coalescer.push("a").as_deref(), Some("a"));
        assert_eq!(coalescer.push(""), None);
    }
}
