//! SDE Buffer Model
//!
//! The shared vocabulary of the streaming diff engine: line-addressed text
//! buffers, the edit operations applied to them, and the events the engine
//! reports while doing so.
//!
//! # Core Concepts
//!
//! - [`TextBuffer`]: versioned, 1-indexed line buffer
//! - [`DiffOperation`]: insert/replace/delete/modify over a [`LineRange`]
//! - [`balance::scan`]: heuristic bracket-balance check shared by the
//!   streaming validator and the conflict detector
//! - [`EngineEvent`] / [`EventSink`]: closed event set and its consumers
//! - [`ContentHash`]: Blake3 fingerprint of buffer content
//!
//! # Example
//!
//! ```rust
//! use sde_buffer::{DiffOperation, TextBuffer};
//!
//! let mut buffer = TextBuffer::from_text("a\nb\nc\n");
//! let outcomes = buffer.apply_bottom_up(&[
//!     DiffOperation::replace(1, 1, "A"),
//!     DiffOperation::delete(3, 3),
//! ]);
//! assert!(outcomes.iter().all(Result::is_ok));
//! assert_eq!(buffer.text(), "A\nb\n");
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod balance;
mod buffer;
mod diff;
mod event;
mod hash;
mod ids;

pub use balance::BalanceReport;
pub use buffer::TextBuffer;
pub use diff::{bottom_up_order, DiffBuilder, DiffError, DiffKind, DiffOperation, LineRange};
pub use event::{EngineEvent, EventSink, FanoutSink, NullSink, TracingSink};
pub use hash::ContentHash;
pub use ids::{BackupId, ChangeId, ChunkId, ConflictId, FileId, SessionId};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Estimate tokens for `text` at `chars_per_token` characters per token
#[inline]
#[must_use]
pub fn estimate_tokens(text: &str, chars_per_token: usize) -> usize {
    let chars = text.chars().count();
    chars.div_ceil(chars_per_token.max(1))
}

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn buffer_diff_and_balance_integration() {
        let mut buffer = TextBuffer::from_text("fn a() {\n    1\n}\n");
        assert!(balance::scan(&buffer.text()).is_balanced());

        let op = DiffOperation::delete(3, 3);
        buffer.apply(&op).unwrap();
        let report = balance::scan(&buffer.text());
        assert!(!report.is_balanced());
        assert_eq!(report.unclosed, vec!['{']);
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens("", 4), 0);
        assert_eq!(estimate_tokens("abcde", 4), 2);
        assert_eq!(estimate_tokens("abcd", 0), 4);
    }
}
