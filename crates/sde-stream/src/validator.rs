//! Partial and final structural validation

use crate::chunk::StreamChunk;
use sde_buffer::balance;
use serde::{Deserialize, Serialize};

/// Validation verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationOutcome {
    #[inline]
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    #[inline]
    #[must_use]
    pub fn invalid(error: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(error.into()),
        }
    }
}

/// Bracket-balance checks on streamed content
#[derive(Debug, Clone, Copy)]
pub struct PartialValidator {
    tolerance: usize,
}

impl Default for PartialValidator {
    fn default() -> Self {
        Self { tolerance: 3 }
    }
}

impl PartialValidator {
    #[inline]
    #[must_use]
    pub fn new(tolerance: usize) -> Self {
        Self { tolerance }
    }

    /// Lenient check of the content assembled so far plus `chunk`
    #[must_use]
    pub fn validate_chunk(&self, chunk: &StreamChunk, assembled_so_far: &str) -> ValidationOutcome {
        let mut text = String::with_capacity(assembled_so_far.len() + chunk.content().len());
        text.push_str(assembled_so_far);
        text.push_str(chunk.content());
        let outcome = self.validate_partial(&text);
        match outcome.error {
            Some(error) => ValidationOutcome::invalid(format!("{error} at chunk {}", chunk.sequence())),
            None => outcome,
        }
    }

    /// Lenient check of incomplete content
    #[must_use]
    pub fn validate_partial(&self, content: &str) -> ValidationOutcome {
        let report = balance::scan(content);
        if report.within_tolerance(self.tolerance) {
            ValidationOutcome::valid()
        } else {
            ValidationOutcome::invalid(format!(
                "bracket imbalance of {} exceeds tolerance {}",
                report.net(),
                self.tolerance
            ))
        }
    }

    /// Exact check of finished content
    #[must_use]
    pub fn validate_complete(&self, content: &str) -> ValidationOutcome {
        match balance::scan(content).describe() {
            None => ValidationOutcome::valid(),
            Some(problem) => ValidationOutcome::invalid(problem),
        }
    }
}
