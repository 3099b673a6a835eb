//! Bounded retry bookkeeping
//!
//! Attempts are counted per `(context, signature)` where the signature is the
//! error message with digits removed, so "timeout after 31ms" and "timeout
//! after 45ms" share one budget.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Upper bound on a single backoff delay
pub const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Where the error happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorContext {
    ChunkProcessing,
    SessionCompletion,
}

impl ErrorContext {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChunkProcessing => "chunk_processing",
            Self::SessionCompletion => "session_completion",
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do after an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryDecision {
    /// Try again after `delay`
    Retry { attempt: u32, delay: Duration },
    /// Budget exhausted; fail the session
    Exhausted { attempts: u32 },
}

impl RecoveryDecision {
    #[inline]
    #[must_use]
    pub fn is_retry(&self) -> bool {
        matches!(self, Self::Retry { .. })
    }

    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        match self {
            Self::Retry { attempt, .. } => *attempt,
            Self::Exhausted { attempts } => *attempts,
        }
    }
}

/// Error message with digits removed
#[must_use]
pub fn signature(message: &str) -> String {
    message.chars().filter(|c| !c.is_ascii_digit()).collect()
}

/// Per-session retry counters
#[derive(Debug, Clone)]
pub struct RecoveryManager {
    max_retries: u32,
    base_delay: Duration,
    attempts: HashMap<(ErrorContext, String), u32>,
}

impl RecoveryManager {
    #[must_use]
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            attempts: HashMap::new(),
        }
    }

    /// Count one failure and decide whether to retry
    pub fn record(&mut self, context: ErrorContext, message: &str) -> RecoveryDecision {
        let count = self
            .attempts
            .entry((context, signature(message)))
            .or_insert(0);
        *count += 1;
        let attempt = *count;
        if attempt > self.max_retries {
            RecoveryDecision::Exhausted { attempts: attempt }
        } else {
            RecoveryDecision::Retry {
                attempt,
                delay: self.delay_for(attempt),
            }
        }
    }

    /// `base × 2^(attempt − 1)`, capped at [`MAX_BACKOFF`]
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    /// Attempts recorded so far for a key
    #[must_use]
    pub fn attempts(&self, context: ErrorContext, message: &str) -> u32 {
        self.attempts
            .get(&(context, signature(message)))
            .copied()
            .unwrap_or(0)
    }

    /// Forget a key after the operation succeeded
    pub fn reset(&mut self, context: ErrorContext, message: &str) {
        self.attempts.remove(&(context, signature(message)));
    }
}
