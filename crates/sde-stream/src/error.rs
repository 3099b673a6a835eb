//! Streaming errors

use crate::recovery::ErrorContext;
use crate::state::StreamStatus;
use sde_buffer::SessionId;

/// Context budgeting failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BudgetError {
    /// Windows still exceed the budget after every stage
    #[error("context window exceeded: {required} tokens required, budget is {budget}")]
    ContextWindowExceeded { required: usize, budget: usize },

    /// Budget of zero tokens
    #[error("invalid token budget: {0}")]
    InvalidBudget(usize),
}

/// Failure delivering a fragment from the token source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("transport error: {message}")]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Session lifecycle failures
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// No session with this id
    #[error("session not found: {0}")]
    NotFound(SessionId),

    /// Operation not valid in the current status
    #[error("session {session_id} is {status}, cannot {operation}")]
    InvalidState {
        session_id: SessionId,
        status: StreamStatus,
        operation: &'static str,
    },

    /// Retry budget used up
    #[error("{context} failed after {attempts} attempts: {message}")]
    RetriesExhausted {
        context: ErrorContext,
        attempts: u32,
        message: String,
    },

    /// Output grew past the session's token ceiling
    #[error("output token limit exceeded: {used} > {max}")]
    OutputLimitExceeded { used: usize, max: usize },

    /// Session was cancelled while work was pending
    #[error("session cancelled: {0}")]
    Cancelled(String),

    /// Context budgeting failed at creation
    #[error(transparent)]
    Budget(#[from] BudgetError),

    /// Token source failure that was not retried
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl SessionError {
    /// Only transport errors may be retried
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Resource exhaustion, reported and never retried
    #[inline]
    #[must_use]
    pub fn is_resource(&self) -> bool {
        matches!(self, Self::Budget(_) | Self::OutputLimitExceeded { .. })
    }
}
