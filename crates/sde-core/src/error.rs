//! Error types for SDE Core
//!
//! Every failure maps onto one [`ErrorKind`]:
//! - transport: chunk delivery failed, retried with backoff
//! - structural: bracket, range or overlap violations
//! - semantic: heuristic breaking-change detection (reported through
//!   `SafeApplyResult::failure_kind`, never raised)
//! - resource: context or output budget exhausted
//! - state: unknown or locked file, unknown or finished session

use crate::config::ConfigError;
use crate::extract::ExtractError;
use sde_buffer::{BackupId, ConflictId, FileId};
use sde_ledger::LedgerError;
use sde_stream::SessionError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Structural,
    Semantic,
    Resource,
    State,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Structural => "structural",
            Self::Semantic => "semantic",
            Self::Resource => "resource",
            Self::State => "state",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// File state registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No file registered under this id
    #[error("file not found: {0}")]
    NotFound(FileId),

    /// Another apply holds the file
    #[error("file is locked: {0}")]
    Locked(FileId),

    /// Lock guard belongs to a different file
    #[error("lock guard for {guard} used on {file_id}")]
    WrongGuard { guard: FileId, file_id: FileId },

    /// Nothing proposed for this file
    #[error("no pending diffs for {0}")]
    NoPendingDiffs(FileId),
}

/// Internal pipeline failures that force an emergency rollback
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// Restoring the stage backup failed
    #[error("rollback to backup {backup_id} failed: {}", errors.join("; "))]
    RollbackFailed { backup_id: BackupId, errors: Vec<String> },
}

/// Main engine error type
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No stored conflict with this id
    #[error("conflict {conflict_id} not found for {file_id}")]
    ConflictNotFound { file_id: FileId, conflict_id: ConflictId },

    /// The conflict can only be resolved by hand
    #[error("conflict {0} requires manual resolution")]
    ManualResolutionRequired(ConflictId),
}

impl EngineError {
    /// Taxonomy bucket of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Session(err) => match err {
                SessionError::Transport(_) | SessionError::RetriesExhausted { .. } => ErrorKind::Transport,
                SessionError::Budget(_) | SessionError::OutputLimitExceeded { .. } => ErrorKind::Resource,
                SessionError::NotFound(_) | SessionError::InvalidState { .. } | SessionError::Cancelled(_) => {
                    ErrorKind::State
                }
            },
            Self::Extract(_) | Self::ConflictNotFound { .. } | Self::ManualResolutionRequired(_) => {
                ErrorKind::Structural
            }
            Self::Registry(_) | Self::Ledger(_) | Self::Config(_) => ErrorKind::State,
        }
    }

    /// Only transport failures are worth retrying
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sde_buffer::SessionId;
    use sde_stream::{BudgetError, TransportError};

    #[test]
    fn taxonomy() {
        let transport = EngineError::from(SessionError::from(TransportError::new("reset")));
        assert_eq!(transport.kind(), ErrorKind::Transport);
        assert!(transport.is_retryable());

        let resource = EngineError::from(SessionError::from(BudgetError::ContextWindowExceeded {
            required: 10,
            budget: 5,
        }));
        assert_eq!(resource.kind(), ErrorKind::Resource);
        assert!(!resource.is_retryable());

        let state = EngineError::from(RegistryError::Locked(FileId::new("a")));
        assert_eq!(state.kind(), ErrorKind::State);

        let missing = EngineError::from(SessionError::NotFound(SessionId::new()));
        assert_eq!(missing.kind(), ErrorKind::State);
        assert_eq!(
            EngineError::ManualResolutionRequired(ConflictId::new()).kind(),
            ErrorKind::Structural
        );
    }
}
