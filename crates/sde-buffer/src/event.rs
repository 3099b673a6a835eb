//! Lifecycle and progress events
//!
//! Every event the engine emits is one variant of [`EngineEvent`], each with
//! a fixed payload. The serialized form is internally tagged:
//! `{"event": "chunk_processed", "session_id": "...", ...}`.

use crate::ids::{BackupId, FileId, SessionId};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;

/// Closed set of engine events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Session created and context windows budgeted
    StreamingSessionCreated {
        session_id: SessionId,
        window_count: usize,
        context_tokens: usize,
    },
    /// One chunk assembled
    ChunkProcessed {
        session_id: SessionId,
        sequence: u64,
        category: String,
        token_count: usize,
        is_valid: bool,
    },
    /// Progress/ETA recomputed
    ProgressUpdate {
        session_id: SessionId,
        progress: f64,
        processed_chunks: u64,
        eta_ms: Option<u64>,
    },
    /// Context budgeter changed the windows
    ContextOptimized {
        session_id: SessionId,
        original_tokens: usize,
        optimized_tokens: usize,
        removed: usize,
        truncated: usize,
    },
    /// Error routed through recovery
    StreamingError {
        session_id: SessionId,
        context: String,
        message: String,
        attempt: u32,
        recoverable: bool,
    },
    /// Session completed
    StreamingSessionCompleted {
        session_id: SessionId,
        content_length: usize,
        is_valid: bool,
        duration_ms: u64,
    },
    /// Session cancelled
    StreamingSessionCancelled {
        session_id: SessionId,
        reason: String,
    },
    /// Session paused
    StreamingSessionPaused { session_id: SessionId },
    /// Session resumed
    StreamingSessionResumed { session_id: SessionId },
    /// Periodic liveness signal
    StreamingHeartbeat {
        session_id: SessionId,
        status: String,
        processed_chunks: u64,
    },
    /// Session exceeded its soft timeout
    StreamingTimeoutWarning {
        session_id: SessionId,
        elapsed_ms: u64,
    },
    /// Snapshot stored before mutation
    BackupCreated {
        file_id: FileId,
        backup_id: BackupId,
        version: u64,
    },
    /// Conflicts found for a diff batch
    ConflictsDetected {
        file_id: FileId,
        count: usize,
        critical: usize,
    },
    /// Content restored from a snapshot
    RollbackCompleted {
        file_id: FileId,
        backup_id: BackupId,
        success: bool,
    },
    /// Diff batch applied and validated
    DiffsSafelyApplied {
        file_id: FileId,
        applied: usize,
        backup_id: Option<BackupId>,
    },
    /// Diff batch rejected or rolled back
    DiffsApplyFailed {
        file_id: FileId,
        errors: Vec<String>,
        rolled_back: bool,
    },
}

impl EngineEvent {
    /// Wire name of the event
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamingSessionCreated { .. } => "streaming_session_created",
            Self::ChunkProcessed { .. } => "chunk_processed",
            Self::ProgressUpdate { .. } => "progress_update",
            Self::ContextOptimized { .. } => "context_optimized",
            Self::StreamingError { .. } => "streaming_error",
            Self::StreamingSessionCompleted { .. } => "streaming_session_completed",
            Self::StreamingSessionCancelled { .. } => "streaming_session_cancelled",
            Self::StreamingSessionPaused { .. } => "streaming_session_paused",
            Self::StreamingSessionResumed { .. } => "streaming_session_resumed",
            Self::StreamingHeartbeat { .. } => "streaming_heartbeat",
            Self::StreamingTimeoutWarning { .. } => "streaming_timeout_warning",
            Self::BackupCreated { .. } => "backup_created",
            Self::ConflictsDetected { .. } => "conflicts_detected",
            Self::RollbackCompleted { .. } => "rollback_completed",
            Self::DiffsSafelyApplied { .. } => "diffs_safely_applied",
            Self::DiffsApplyFailed { .. } => "diffs_apply_failed",
        }
    }

    /// Session the event belongs to, if any
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::StreamingSessionCreated { session_id, .. }
            | Self::ChunkProcessed { session_id, .. }
            | Self::ProgressUpdate { session_id, .. }
            | Self::ContextOptimized { session_id, .. }
            | Self::StreamingError { session_id, .. }
            | Self::StreamingSessionCompleted { session_id, .. }
            | Self::StreamingSessionCancelled { session_id, .. }
            | Self::StreamingSessionPaused { session_id }
            | Self::StreamingSessionResumed { session_id }
            | Self::StreamingHeartbeat { session_id, .. }
            | Self::StreamingTimeoutWarning { session_id, .. } => Some(*session_id),
            _ => None,
        }
    }

    /// File the event belongs to, if any
    #[must_use]
    pub fn file_id(&self) -> Option<&FileId> {
        match self {
            Self::BackupCreated { file_id, .. }
            | Self::ConflictsDetected { file_id, .. }
            | Self::RollbackCompleted { file_id, .. }
            | Self::DiffsSafelyApplied { file_id, .. }
            | Self::DiffsApplyFailed { file_id, .. } => Some(file_id),
            _ => None,
        }
    }
}

/// Consumer of engine events
pub trait EventSink: Send + Sync + Debug {
    /// Deliver one event; must not block
    fn emit(&self, event: EngineEvent);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn emit(&self, event: EngineEvent) {
        (**self).emit(event);
    }
}

/// Drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// Logs every event through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: EngineEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            EngineEvent::StreamingError { .. }
            | EngineEvent::DiffsApplyFailed { .. }
            | EngineEvent::StreamingTimeoutWarning { .. } => {
                tracing::warn!(event = event.name(), %payload, "engine event");
            }
            _ => tracing::debug!(event = event.name(), %payload, "engine event"),
        }
    }
}

/// Forwards each event to several sinks
#[derive(Debug, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    /// Create empty fan-out
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink
    #[inline]
    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: EngineEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_event_tag() {
        let event = EngineEvent::StreamingSessionPaused {
            session_id: SessionId::new(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "streaming_session_paused");
        let back: EngineEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn name_matches_serialized_tag() {
        let event = EngineEvent::DiffsApplyFailed {
            file_id: FileId::new("a.ts"),
            errors: vec!["boom".into()],
            rolled_back: true,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
        assert_eq!(event.file_id().map(FileId::as_str), Some("a.ts"));
        assert!(event.session_id().is_none());
    }
}
