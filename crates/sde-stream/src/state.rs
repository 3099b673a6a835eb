//! Session status machine and state snapshot

use chrono::{DateTime, Utc};
use sde_buffer::SessionId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    Idle,
    Streaming,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl StreamStatus {
    /// No transitions leave this status
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Streaming => "streaming",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: StreamStatus) -> Vec<StreamStatus> {
    use StreamStatus::{Cancelled, Completed, Error, Idle, Paused, Streaming};
    match from {
        Idle => vec![Streaming, Completed, Error, Cancelled],
        Streaming => vec![Paused, Completed, Error, Cancelled],
        Paused => vec![Streaming, Completed, Error, Cancelled],
        Completed | Error | Cancelled => vec![],
    }
}

/// Whether `from → to` is a legal transition
#[inline]
#[must_use]
pub fn can_transition(from: StreamStatus, to: StreamStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

/// Per-session mutable record; snapshots are handed out by value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub session_id: SessionId,
    pub status: StreamStatus,
    pub processed_chunks: u64,
    /// Highest sequence number seen
    pub current_sequence: Option<u64>,
    /// Expected chunk count, when the producer knows it
    pub total_chunks: Option<u64>,
    /// Percentage in `[0, 100]`
    pub progress: f64,
    /// Assembled content so far
    pub content: String,
    pub tokens_used: usize,
    pub max_tokens: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_chunk_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub average_chunk_ms: Option<f64>,
    pub eta_ms: Option<u64>,
    /// Final validation verdict, set on completion
    pub is_valid: Option<bool>,
}

impl StreamState {
    #[must_use]
    pub fn new(session_id: SessionId, max_tokens: usize) -> Self {
        Self {
            session_id,
            status: StreamStatus::Idle,
            processed_chunks: 0,
            current_sequence: None,
            total_chunks: None,
            progress: 0.0,
            content: String::new(),
            tokens_used: 0,
            max_tokens,
            errors: Vec::new(),
            warnings: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            last_chunk_at: None,
            completed_at: None,
            average_chunk_ms: None,
            eta_ms: None,
            is_valid: None,
        }
    }

    /// Recompute progress from the counters
    ///
    /// Unknown totals report 0 until completion; known totals are capped at
    /// 99 until the session completes.
    pub fn update_progress(&mut self) {
        self.progress = match (self.status, self.total_chunks) {
            (StreamStatus::Completed, _) => 100.0,
            (_, Some(total)) if total > 0 => {
                (self.processed_chunks as f64 / total as f64 * 100.0).min(99.0)
            }
            _ => 0.0,
        };
        self.eta_ms = match (self.average_chunk_ms, self.total_chunks) {
            (_, _) if self.status.is_terminal() => None,
            (Some(avg), Some(total)) => {
                let remaining = total.saturating_sub(self.processed_chunks);
                Some((avg * remaining as f64).round() as u64)
            }
            _ => None,
        };
    }
}
